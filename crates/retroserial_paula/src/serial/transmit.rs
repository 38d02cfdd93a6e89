use retroserial_common::{Interrupt, SchedulePolicy};

use super::{SerialEvent, SerialHost, SerialPort};
use crate::transport::TransportSession;

/// Cycles between TXD and RXD through the line driver and receiver chips.
pub(super) const LOOPBACK_PROPAGATION_CYCLES: u64 = 3;
/// First byte of a 9-bit frame on a byte transport; bit 0 carries data bit 8.
pub(super) const NINEBIT_SYNC: u8 = 0xa8;

const CONSOLE_LINE_MAX: usize = 256;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ShiftState {
    #[default]
    Empty,
    /// A word was copied from the holding register.
    Loaded,
    /// The word went out; waiting for its transmit period to run out.
    Draining,
    /// The backend had no room; retried on the next tick.
    Stalled,
}

/// Where the shifter is in its frame, measured in colour clocks.
#[derive(Copy, Clone, Debug)]
pub(super) struct ShiftTiming {
    pub(super) started: u64,
    pub(super) bit_period: u64,
    /// Frame length in bits, start bit included.
    pub(super) bits: u32,
    pub(super) cycles: u64,
    /// Bit on the wire at `started`.
    pub(super) first_bit: u32,
    /// Cycles left of `first_bit` at `started`, zero if it starts there.
    pub(super) lead: u64,
}

impl ShiftTiming {
    fn new(started: u64, bit_period: u64, bits: u32) -> Self {
        Self {
            started,
            bit_period,
            bits,
            cycles: bit_period * u64::from(bits),
            first_bit: 0,
            lead: 0,
        }
    }

    pub(super) fn bit_at(&self, now: u64) -> u32 {
        let elapsed = now.saturating_sub(self.started);
        if elapsed < self.lead {
            return self.first_bit;
        }
        let carried = u32::from(self.lead > 0);
        let whole = (elapsed - self.lead) / self.bit_period.max(1);
        self.first_bit + carried + whole.min(u64::from(u32::MAX)) as u32
    }

    /// TXD level at `now`, or `None` once the frame is over.
    pub(super) fn line_level(&self, word: u16, now: u64) -> Option<bool> {
        if now >= self.started + self.cycles {
            return None;
        }
        match self.bit_at(now) {
            0 => Some(false),
            bit if bit >= self.bits => None,
            bit => Some(word & (1 << (bit - 1)) != 0),
        }
    }
}

#[derive(Default)]
pub(super) struct Transmitter {
    /// SERDAT.
    pub(super) holding: u16,
    pub(super) pending: bool,
    pub(super) shift: u16,
    /// Data bits of `shift` without the stop bit(s).
    pub(super) masked: u8,
    /// Position of the highest set bit of `shift`.
    pub(super) shift_bits: u32,
    pub(super) state: ShiftState,
    /// TBE was already requested for the word about to be loaded.
    pub(super) tbe_raised: bool,
    /// SERDATR reports TBE from this cycle on.
    pub(super) holding_ready_at: u64,
    pub(super) timing: Option<ShiftTiming>,
    pub(super) last_bit_cycle: u64,
    pub(super) last_bit_lines: u32,
    /// Last byte handed to the backend.
    pub(super) previous: Option<u8>,
    /// Break requested by the program.
    pub(super) break_active: bool,
    console: String,
}

impl SerialPort {
    /// SERDAT write. In cycle exact mode the write takes effect one cycle
    /// after the bus access.
    pub fn write_data(&mut self, host: &mut dyn SerialHost, word: u16) {
        if self.accurate {
            self.schedule(host, 1, SerialEvent::WriteData(word), SchedulePolicy::Append);
        } else {
            self.send_data(host, word);
        }
    }

    pub(super) fn send_data(&mut self, host: &mut dyn SerialHost, word: u16) {
        log::trace!("SERIAL: SERDAT write {:#06x}", word);

        if self.accurate {
            self.tx.holding = word;
            self.tx.pending = true;
            if self.tx.state == ShiftState::Empty {
                if self.is_loopback() || self.is_unconnected() || self.is_external_device() {
                    self.tx.tbe_raised = true;
                    host.request_interrupt(Interrupt::TransmitBufferEmpty, 1);
                }
                self.copy_to_shift(host);
            }
            return;
        }

        self.copy_to_shift(host);
        self.tx.holding = word;
        if word == 0 {
            log::debug!("SERIAL: zero serial word written");
            return;
        }
        if self.tx.pending {
            log::debug!("SERIAL: SERDAT written before the previous word was shifted out");
        }
        self.tx.pending = true;
        self.copy_to_shift(host);
    }

    /// Move the holding register into an empty shifter and start the frame.
    pub(super) fn copy_to_shift(&mut self, host: &mut dyn SerialHost) {
        if self.tx.state != ShiftState::Empty || !self.tx.pending {
            return;
        }
        let word = self.tx.holding;
        let data_bits = if word & 0xff80 == 0x80 { 7 } else { 8 };
        let now = host.now();

        self.tx.shift = word;
        self.tx.masked = (word & ((1 << data_bits) - 1)) as u8;
        self.tx.pending = false;
        if self.config.log_output {
            self.log_console(self.tx.masked);
        }
        if !self.tx.tbe_raised {
            host.request_interrupt(Interrupt::TransmitBufferEmpty, 1);
        }
        self.tx.tbe_raised = false;
        self.tx.state = ShiftState::Loaded;
        self.tx.shift_bits = 16 - word.leading_zeros();

        let bit_period = self.clock.bit_period();
        let timing = ShiftTiming::new(now, bit_period, self.tx.shift_bits + 1);
        self.tx.timing = Some(timing);

        if self.accurate {
            let mut cycles = timing.cycles;
            if self.transmit_end_owns_frame() {
                self.schedule(host, cycles, SerialEvent::TransmitEnd, SchedulePolicy::Append);
                return;
            }
            if self.is_loopback() {
                // Received in the middle of the stop bit.
                let stop = if self.clock.ninebit { 10 } else { 9 };
                let receive_at = bit_period * stop + (bit_period - 1) / 2;
                let residual = cycles.saturating_sub(receive_at) as u32;
                self.schedule(
                    host,
                    receive_at + LOOPBACK_PROPAGATION_CYCLES,
                    SerialEvent::LoopbackReceive { residual },
                    SchedulePolicy::Append,
                );
                return;
            }
            if self.tx.last_bit_lines > 0 {
                // The previous stop bit is still on the wire.
                cycles += self.tx.last_bit_cycle.saturating_sub(now);
            }
            self.schedule(host, cycles, SerialEvent::ShiftComplete, SchedulePolicy::Replace);
        } else if self.is_loopback() {
            self.loopback_receive(host, 0);
        }

        self.check_send(host);
    }

    /// Nothing on the wire consumes the frame; its scheduled end retires it.
    fn transmit_end_owns_frame(&self) -> bool {
        self.accurate && self.is_unconnected() && !self.is_external_device()
    }

    pub(super) fn finish_shift(&mut self) {
        self.tx.state = ShiftState::Empty;
        self.tx.timing = None;
    }

    /// Hand the shifter to the backend.
    pub(super) fn check_send(&mut self, host: &mut dyn SerialHost) {
        if !matches!(self.tx.state, ShiftState::Loaded | ShiftState::Stalled) {
            return;
        }
        if self.is_loopback() || self.transmit_end_owns_frame() {
            return;
        }
        let word = self.tx.shift;
        if self.tx.state == ShiftState::Loaded {
            if let Some(peripheral) = self.peripheral.as_mut() {
                peripheral.transmit(word);
            }
        }
        if !self.emit(word) {
            self.tx.state = ShiftState::Stalled;
            return;
        }
        log::trace!("SERIAL: send {:#06x}", word);

        if self.clock.tx_period <= host.line_cycles() || self.tx.state == ShiftState::Stalled {
            self.finish_shift();
            self.copy_to_shift(host);
        } else {
            self.tx.state = ShiftState::Draining;
        }
    }

    /// Write one word to the backend. False if it has no room for it or
    /// took less than offered; bytes already written are remembered and not
    /// sent again on retry.
    fn emit(&mut self, word: u16) -> bool {
        let masked = self.tx.masked;
        match &mut self.transport {
            TransportSession::SharedMemoryIpc(t) => {
                t.send(u32::from(word));
                return true;
            }
            TransportSession::NetworkRelay(t) => {
                t.send_word(word);
                return true;
            }
            _ => {}
        }
        let ninebit = self.clock.ninebit;
        let crlf = self.config.crlf;
        let Some(t) = self.transport.byte_transport() else {
            return true;
        };

        if ninebit {
            if !t.write_available(2) {
                return false;
            }
            return t.write(&[((word >> 8) & 1) as u8 | NINEBIT_SYNC, masked]) == 2;
        }
        if crlf && masked == b'\n' && self.tx.previous != Some(b'\r') {
            if !t.write_available(2) || t.write(b"\r") == 0 {
                return false;
            }
            self.tx.previous = Some(b'\r');
        }
        if !t.write_available(1) || t.write(&[masked]) == 0 {
            return false;
        }
        self.tx.previous = Some(masked);
        true
    }

    /// Flush pending output, then retire a drained shifter.
    pub(super) fn check_shift_empty(&mut self, host: &mut dyn SerialHost) -> bool {
        if let Some(t) = self.transport.byte_transport() {
            t.drain_output();
        }
        self.check_send(host);
        if self.tx.state == ShiftState::Draining {
            self.finish_shift();
            self.copy_to_shift(host);
            return true;
        }
        false
    }

    fn log_console(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                log::info!("SERIAL: {}", self.tx.console);
                self.tx.console.clear();
            }
            0x20..=0x7e => self.tx.console.push(char::from(byte)),
            _ => self.tx.console.push('.'),
        }
        if self.tx.console.len() >= CONSOLE_LINE_MAX {
            log::info!("SERIAL: {}", self.tx.console);
            self.tx.console.clear();
        }
    }
}
