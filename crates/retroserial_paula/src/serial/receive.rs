use std::collections::VecDeque;

use retroserial_common::Interrupt;

use super::status::Serdatr;
use super::transmit::NINEBIT_SYNC;
use super::{SerialHost, SerialPort, ShiftState};
use crate::transport::{ByteTransport, TransportSession};

/// Scanlines an unread word may sit in SERDATR before it is overrun.
pub(super) const HSYNCS_BEFORE_OVERFLOW: u32 = 200;
/// Receive steps between zero words while a break is held.
pub(super) const BREAK_TRANSMIT_DELAY: i32 = 4;
/// Frames a detected break is held for.
const BREAK_HOLD_FRAMES: i32 = 20;
/// Cycles from the stop bit to RBF.
const RBF_DELAY: u32 = 9;

#[derive(Default)]
pub(super) struct Receiver {
    /// SERDATR data and stop bits.
    pub(super) word: u16,
    pub(super) full: bool,
    /// Cycle from which the word counts as delivered.
    pub(super) visible_at: u64,
    pub(super) overrun: bool,
    /// RBF was re-requested for a word the program has not read yet.
    pub(super) sticky: bool,
    pub(super) lines_unread: u32,
    pub(super) queue: VecDeque<u16>,
    /// Last byte taken from the backend.
    pub(super) previous: Option<u8>,
    /// First byte of a 9-bit frame.
    pub(super) prefix: Option<u8>,
    /// Below zero: break seen, counting down buffered bytes. Above zero:
    /// scanlines the break is still held for.
    pub(super) break_counter: i32,
    pub(super) break_delay: i32,
}

impl SerialPort {
    /// Latch the receive register as full and request RBF.
    pub(super) fn raise_receive(&mut self, host: &mut dyn SerialHost) {
        if !self.rx.full {
            self.rx.full = true;
            self.rx.visible_at = host.now() + u64::from(RBF_DELAY);
        }
        let delay = if self.accurate { RBF_DELAY } else { 0 };
        host.request_interrupt(Interrupt::ReceiveBufferFull, delay);
        self.rx.lines_unread = 0;
    }

    /// Whether the receiver may take another word now. Declares an overrun
    /// once a word has gone unread for too long.
    pub(super) fn can_receive(&mut self, host: &mut dyn SerialHost) -> bool {
        if self.safe_receive
            && (self.rx.full || host.interrupt_pending(Interrupt::ReceiveBufferFull))
        {
            return false;
        }
        if !self.rx.full {
            return true;
        }
        if self.config.direct {
            return false;
        }
        if self.accurate {
            return true;
        }
        if self.rx.lines_unread > HSYNCS_BEFORE_OVERFLOW {
            log::warn!("SERIAL: receive overrun");
            self.transport.flush();
            self.rx.overrun = true;
            self.rx.full = false;
            self.rx.lines_unread = 0;
            self.rx.sticky = false;
            return true;
        }
        false
    }

    /// Deliver a word from an emulated device. Words arriving while the
    /// register is full are queued; returns false if the queue is full too.
    pub fn receive_external(&mut self, host: &mut dyn SerialHost, word: u16) -> bool {
        if self.rx.full {
            if self.rx.queue.len() >= self.config.receive_queue_capacity {
                log::warn!("SERIAL: receive queue full, word {:#06x} dropped", word);
                return false;
            }
            self.rx.queue.push_back(word);
            return true;
        }
        self.rx.word = word;
        self.raise_receive(host);
        true
    }

    pub(super) fn receive_next_buffered(&mut self, host: &mut dyn SerialHost) {
        if self.rx.full || host.interrupt_pending(Interrupt::ReceiveBufferFull) {
            return;
        }
        if let Some(word) = self.rx.queue.pop_front() {
            self.receive_external(host, word);
        }
    }

    /// Called when the host re-evaluates interrupts. Re-requests RBF for a
    /// word that is still unread after the program acknowledged the
    /// interrupt, so that fast emulation does not lose data.
    pub fn rethink(&mut self, host: &mut dyn SerialHost) {
        if !self.rx.full {
            return;
        }
        let mut unread = true;
        if self.accurate && host.now() > self.rx.visible_at {
            unread = false;
        }
        if self.is_loopback() {
            unread = false;
        }
        if self.is_external_device() || self.safe_receive {
            unread = true;
        }
        if unread
            && host.interrupt_enabled(Interrupt::ReceiveBufferFull)
            && !host.interrupt_pending(Interrupt::ReceiveBufferFull)
        {
            host.request_interrupt(Interrupt::ReceiveBufferFull, 0);
            self.rx.sticky = true;
        }
    }

    /// The program wrote the RBF bit of INTREQ.
    pub fn rbf_interrupt_changed(&mut self, set: bool) {
        self.rx.overrun = set;
    }

    /// SERDATR read.
    pub fn read_data(&mut self, host: &mut dyn SerialHost) -> u16 {
        let now = host.now();
        let mut status = Serdatr::empty();
        if !self.tx.pending && (!self.accurate || now >= self.tx.holding_ready_at) {
            status |= Serdatr::TBE;
        }
        if self.tx.state == ShiftState::Empty && status.contains(Serdatr::TBE) {
            status |= Serdatr::TSRE;
        }
        if self.rx.full {
            status |= Serdatr::RBF;
        }
        if self.rx.overrun {
            status |= Serdatr::OVRUN;
        }
        if self.rxd_high(now) {
            status |= Serdatr::RXD;
        }
        let value = (self.rx.word & Serdatr::WORD_MASK) | status.bits();
        log::trace!("SERIAL: SERDATR read {:#06x}", value);

        self.rx.full = false;
        if self.rx.sticky {
            self.rx.sticky = false;
            host.clear_interrupt(Interrupt::ReceiveBufferFull);
        }
        value
    }

    /// Level of the RXD pin. Looped back, it follows our own TXD.
    fn rxd_high(&self, now: u64) -> bool {
        if self.is_loopback() {
            if self.tx.break_active {
                return false;
            }
            if let Some(level) = self
                .tx
                .timing
                .and_then(|t| t.line_level(self.tx.shift, now))
            {
                return level;
            }
        }
        self.rx.break_counter <= 0
    }

    pub(super) fn check_receive_bytes(&mut self, host: &mut dyn SerialHost) {
        if !self.can_receive(host) {
            return;
        }
        let frame_lines = host.frame_lines();
        let ninebit = self.clock.ninebit;
        let crlf = self.config.crlf;
        let Some(transport) = self.transport.byte_transport() else {
            return;
        };
        if receive_step(&mut self.rx, transport, ninebit, crlf, frame_lines) {
            log::trace!("SERIAL: received {:#06x}", self.rx.word);
            self.raise_receive(host);
        }
    }

    pub(super) fn check_receive_relay(&mut self, host: &mut dyn SerialHost) {
        if !matches!(self.transport, TransportSession::NetworkRelay(_)) {
            return;
        }
        if !self.can_receive(host) {
            return;
        }
        let TransportSession::NetworkRelay(relay) = &mut self.transport else {
            return;
        };
        if !relay.read_available() {
            return;
        }
        let Some(word) = relay.read_word() else {
            return;
        };
        let stop = if word & 0x200 != 0 {
            Serdatr::STOP9
        } else {
            Serdatr::STOP8
        };
        self.rx.word = (word & 0x1ff) | stop.bits();
        self.raise_receive(host);
    }
}

/// One receive step against a byte transport. Returns true when `rx.word`
/// holds a new word for the program.
///
/// A break reported by the backend is only honoured once the bytes buffered
/// ahead of it have been delivered. It is then held for a fixed number of
/// frames, during which a zero word is delivered every few steps; the hold
/// ends with a zero word carrying a stop bit.
pub(super) fn receive_step(
    rx: &mut Receiver,
    transport: &mut dyn ByteTransport,
    ninebit: bool,
    crlf: bool,
    frame_lines: u32,
) -> bool {
    let avail = transport.read_available();

    if rx.break_counter == -1 || rx.break_counter > 0 {
        rx.previous = Some(0);
        rx.word = 0;
        if rx.break_counter < 0 {
            rx.break_counter = BREAK_HOLD_FRAMES * frame_lines as i32;
            rx.break_delay = BREAK_TRANSMIT_DELAY;
            log::debug!("SERIAL: break start");
        }
        if rx.break_counter == 1 {
            rx.word |= if ninebit {
                Serdatr::STOP9.bits()
            } else {
                Serdatr::STOP8.bits()
            };
            rx.break_counter = 0;
            log::debug!("SERIAL: break complete");
        }
        rx.break_delay -= 1;
        if rx.break_delay != 0 && rx.break_counter != 0 {
            return false;
        }
        rx.break_delay = BREAK_TRANSMIT_DELAY;
        return true;
    }

    if avail.break_condition && rx.break_counter == 0 {
        rx.break_counter = -1 - avail.bytes as i32;
        log::debug!("SERIAL: break detect ({} buffered)", avail.bytes);
        if rx.break_counter == -1 {
            return false;
        }
    }
    if avail.bytes == 0 {
        return false;
    }

    if ninebit {
        loop {
            let Some(byte) = transport.read(1).first().copied() else {
                return false;
            };
            match rx.prefix.take() {
                Some(prefix) => {
                    rx.word = (u16::from(prefix & 1) << 8) | u16::from(byte) | Serdatr::STOP9.bits();
                    if rx.break_counter < -1 {
                        rx.break_counter += 1;
                    }
                    return true;
                }
                None => {
                    if byte & !1 != NINEBIT_SYNC {
                        log::warn!(
                            "SERIAL: 9-bit serial emulation sync lost, {:02X} != {:02X}",
                            byte & !1,
                            NINEBIT_SYNC
                        );
                        return false;
                    }
                    rx.prefix = Some(byte);
                }
            }
        }
    }

    let Some(byte) = transport.read(1).first().copied() else {
        return false;
    };
    if crlf && (byte == 0 || (rx.previous == Some(b'\r') && byte == b'\n')) {
        rx.previous = None;
        return false;
    }
    rx.previous = Some(byte);
    rx.word = u16::from(byte) | Serdatr::STOP8.bits();
    if rx.break_counter < -1 {
        rx.break_counter += 1;
    }
    true
}
