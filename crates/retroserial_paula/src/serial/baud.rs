use retroserial_common::SchedulePolicy;

use super::{SerialEvent, SerialHost, SerialPort};
use crate::transport::{TransportKind, MIDI_BAUD};

/// Paula colour clock, PAL.
pub const PAULA_CLOCK: u32 = 3_546_895;

/// Rates a host port is set to. Entry 0 is a guard so that the walk always
/// moves past it.
pub const BAUD_RATES: [u32; 16] = [
    0, 110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 31400, 38400, 57600, 115200, 128000,
    256000,
];

const DIRECT_MIN_BAUD: u32 = 115_200;

/// Snap a SERPER value to the closest standard rate with 3% tolerance.
///
/// Periods faster than the top of the table fall back to the lowest rate.
pub fn resolve_baud(period: u16) -> u32 {
    let masked = u32::from(period & 0x7fff).max(1);
    let per = (PAULA_CLOCK / (masked + 1)).max(1);
    BAUD_RATES
        .iter()
        .copied()
        .find(|&rate| per <= rate * 100 / 97)
        .unwrap_or(BAUD_RATES[1])
}

#[derive(Default)]
pub(super) struct BaudClock {
    /// Raw SERPER; bit 15 selects 9-bit frames.
    pub(super) period: u16,
    pub(super) period_set: bool,
    pub(super) ninebit: bool,
    pub(super) baud: u32,
    pub(super) applied_baud: u32,
    pub(super) tx_period: u32,
    pub(super) rx_period: u32,
    pub(super) tx_counter: u32,
    pub(super) rx_counter: u32,
}

impl BaudClock {
    /// Colour clocks per bit.
    pub(super) fn bit_period(&self) -> u64 {
        u64::from(self.period & 0x7fff) + 1
    }
}

impl SerialPort {
    /// SERPER write.
    pub fn write_period(&mut self, host: &mut dyn SerialHost, word: u16) {
        if self.clock.period_set && self.clock.period == word {
            return;
        }

        let ninebit = word & 0x8000 != 0;
        let masked = u32::from(word & 0x7fff);
        let baud = resolve_baud(word);
        let line = host.line_cycles().max(1);

        if !self.clock.period_set {
            // Lines ticked with no period must not turn into a backlog of steps.
            self.clock.tx_counter = 0;
            self.clock.rx_counter = 0;
        }
        self.safe_receive = false;
        self.clock.period_set = true;
        self.clock.period = word;
        self.clock.ninebit = ninebit;
        self.clock.tx_period = (masked + 1) * (1 + 8 + u32::from(ninebit) + 1);
        self.clock.rx_period = (self.clock.tx_period / 4).max(line);

        if !self.is_loopback() || self.config.log_output {
            log::debug!(
                "SERIAL: period={}, baud={}, cycles={}, bits={}",
                masked,
                baud,
                self.clock.tx_period,
                if ninebit { 9 } else { 8 }
            );
        }

        let mut applied = if ninebit { baud * 2 } else { baud };
        if self.config.direct {
            if applied != MIDI_BAUD && applied < DIRECT_MIN_BAUD {
                applied = DIRECT_MIN_BAUD;
            }
            self.clock.tx_period = line;
            self.clock.rx_period = line;
            self.safe_receive = true;
        }
        if self.is_external_device() {
            self.safe_receive = true;
        }
        self.clock.baud = baud;
        self.clock.applied_baud = applied;

        self.rx.previous = None;
        self.tx.previous = None;
        self.transport.set_baud(applied, baud);

        let kind = self.transport.kind();
        if self.accurate && matches!(kind, TransportKind::Loopback | TransportKind::None) {
            self.rescale_transmit(host);
        }
    }

    /// Re-express the rest of the frame in flight in the new bit period.
    /// Whole bits still to go keep their count; the unfinished part of the
    /// current bit keeps its length in cycles.
    fn rescale_transmit(&mut self, host: &mut dyn SerialHost) {
        let now = host.now();
        let bit_period = self.clock.bit_period();
        let Some(timing) = self.tx.timing.as_mut() else {
            return;
        };
        if timing.started + timing.cycles <= now {
            return;
        }
        let current_bit = timing.bit_at(now);
        let remaining = timing.cycles - (now - timing.started);
        let partial = remaining % timing.bit_period;
        let whole = remaining / timing.bit_period;

        timing.first_bit = current_bit;
        timing.lead = partial;
        timing.bit_period = bit_period;
        timing.cycles = whole * bit_period + partial;
        timing.started = now;
        let cycles = timing.cycles;

        log::debug!("SERIAL: transmit rescaled, {} cycles left", cycles);
        self.schedule(
            host,
            cycles,
            SerialEvent::TransmitEnd,
            SchedulePolicy::ReplaceExisting,
        );
    }
}
