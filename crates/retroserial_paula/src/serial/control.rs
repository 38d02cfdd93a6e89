use super::status::CiaSerialBits;
use super::SerialPort;
use crate::transport::{
    LineSignals, TransportSession, BREAK_OFF, BREAK_ON, CONTROL_BREAK, CONTROL_LINES,
};

/// Warnings about DTR/RTS driven as inputs before going quiet.
const INPUT_WARNING_LIMIT: u32 = 10;

pub(super) struct ControlLines {
    /// Last value seen on the CIA pins, active low.
    pub(super) bits: CiaSerialBits,
    /// Output bits as last written, masked by their direction.
    pub(super) written: CiaSerialBits,
    pub(super) direction: CiaSerialBits,
    pub(super) dtr: bool,
    pub(super) rts: bool,
    warnings_left: u32,
}

impl Default for ControlLines {
    fn default() -> Self {
        Self {
            bits: CiaSerialBits::empty(),
            written: CiaSerialBits::empty(),
            direction: CiaSerialBits::empty(),
            dtr: false,
            rts: false,
            warnings_left: INPUT_WARNING_LIMIT,
        }
    }
}

impl ControlLines {
    fn asserted(&self, line: CiaSerialBits) -> bool {
        self.direction.contains(line) && !self.written.contains(line)
    }

    /// DTR wired to DSR and CD, RTS wired to CTS.
    fn loopback_signals(&self) -> LineSignals {
        let mut signals = LineSignals::empty();
        if self.asserted(CiaSerialBits::DTR) {
            signals |= LineSignals::DSR | LineSignals::DCD;
        }
        if self.asserted(CiaSerialBits::RTS) {
            signals |= LineSignals::CTS;
        }
        signals
    }
}

/// Drive an active low input bit from `asserted`.
fn update_line(bits: &mut CiaSerialBits, line: CiaSerialBits, asserted: bool, name: &str) {
    if asserted && bits.contains(line) {
        bits.remove(line);
        log::debug!("SERIAL: {} on", name);
    } else if !asserted && !bits.contains(line) {
        bits.insert(line);
        log::debug!("SERIAL: {} off", name);
    }
}

impl SerialPort {
    /// CIA read of the serial control bits. `value` is what the port would
    /// read with nothing attached; the input bits are replaced with the
    /// state of the backend's lines.
    pub fn read_status(&mut self, value: u8) -> u8 {
        let signals = match &mut self.transport {
            TransportSession::None => return value,
            TransportSession::Loopback => self.lines.loopback_signals(),
            TransportSession::SharedMemoryIpc(t) => {
                let remote = t.remote_lines();
                let mut signals = LineSignals::empty();
                signals.set(LineSignals::DSR, remote & 1 != 0);
                signals.set(LineSignals::DCD, remote & 2 != 0);
                signals.set(LineSignals::CTS, remote & 4 != 0);
                signals
            }
            other => other
                .byte_transport()
                .map_or(LineSignals::ALWAYS_ASSERTED, |t| t.line_status()),
        };

        let value_bits = CiaSerialBits::from_bits_retain(value);
        let mut bits = self.lines.bits;
        if self.config.modem_lines {
            update_line(&mut bits, CiaSerialBits::CD, signals.contains(LineSignals::DCD), "CD");
            update_line(&mut bits, CiaSerialBits::DSR, signals.contains(LineSignals::DSR), "DSR");
            update_line(&mut bits, CiaSerialBits::CTS, signals.contains(LineSignals::CTS), "CTS");
        }

        let ring = self.config.ring_indicator && signals.contains(LineSignals::RI);
        if self.config.printer_shares_sel || self.config.ring_indicator {
            bits.insert(CiaSerialBits::SEL);
            if ring {
                bits.remove(CiaSerialBits::SEL);
            }
        } else {
            bits.remove(CiaSerialBits::SEL);
            bits |= value_bits & CiaSerialBits::SEL;
        }

        bits &= CiaSerialBits::INPUTS;
        self.lines.bits = (self.lines.bits - CiaSerialBits::INPUTS) | bits;
        (value & 0xc3) | bits.bits()
    }

    /// CIA write of the serial control bits with data direction `dir`.
    pub fn write_status(&mut self, new_state: u8, dir: u8) -> u8 {
        let new_bits = CiaSerialBits::from_bits_truncate(new_state);
        let dir_bits = CiaSerialBits::from_bits_truncate(dir);
        let changed = self.lines.bits ^ new_bits;
        self.lines.written = new_bits & dir_bits;
        self.lines.direction = dir_bits;

        let modem = self.config.modem_lines;
        let dtr_changed = modem
            && changed.contains(CiaSerialBits::DTR)
            && dir_bits.contains(CiaSerialBits::DTR);
        let rts_changed = modem
            && !self.config.hw_flow_control
            && changed.contains(CiaSerialBits::RTS)
            && dir_bits.contains(CiaSerialBits::RTS);

        if dtr_changed {
            if new_bits.contains(CiaSerialBits::DTR) {
                self.dtr_off();
            } else {
                self.dtr_on();
            }
        }
        if rts_changed {
            self.lines.rts = !new_bits.contains(CiaSerialBits::RTS);
            log::debug!("SERIAL: RTS {}", if self.lines.rts { "set" } else { "cleared" });
            self.apply_line_status();
        }

        if self.lines.warnings_left > 0 {
            if changed.contains(CiaSerialBits::RTS) && !dir_bits.contains(CiaSerialBits::RTS) {
                log::warn!("SERIAL: program tries to use RTS as an input");
                self.lines.warnings_left = self.lines.warnings_left.saturating_sub(1);
            }
            if changed.contains(CiaSerialBits::DTR) && !dir_bits.contains(CiaSerialBits::DTR) {
                log::warn!("SERIAL: program tries to use DTR as an input");
                self.lines.warnings_left = self.lines.warnings_left.saturating_sub(1);
            }
        }

        if dtr_changed || rts_changed {
            let mut word = CONTROL_LINES;
            if self.lines.asserted(CiaSerialBits::DTR) {
                word |= 1 | 2;
            }
            if self.lines.asserted(CiaSerialBits::RTS) {
                word |= 4;
            }
            if let TransportSession::SharedMemoryIpc(t) = &mut self.transport {
                t.send(word);
            }
        }

        self.lines.bits =
            (self.lines.bits - CiaSerialBits::OUTPUTS) | (new_bits & CiaSerialBits::OUTPUTS);
        self.lines.bits.bits()
    }

    fn dtr_on(&mut self) {
        log::debug!("SERIAL: DTR on");
        self.lines.dtr = true;
        if self.config.open_on_demand && !self.open {
            self.open_configured();
        }
        self.apply_line_status();
    }

    fn dtr_off(&mut self) {
        log::debug!("SERIAL: DTR off");
        self.lines.dtr = false;
        self.apply_line_status();
        if self.config.open_on_demand {
            self.close();
        }
    }

    fn apply_line_status(&mut self) {
        let (dtr, rts) = (self.lines.dtr, self.lines.rts);
        if let Some(t) = self.transport.byte_transport() {
            t.set_line_status(dtr, rts);
        }
    }

    /// Start or end a break on the transmit line.
    pub fn set_break(&mut self, on: bool) {
        self.tx.break_active = on;
        match &mut self.transport {
            TransportSession::SharedMemoryIpc(t) => {
                t.send(CONTROL_BREAK | if on { BREAK_ON } else { BREAK_OFF });
            }
            other => {
                if let Some(t) = other.byte_transport() {
                    t.set_break(on);
                }
            }
        }
    }
}
