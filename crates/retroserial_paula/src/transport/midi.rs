use super::{ByteTransport, ReadAvailability};

/// Baud rate that switches the serial port over to MIDI.
pub const MIDI_BAUD: u32 = 31400;

/// A host MIDI port pair.
pub trait MidiPort {
    fn send_byte(&mut self, byte: u8);
    fn recv_byte(&mut self) -> Option<u8>;
    fn has_byte(&mut self) -> bool;
}

/// MIDI backend. The port only carries data while the program has the UART
/// clocked at the MIDI rate; at any other speed output is dropped.
pub struct MidiTransport {
    port: Box<dyn MidiPort>,
    active: bool,
}

impl MidiTransport {
    pub fn new(port: Box<dyn MidiPort>) -> Self {
        Self {
            port,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_requested_baud(&mut self, requested: u32) {
        let active = requested == MIDI_BAUD;
        if active != self.active {
            log::info!("MIDI: {}", if active { "activated" } else { "deactivated" });
        }
        self.active = active;
    }
}

impl ByteTransport for MidiTransport {
    fn write_available(&mut self, _needed: usize) -> bool {
        true
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        for &b in bytes {
            self.port.send_byte(b);
        }
        bytes.len()
    }

    fn read_available(&mut self) -> ReadAvailability {
        ReadAvailability {
            bytes: usize::from(self.port.has_byte()),
            break_condition: false,
        }
    }

    fn read(&mut self, max_len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < max_len {
            match self.port.recv_byte() {
                Some(b) => out.push(b),
                None => break,
            }
        }
        out
    }

    fn flush(&mut self) {}

    fn is_available(&self) -> bool {
        true
    }
}
