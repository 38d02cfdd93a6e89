use retroserial_common::SerialConfig;

use super::{ByteTransport, LineSignals, ReadAvailability};
use crate::TransportError;

const WRITE_BUFFER_SIZE: usize = 100;
const READ_BUFFER_SIZE: usize = 100;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlowControl {
    None,
    RtsCts,
    DtrDsr,
}

/// Line settings applied when a physical port is opened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceSettings {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

impl DeviceSettings {
    pub fn from_config(config: &SerialConfig) -> Self {
        Self {
            baud: 9600,
            data_bits: 8,
            stop_bits: config.stop_bits,
            flow_control: if config.hw_flow_control {
                FlowControl::RtsCts
            } else {
                FlowControl::None
            },
        }
    }
}

/// A host serial port, as exposed by the platform's serial library.
pub trait SerialDevice {
    fn bytes_waiting(&mut self) -> Result<usize, TransportError>;
    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`.
    fn blocking_read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError>;
    fn nonblocking_write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;
    /// Discard both input and output buffers.
    fn flush(&mut self) -> Result<(), TransportError>;
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError>;
    fn set_flow_control(&mut self, flow: FlowControl) -> Result<(), TransportError>;
    fn signals(&mut self) -> Result<LineSignals, TransportError>;
    fn set_break(&mut self, on: bool) -> Result<(), TransportError>;
    /// Returns true once for every break seen on the input line.
    fn take_break_condition(&mut self) -> bool {
        false
    }
}

/// Buffered byte channel over a [`SerialDevice`].
pub struct DeviceTransport {
    name: String,
    device: Box<dyn SerialDevice>,
    output: Vec<u8>,
    input: Vec<u8>,
    input_pos: usize,
    read_timeout_ms: u32,
    dtr: bool,
    rts: bool,
    failed: bool,
}

impl DeviceTransport {
    pub fn new(name: &str, device: Box<dyn SerialDevice>, read_timeout_ms: u32) -> Self {
        Self {
            name: name.to_string(),
            device,
            output: Vec::with_capacity(WRITE_BUFFER_SIZE),
            input: Vec::with_capacity(READ_BUFFER_SIZE),
            input_pos: 0,
            read_timeout_ms,
            dtr: false,
            rts: false,
            failed: false,
        }
    }

    /// Log a device error. I/O errors take the port offline for the rest of
    /// the session.
    fn check<T>(&mut self, what: &str, result: Result<T, TransportError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                log::error!("SERIAL: {} on '{}' failed: {}", what, self.name, e);
                if matches!(e, TransportError::Io(_)) {
                    self.failed = true;
                }
                None
            }
        }
    }

    fn buffered_input(&self) -> usize {
        self.input.len() - self.input_pos
    }

    fn fill_input(&mut self) -> bool {
        self.input.clear();
        self.input_pos = 0;
        let waiting = self.device.bytes_waiting();
        let waiting = self.check("input poll", waiting).unwrap_or(0);
        if waiting == 0 {
            return false;
        }
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let len = waiting.min(READ_BUFFER_SIZE);
        let timeout = self.read_timeout_ms;
        let read = self.device.blocking_read(&mut buf[..len], timeout);
        let read = self.check("read", read).unwrap_or(0);
        self.input.extend_from_slice(&buf[..read]);
        read > 0
    }
}

impl ByteTransport for DeviceTransport {
    fn write_available(&mut self, needed: usize) -> bool {
        if self.failed {
            return true;
        }
        self.drain_output();
        self.output.len() + needed < WRITE_BUFFER_SIZE
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        // A dead port swallows output so the transmitter keeps cycling.
        if self.failed {
            return bytes.len();
        }
        for &b in bytes {
            if self.output.len() + 1 < WRITE_BUFFER_SIZE {
                self.output.push(b);
            } else {
                log::warn!("SERIAL: output buffer overflow, data will be lost");
                self.output.clear();
            }
        }
        self.drain_output();
        bytes.len()
    }

    fn read_available(&mut self) -> ReadAvailability {
        if self.failed {
            return ReadAvailability::default();
        }
        let buffered = self.buffered_input();
        if buffered > 0 {
            return ReadAvailability {
                bytes: buffered,
                break_condition: false,
            };
        }
        let break_condition = self.device.take_break_condition();
        let waiting = self.device.bytes_waiting();
        ReadAvailability {
            bytes: self.check("input poll", waiting).unwrap_or(0),
            break_condition,
        }
    }

    fn read(&mut self, max_len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max_len);
        while out.len() < max_len && !self.failed {
            if self.buffered_input() == 0 && !self.fill_input() {
                break;
            }
            let take = (max_len - out.len()).min(self.buffered_input());
            out.extend_from_slice(&self.input[self.input_pos..self.input_pos + take]);
            self.input_pos += take;
        }
        out
    }

    fn flush(&mut self) {
        self.input.clear();
        self.input_pos = 0;
        if !self.failed {
            let result = self.device.flush();
            self.check("flush", result);
        }
    }

    fn drain_output(&mut self) {
        if self.output.is_empty() || self.failed {
            return;
        }
        let written = self.device.nonblocking_write(&self.output);
        if let Some(n) = self.check("write", written) {
            self.output.drain(..n.min(self.output.len()));
        }
    }

    fn line_status(&mut self) -> LineSignals {
        if self.failed {
            return LineSignals::empty();
        }
        let signals = self.device.signals();
        self.check("signal read", signals).unwrap_or_default()
    }

    fn set_line_status(&mut self, dtr: bool, rts: bool) {
        if self.failed {
            return;
        }
        if dtr != self.dtr {
            self.dtr = dtr;
            let flow = if dtr {
                FlowControl::DtrDsr
            } else {
                FlowControl::None
            };
            let result = self.device.set_flow_control(flow);
            self.check("DTR change", result);
        }
        if rts != self.rts {
            self.rts = rts;
            let flow = if rts {
                FlowControl::RtsCts
            } else {
                FlowControl::None
            };
            let result = self.device.set_flow_control(flow);
            self.check("RTS change", result);
        }
    }

    fn set_baud(&mut self, baud: u32) -> Result<(), TransportError> {
        if self.failed {
            return Err(TransportError::NotConnected);
        }
        self.device.set_baud_rate(baud)
    }

    fn set_break(&mut self, on: bool) {
        if self.failed {
            return;
        }
        let result = self.device.set_break(on);
        self.check("break", result);
    }

    fn is_available(&self) -> bool {
        !self.failed
    }
}
