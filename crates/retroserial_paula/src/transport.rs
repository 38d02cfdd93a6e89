//! Host side of the serial port.
//!
//! Exactly one backend is alive per session. Byte oriented backends (real
//! device, TCP, MIDI) implement [`ByteTransport`]; the shared memory channel
//! and the network relay carry whole 16-bit serial words and are driven
//! directly by the engine.
use std::sync::Arc;

use bitflags::bitflags;
use retroserial_common::SerialConfig;

use crate::TransportError;

mod device;
mod midi;
mod relay;
mod shmem;
mod tcp;

pub use device::{DeviceSettings, DeviceTransport, FlowControl, SerialDevice};
pub use midi::{MidiPort, MidiTransport, MIDI_BAUD};
pub use relay::RelayTransport;
pub(crate) use shmem::{BREAK_OFF, BREAK_ON, CONTROL_BREAK, CONTROL_LINES};
pub use shmem::{SharedMemoryTransport, SharedSegment, SHARED_RING_SIZE, SHARED_SEGMENT_VERSION};
pub use tcp::TcpTransport;

/// Device name selecting the inter-process shared memory channel.
pub const INTERNAL_SERIAL: &str = "INTERNAL_SERIAL";
/// Device name selecting the internal TX -> RX loopback.
pub const LOOPBACK_SERIAL: &str = "LOOPBACK_SERIAL";

bitflags! {
    /// Modem status lines as reported by a backend. A set bit means the
    /// line is asserted.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct LineSignals: u8 {
        const DSR = 1 << 0;
        const DCD = 1 << 1;
        const CTS = 1 << 2;
        const RI = 1 << 3;
    }
}

impl LineSignals {
    /// What a backend without modem lines reports.
    pub const ALWAYS_ASSERTED: LineSignals = LineSignals::DSR
        .union(LineSignals::DCD)
        .union(LineSignals::CTS);
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadAvailability {
    pub bytes: usize,
    /// The backend saw a break since the last poll.
    pub break_condition: bool,
}

/// Uniform byte channel consumed by the transmit and receive pipelines.
pub trait ByteTransport {
    /// True when `needed` more bytes can be queued without blocking.
    fn write_available(&mut self, needed: usize) -> bool;
    /// Queue bytes for output, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> usize;
    fn read_available(&mut self) -> ReadAvailability;
    fn read(&mut self, max_len: usize) -> Vec<u8>;
    /// Discard pending input and output.
    fn flush(&mut self);
    /// Push any buffered output to the backend.
    fn drain_output(&mut self) {}
    fn line_status(&mut self) -> LineSignals {
        LineSignals::ALWAYS_ASSERTED
    }
    fn set_line_status(&mut self, _dtr: bool, _rts: bool) {}
    fn set_baud(&mut self, _baud: u32) -> Result<(), TransportError> {
        Ok(())
    }
    fn set_break(&mut self, _on: bool) {}
    fn is_available(&self) -> bool;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportKind {
    None,
    RealDevice,
    TcpSocket,
    Loopback,
    SharedMemoryIpc,
    NetworkRelay,
    Midi,
}

impl TransportKind {
    /// Map a configured device name onto a backend kind.
    pub fn select(name: &str, has_midi: bool) -> TransportKind {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("enet:") {
            TransportKind::NetworkRelay
        } else if name.eq_ignore_ascii_case(INTERNAL_SERIAL) {
            TransportKind::SharedMemoryIpc
        } else if name.eq_ignore_ascii_case(LOOPBACK_SERIAL) {
            TransportKind::Loopback
        } else if name.is_empty() {
            if has_midi {
                TransportKind::Midi
            } else {
                TransportKind::None
            }
        } else if lower.starts_with("tcp:") {
            TransportKind::TcpSocket
        } else {
            TransportKind::RealDevice
        }
    }
}

/// Opens the host resources that this crate does not own itself: physical
/// serial ports, MIDI ports and the shared memory segment.
///
/// Every method has a default that reports the backend as unsupported, so a
/// host only implements what its platform offers.
pub trait DeviceProvider {
    fn open_device(
        &mut self,
        name: &str,
        _settings: &DeviceSettings,
    ) -> Result<Box<dyn SerialDevice>, TransportError> {
        Err(TransportError::open_failed(name, "no serial device support"))
    }

    fn open_midi(
        &mut self,
        _out_device: &str,
        _in_device: &str,
    ) -> Result<Box<dyn MidiPort>, TransportError> {
        Err(TransportError::Unsupported("MIDI"))
    }

    /// The segment shared with the peer emulator process.
    fn shared_segment(&mut self) -> Result<Arc<SharedSegment>, TransportError> {
        Ok(Arc::new(SharedSegment::new()))
    }
}

/// Provider for hosts with no physical ports.
#[derive(Default)]
pub struct NoDevices;

impl DeviceProvider for NoDevices {}

/// The active backend of a session.
#[derive(Default)]
pub enum TransportSession {
    #[default]
    None,
    RealDevice(DeviceTransport),
    TcpSocket(TcpTransport),
    Loopback,
    SharedMemoryIpc(SharedMemoryTransport),
    NetworkRelay(RelayTransport),
    Midi(MidiTransport),
}

impl TransportSession {
    pub fn open(
        kind: TransportKind,
        config: &SerialConfig,
        provider: &mut dyn DeviceProvider,
    ) -> Result<TransportSession, TransportError> {
        let name = config.device_name.as_str();
        let session = match kind {
            TransportKind::None => TransportSession::None,
            TransportKind::Loopback => TransportSession::Loopback,
            TransportKind::RealDevice => {
                let settings = DeviceSettings::from_config(config);
                let device = provider.open_device(name, &settings)?;
                TransportSession::RealDevice(DeviceTransport::new(
                    name,
                    device,
                    config.read_timeout_ms,
                ))
            }
            TransportKind::TcpSocket => TransportSession::TcpSocket(TcpTransport::open(name)?),
            TransportKind::SharedMemoryIpc => {
                let segment = provider.shared_segment()?;
                TransportSession::SharedMemoryIpc(SharedMemoryTransport::attach(segment)?)
            }
            TransportKind::NetworkRelay => {
                TransportSession::NetworkRelay(RelayTransport::open(name)?)
            }
            TransportKind::Midi => {
                let port = provider.open_midi(&config.midi_out_device, &config.midi_in_device)?;
                TransportSession::Midi(MidiTransport::new(port))
            }
        };
        Ok(session)
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSession::None => TransportKind::None,
            TransportSession::RealDevice(_) => TransportKind::RealDevice,
            TransportSession::TcpSocket(_) => TransportKind::TcpSocket,
            TransportSession::Loopback => TransportKind::Loopback,
            TransportSession::SharedMemoryIpc(_) => TransportKind::SharedMemoryIpc,
            TransportSession::NetworkRelay(_) => TransportKind::NetworkRelay,
            TransportSession::Midi(_) => TransportKind::Midi,
        }
    }

    /// The byte channel, if the active backend is byte oriented and live.
    pub fn byte_transport(&mut self) -> Option<&mut dyn ByteTransport> {
        match self {
            TransportSession::RealDevice(t) => Some(t),
            TransportSession::TcpSocket(t) => Some(t),
            TransportSession::Midi(t) if t.is_active() => Some(t),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            TransportSession::None => false,
            TransportSession::Loopback => true,
            TransportSession::RealDevice(t) => t.is_available(),
            TransportSession::TcpSocket(t) => t.is_available(),
            TransportSession::SharedMemoryIpc(_) => true,
            TransportSession::NetworkRelay(_) => true,
            TransportSession::Midi(t) => t.is_available(),
        }
    }

    /// Apply a new line speed. `requested` is the table rate before 9-bit
    /// doubling, which is what selects the MIDI clock.
    pub fn set_baud(&mut self, baud: u32, requested: u32) {
        if let TransportSession::Midi(t) = self {
            t.set_requested_baud(requested);
            return;
        }
        if let Some(t) = self.byte_transport() {
            if let Err(e) = t.set_baud(baud) {
                log::error!("SERIAL: failed to set baud rate {}: {}", baud, e);
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(t) = self.byte_transport() {
            t.flush();
        }
    }

    pub fn close(&mut self) {
        match std::mem::take(self) {
            TransportSession::SharedMemoryIpc(mut t) => t.deactivate(),
            TransportSession::TcpSocket(mut t) => t.close(),
            TransportSession::RealDevice(mut t) => t.drain_output(),
            _ => {}
        }
    }
}
