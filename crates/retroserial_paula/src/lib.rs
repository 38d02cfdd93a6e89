//! Amiga Paula serial port emulation.
//!
//! [`SerialPort`] models the SERPER/SERDAT/SERDATR registers and the modem
//! control lines on the CIA, and connects them to one host backend chosen
//! from the configured device name: a physical port, a TCP socket, MIDI, a
//! UDP relay, shared memory with a second emulator, or an internal loopback.
pub mod error;
pub mod serial;
pub mod transport;

pub use error::TransportError;
pub use retroserial_common as common;
pub use serial::{
    resolve_baud, CiaSerialBits, ScheduledEvent, Serdatr, SerialEvent, SerialHost,
    SerialPeripheral, SerialPort, ShiftState,
};
pub use transport::{DeviceProvider, NoDevices, TransportKind};
