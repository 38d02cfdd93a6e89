//! Host serial ports, opened through the `serialport` crate.
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use retroserial_paula::transport::{
    DeviceProvider, DeviceSettings, FlowControl, LineSignals, SerialDevice,
};
use retroserial_paula::TransportError;
use serialport::{ClearBuffer, DataBits, StopBits};

#[derive(Default)]
pub struct HostSerialPorts;

impl DeviceProvider for HostSerialPorts {
    fn open_device(
        &mut self,
        name: &str,
        settings: &DeviceSettings,
    ) -> Result<Box<dyn SerialDevice>, TransportError> {
        let port = serialport::new(name, settings.baud)
            .data_bits(data_bits(settings.data_bits))
            .stop_bits(stop_bits(settings.stop_bits))
            .flow_control(flow_control(settings.flow_control))
            .timeout(Duration::ZERO)
            .open()
            .map_err(|e| TransportError::open_failed(name, e))?;
        log::info!("SERIAL: host port '{}' opened at {} baud", name, settings.baud);
        Ok(Box::new(HostSerialDevice {
            port,
            signals_missing: false,
        }))
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> StopBits {
    if bits >= 2 {
        StopBits::Two
    } else {
        StopBits::One
    }
}

/// DTR/DSR handshaking has no driver setting; DTR is driven by hand instead.
fn flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::RtsCts => serialport::FlowControl::Hardware,
        FlowControl::None | FlowControl::DtrDsr => serialport::FlowControl::None,
    }
}

fn device_error(e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::Io(_) | serialport::ErrorKind::NoDevice => {
            TransportError::Io(e.into())
        }
        _ => TransportError::Unsupported("serial port setting"),
    }
}

fn read_signals(port: &mut dyn serialport::SerialPort) -> serialport::Result<LineSignals> {
    let mut signals = LineSignals::empty();
    signals.set(LineSignals::CTS, port.read_clear_to_send()?);
    signals.set(LineSignals::DSR, port.read_data_set_ready()?);
    signals.set(LineSignals::DCD, port.read_carrier_detect()?);
    signals.set(LineSignals::RI, port.read_ring_indicator()?);
    Ok(signals)
}

fn would_block(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

struct HostSerialDevice {
    port: Box<dyn serialport::SerialPort>,
    /// The port cannot report modem lines (a pty, for one).
    signals_missing: bool,
}

impl SerialDevice for HostSerialDevice {
    fn bytes_waiting(&mut self) -> Result<usize, TransportError> {
        let waiting = self.port.bytes_to_read().map_err(device_error)?;
        Ok(waiting as usize)
    }

    fn blocking_read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError> {
        self.port
            .set_timeout(Duration::from_millis(u64::from(timeout_ms)))
            .map_err(device_error)?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if would_block(e.kind()) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn nonblocking_write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.port.set_timeout(Duration::ZERO).map_err(device_error)?;
        match self.port.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if would_block(e.kind()) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port.clear(ClearBuffer::All).map_err(device_error)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        self.port.set_baud_rate(baud).map_err(device_error)
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<(), TransportError> {
        self.port
            .set_flow_control(flow_control(flow))
            .map_err(device_error)?;
        self.port
            .write_data_terminal_ready(flow == FlowControl::DtrDsr)
            .map_err(device_error)
    }

    fn signals(&mut self) -> Result<LineSignals, TransportError> {
        if self.signals_missing {
            return Ok(LineSignals::ALWAYS_ASSERTED);
        }
        match read_signals(self.port.as_mut()) {
            Ok(signals) => Ok(signals),
            Err(e) => {
                log::debug!("SERIAL: modem lines unavailable, reporting asserted: {}", e);
                self.signals_missing = true;
                Ok(LineSignals::ALWAYS_ASSERTED)
            }
        }
    }

    fn set_break(&mut self, on: bool) -> Result<(), TransportError> {
        let result = if on {
            self.port.set_break()
        } else {
            self.port.clear_break()
        };
        result.map_err(device_error)
    }
}
