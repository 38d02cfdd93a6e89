//! Paula UART.
//!
//! One [`SerialPort`] owns the whole state of the serial port of one
//! emulated machine: the period register, the transmit holding and shift
//! registers, the receive register and the modem control lines, plus the
//! host backend they talk to. Time only advances through register accesses,
//! the once-per-scanline [`SerialPort::tick_line`] and events the port
//! scheduled earlier with the host.
use retroserial_common::{BeamTiming, InterruptController, Scheduler, SerialConfig};

use crate::transport::{DeviceProvider, NoDevices, TransportKind, TransportSession};

mod baud;
mod control;
mod events;
mod receive;
mod status;
mod tick;
mod transmit;

#[cfg(test)]
mod tests;

pub use baud::{resolve_baud, BAUD_RATES, PAULA_CLOCK};
pub use events::{ScheduledEvent, SerialEvent};
pub use status::{CiaSerialBits, Serdatr};
pub use transmit::ShiftState;

use baud::BaudClock;
use control::ControlLines;
use receive::Receiver;
use transmit::Transmitter;

/// Everything the port needs from the emulated machine.
pub trait SerialHost: Scheduler<ScheduledEvent> + InterruptController + BeamTiming {}

impl<T> SerialHost for T where T: Scheduler<ScheduledEvent> + InterruptController + BeamTiming {}

/// A device emulated inside the host and wired to the serial pins, such as
/// a touch screen or a laserdisc player.
pub trait SerialPeripheral {
    /// Called with every word that enters the shift register.
    fn transmit(&mut self, word: u16);
    /// Polled once per scanline while the receiver can take a byte.
    fn poll_receive(&mut self) -> Option<u8>;
}

pub struct SerialPort {
    config: SerialConfig,
    provider: Box<dyn DeviceProvider>,
    transport: TransportSession,
    peripheral: Option<Box<dyn SerialPeripheral>>,
    /// Bumped on every open and close so that events scheduled by an
    /// earlier session are recognised as stale.
    generation: u32,
    open: bool,
    accurate: bool,
    /// Never overwrite an unread receive register.
    safe_receive: bool,
    clock: BaudClock,
    tx: Transmitter,
    rx: Receiver,
    lines: ControlLines,
}

impl SerialPort {
    pub fn new(config: SerialConfig) -> Self {
        Self::with_provider(config, Box::new(NoDevices))
    }

    pub fn with_provider(config: SerialConfig, provider: Box<dyn DeviceProvider>) -> Self {
        Self {
            config,
            provider,
            transport: TransportSession::None,
            peripheral: None,
            generation: 0,
            open: false,
            accurate: false,
            safe_receive: false,
            clock: BaudClock::default(),
            tx: Transmitter::default(),
            rx: Receiver::default(),
            lines: ControlLines::default(),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Power-on: open the configured device unless it is opened on demand.
    pub fn init(&mut self) {
        if !self.config.open_on_demand {
            self.open_configured();
        }
    }

    /// Switch to device `name` and open it.
    pub fn open(&mut self, name: &str) -> bool {
        if self.open {
            self.close();
        }
        self.config.device_name = name.to_string();
        self.open_configured()
    }

    /// Open the device named in the configuration. A device that fails to
    /// open leaves the port unconnected; the registers keep working.
    pub fn open_configured(&mut self) -> bool {
        if self.open {
            return true;
        }
        self.generation = self.generation.wrapping_add(1);
        self.clock = BaudClock::default();

        let kind = TransportKind::select(&self.config.device_name, self.config.has_midi());
        match TransportSession::open(kind, &self.config, self.provider.as_mut()) {
            Ok(session) => self.transport = session,
            Err(e) => {
                log::error!(
                    "SERIAL: could not open device '{}': {}",
                    self.config.device_name,
                    e
                );
                self.transport = TransportSession::None;
                return false;
            }
        }
        self.accurate = self.config.cycle_exact;
        self.open = true;
        log::info!(
            "SERIAL: opened '{}' ({:?}{})",
            self.config.device_name,
            kind,
            if self.accurate { ", cycle exact" } else { "" }
        );
        true
    }

    /// Tear down the backend and reset all UART state. Events still queued
    /// with the host become no-ops.
    pub fn close(&mut self) {
        if self.open {
            log::info!("SERIAL: closed '{}'", self.config.device_name);
        }
        self.transport.close();
        self.generation = self.generation.wrapping_add(1);
        self.open = false;
        self.accurate = false;
        self.safe_receive = false;
        self.clock = BaudClock::default();
        self.tx = Transmitter::default();
        self.rx = Receiver::default();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_available(&self) -> bool {
        self.open && self.transport.is_available()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Wire an emulated device to the serial pins.
    pub fn attach_peripheral(&mut self, peripheral: Box<dyn SerialPeripheral>) {
        self.peripheral = Some(peripheral);
    }

    pub fn detach_peripheral(&mut self) -> Option<Box<dyn SerialPeripheral>> {
        self.peripheral.take()
    }

    pub fn period(&self) -> u16 {
        self.clock.period
    }

    /// Table rate selected by the period register.
    pub fn baud(&self) -> u32 {
        self.clock.baud
    }

    /// Rate applied to the backend after 9-bit and direct mode adjustments.
    pub fn applied_baud(&self) -> u32 {
        self.clock.applied_baud
    }

    pub fn transmit_period(&self) -> u32 {
        self.clock.tx_period
    }

    pub fn receive_period(&self) -> u32 {
        self.clock.rx_period
    }

    pub fn shift_state(&self) -> ShiftState {
        self.tx.state
    }

    pub fn overrun(&self) -> bool {
        self.rx.overrun
    }

    /// True while a break is being received.
    pub fn break_active(&self) -> bool {
        self.rx.break_counter > 0
    }

    pub fn queued_words(&self) -> usize {
        self.rx.queue.len()
    }

    fn is_loopback(&self) -> bool {
        self.transport.kind() == TransportKind::Loopback
    }

    fn is_unconnected(&self) -> bool {
        self.transport.kind() == TransportKind::None
    }

    /// Shared memory peers and emulated devices cannot be throttled, so
    /// their words are queued rather than dropped.
    fn is_external_device(&self) -> bool {
        self.transport.kind() == TransportKind::SharedMemoryIpc || self.peripheral.is_some()
    }
}
