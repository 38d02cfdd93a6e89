use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use retroserial_common::{
    BeamTiming, EventQueue, Interrupt, InterruptController, SchedulePolicy, Scheduler,
    SerialConfig,
};

use super::*;
use crate::transport::{
    DeviceProvider, DeviceSettings, FlowControl, LineSignals, MidiPort, SerialDevice,
    SharedSegment, INTERNAL_SERIAL, LOOPBACK_SERIAL,
};
use crate::TransportError;

const LINE: u32 = 227;
const FRAME: u32 = 10;

const RBF: u16 = Serdatr::RBF.bits();
const TBE: u16 = Serdatr::TBE.bits();
const TSRE: u16 = Serdatr::TSRE.bits();
const RXD: u16 = Serdatr::RXD.bits();
const OVRUN: u16 = Serdatr::OVRUN.bits();

/// Minimal machine: a cycle counter, INTREQ/INTENA and an event queue.
struct TestHost {
    now: u64,
    events: EventQueue<ScheduledEvent>,
    intreq: u16,
    intena: u16,
    delayed: Vec<(u64, Interrupt)>,
}

impl TestHost {
    fn new() -> Self {
        Self {
            now: 0,
            events: EventQueue::new(),
            intreq: 0,
            intena: 0,
            delayed: Vec::new(),
        }
    }

    fn deliver_interrupts(&mut self) {
        let now = self.now;
        let mut raised = 0;
        self.delayed.retain(|&(at, irq)| {
            if at <= now {
                raised |= irq.mask();
                false
            } else {
                true
            }
        });
        self.intreq |= raised;
    }

    /// Run every event due up to `target`, then move the clock there.
    fn advance_to(&mut self, port: &mut SerialPort, target: u64) {
        while let Some(at) = self.events.next_due().filter(|&at| at <= target) {
            self.now = self.now.max(at);
            self.deliver_interrupts();
            if let Some(event) = self.events.pop_due(self.now) {
                port.handle_event(self, event);
            }
        }
        self.now = self.now.max(target);
        self.deliver_interrupts();
    }

    fn run_due(&mut self, port: &mut SerialPort) {
        let now = self.now;
        self.advance_to(port, now);
    }

    fn run_lines(&mut self, port: &mut SerialPort, lines: usize) {
        for _ in 0..lines {
            let target = self.now + u64::from(LINE);
            self.advance_to(port, target);
            port.tick_line(self);
        }
    }

    fn acknowledge(&mut self, irq: Interrupt) {
        self.intreq &= !irq.mask();
    }
}

impl Scheduler<ScheduledEvent> for TestHost {
    fn now(&self) -> u64 {
        self.now
    }

    fn schedule(&mut self, delay: u64, event: ScheduledEvent, policy: SchedulePolicy) {
        self.events.schedule_at(self.now + delay, event, policy);
    }
}

impl InterruptController for TestHost {
    fn request_interrupt(&mut self, irq: Interrupt, delay: u32) {
        if delay == 0 {
            self.intreq |= irq.mask();
        } else {
            self.delayed.push((self.now + u64::from(delay), irq));
        }
    }

    fn clear_interrupt(&mut self, irq: Interrupt) {
        self.intreq &= !irq.mask();
    }

    fn interrupt_pending(&self, irq: Interrupt) -> bool {
        self.intreq & irq.mask() != 0
    }

    fn interrupt_enabled(&self, irq: Interrupt) -> bool {
        self.intena & irq.mask() != 0 && self.intena & 0x4000 != 0
    }
}

impl BeamTiming for TestHost {
    fn line_cycles(&self) -> u32 {
        LINE
    }

    fn frame_lines(&self) -> u32 {
        FRAME
    }
}

#[derive(Default)]
struct DeviceState {
    input: VecDeque<u8>,
    output: Vec<u8>,
    /// Bytes accepted per write, unlimited if `None`.
    write_room: Option<usize>,
    break_pending: bool,
    signals: LineSignals,
    baud_changes: Vec<u32>,
    flow: Vec<FlowControl>,
    flushes: usize,
    /// The device has gone away; I/O calls fail.
    unplugged: bool,
}

fn unplugged() -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "device unplugged",
    ))
}

type SharedDevice = Rc<RefCell<DeviceState>>;

struct MockDevice(SharedDevice);

impl SerialDevice for MockDevice {
    fn bytes_waiting(&mut self) -> Result<usize, TransportError> {
        let state = self.0.borrow();
        if state.unplugged {
            return Err(unplugged());
        }
        Ok(state.input.len())
    }

    fn blocking_read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, TransportError> {
        let mut state = self.0.borrow_mut();
        let n = buf.len().min(state.input.len());
        for (dst, src) in buf.iter_mut().zip(state.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn nonblocking_write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.0.borrow_mut();
        if state.unplugged {
            return Err(unplugged());
        }
        let n = state.write_room.map_or(buf.len(), |room| room.min(buf.len()));
        state.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let mut state = self.0.borrow_mut();
        state.input.clear();
        state.flushes += 1;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        self.0.borrow_mut().baud_changes.push(baud);
        Ok(())
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<(), TransportError> {
        self.0.borrow_mut().flow.push(flow);
        Ok(())
    }

    fn signals(&mut self) -> Result<LineSignals, TransportError> {
        Ok(self.0.borrow().signals)
    }

    fn set_break(&mut self, _on: bool) -> Result<(), TransportError> {
        Ok(())
    }

    fn take_break_condition(&mut self) -> bool {
        std::mem::take(&mut self.0.borrow_mut().break_pending)
    }
}

struct MockProvider(SharedDevice);

impl DeviceProvider for MockProvider {
    fn open_device(
        &mut self,
        _name: &str,
        _settings: &DeviceSettings,
    ) -> Result<Box<dyn SerialDevice>, TransportError> {
        Ok(Box::new(MockDevice(self.0.clone())))
    }
}

struct MidiProvider(Rc<RefCell<Vec<u8>>>);

struct RecordingMidi(Rc<RefCell<Vec<u8>>>);

impl MidiPort for RecordingMidi {
    fn send_byte(&mut self, byte: u8) {
        self.0.borrow_mut().push(byte);
    }

    fn recv_byte(&mut self) -> Option<u8> {
        None
    }

    fn has_byte(&mut self) -> bool {
        false
    }
}

impl DeviceProvider for MidiProvider {
    fn open_midi(
        &mut self,
        _out_device: &str,
        _in_device: &str,
    ) -> Result<Box<dyn MidiPort>, TransportError> {
        Ok(Box::new(RecordingMidi(self.0.clone())))
    }
}

struct SegmentProvider(Arc<SharedSegment>);

impl DeviceProvider for SegmentProvider {
    fn shared_segment(&mut self) -> Result<Arc<SharedSegment>, TransportError> {
        Ok(self.0.clone())
    }
}

struct Touchscreen {
    sent: Rc<RefCell<Vec<u16>>>,
    reply: Option<u8>,
}

impl SerialPeripheral for Touchscreen {
    fn transmit(&mut self, word: u16) {
        self.sent.borrow_mut().push(word);
    }

    fn poll_receive(&mut self) -> Option<u8> {
        self.reply.take()
    }
}

fn device_config() -> SerialConfig {
    SerialConfig::builder().device_name("/dev/ttyS0").build()
}

fn device_port(config: SerialConfig) -> (SerialPort, SharedDevice) {
    let state = SharedDevice::default();
    let mut port = SerialPort::with_provider(config, Box::new(MockProvider(state.clone())));
    assert!(port.open_configured());
    (port, state)
}

fn loopback_port(cycle_exact: bool) -> SerialPort {
    let config = SerialConfig::builder()
        .device_name(LOOPBACK_SERIAL)
        .cycle_exact(cycle_exact)
        .build();
    let mut port = SerialPort::new(config);
    port.init();
    assert_eq!(port.transport_kind(), TransportKind::Loopback);
    port
}

/// Tick line by line, reading SERDATR after each, and collect the words
/// that arrived with RBF set.
fn collect_words(host: &mut TestHost, port: &mut SerialPort, lines: usize) -> Vec<u16> {
    let mut words = Vec::new();
    for _ in 0..lines {
        host.run_lines(port, 1);
        let value = port.read_data(host);
        if value & RBF != 0 {
            words.push(value & Serdatr::WORD_MASK);
        }
    }
    words
}

#[test]
fn zero_period_falls_back_to_lowest_rate() {
    assert_eq!(resolve_baud(0x0000), 110);
    assert_eq!(resolve_baud(0x8000), 110);
    assert_eq!(resolve_baud(0x0001), 110);
}

#[test]
fn period_368_is_9600_baud() {
    assert_eq!(resolve_baud(368), 9600);

    let mut host = TestHost::new();
    let mut port = loopback_port(false);
    port.write_period(&mut host, 368);
    assert_eq!(port.baud(), 9600);
    assert_eq!(port.applied_baud(), 9600);
    assert_eq!(port.transmit_period(), 369 * 10);
    assert_eq!(port.receive_period(), 369 * 10 / 4);
}

#[test]
fn ninebit_mode_doubles_applied_rate() {
    let mut host = TestHost::new();
    let mut port = loopback_port(false);
    port.write_period(&mut host, 0x8000 | 368);
    assert_eq!(port.baud(), 9600);
    assert_eq!(port.applied_baud(), 19200);
    assert_eq!(port.transmit_period(), 369 * 11);
}

#[test]
fn receive_period_is_at_least_one_line() {
    let mut host = TestHost::new();
    let mut port = loopback_port(false);
    port.write_period(&mut host, 10);
    assert_eq!(port.transmit_period(), 110);
    assert_eq!(port.receive_period(), LINE);
}

#[test]
fn direct_mode_raises_rate_and_runs_every_line() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder().direct(true).build();
    let mut port = SerialPort::new(config);
    port.init();

    port.write_period(&mut host, 368);
    assert_eq!(port.applied_baud(), 115200);
    assert_eq!(port.transmit_period(), LINE);
    assert_eq!(port.receive_period(), LINE);

    // The MIDI clock is left alone.
    port.write_period(&mut host, 111);
    assert_eq!(port.baud(), 31400);
    assert_eq!(port.applied_baud(), 31400);
}

#[test]
fn rewriting_same_period_is_a_noop() {
    let mut host = TestHost::new();
    let (mut port, device) = device_port(device_config());

    port.write_period(&mut host, 368);
    port.write_period(&mut host, 368);
    assert_eq!(device.borrow().baud_changes, vec![9600]);

    port.write_period(&mut host, 0x8000 | 368);
    assert_eq!(device.borrow().baud_changes, vec![9600, 19200]);
}

#[test]
fn loopback_word_arrives_after_frame_and_propagation_delay() {
    let mut host = TestHost::new();
    let mut port = loopback_port(true);
    port.write_period(&mut host, 368);

    port.write_data(&mut host, 0x0141);
    host.advance_to(&mut port, 1);
    assert_eq!(port.shift_state(), ShiftState::Loaded);

    // RXD follows TXD: start bit low, then data bit 0 (1), data bit 1 (0).
    host.advance_to(&mut port, 1 + 10);
    assert_eq!(port.read_data(&mut host) & RXD, 0);
    host.advance_to(&mut port, 1 + 369 + 10);
    assert_ne!(port.read_data(&mut host) & RXD, 0);
    host.advance_to(&mut port, 1 + 2 * 369 + 10);
    assert_eq!(port.read_data(&mut host) & RXD, 0);

    // Loaded at cycle 1, sampled in the middle of the stop bit.
    let arrival = 1 + 369 * 9 + 184 + 3;
    host.advance_to(&mut port, arrival - 1);
    assert_eq!(port.read_data(&mut host) & RBF, 0);
    host.advance_to(&mut port, arrival);
    let value = port.read_data(&mut host);
    assert_ne!(value & RBF, 0);
    assert_eq!(value & Serdatr::WORD_MASK, 0x0141);

    // The transmitter itself still finishes on the scheduled frame boundary.
    let frame_end = 1 + 369 * 10 + 3;
    host.advance_to(&mut port, frame_end - 1);
    assert_eq!(port.read_data(&mut host) & TSRE, 0);
    host.advance_to(&mut port, frame_end + 1);
    assert_eq!(port.shift_state(), ShiftState::Empty);
    assert_ne!(port.read_data(&mut host) & TSRE, 0);
}

#[test]
fn loopback_without_cycle_exact_echoes_immediately() {
    let mut host = TestHost::new();
    let mut port = loopback_port(false);
    port.write_period(&mut host, 10);

    port.write_data(&mut host, 0x0141);
    host.run_due(&mut port);
    assert_eq!(port.read_data(&mut host), 0x0141 | RBF | TBE | TSRE | RXD);
    assert!(host.interrupt_pending(Interrupt::ReceiveBufferFull));
}

#[test]
fn unread_word_overruns_after_200_lines() {
    let mut host = TestHost::new();
    let (mut port, device) = device_port(device_config());
    port.write_period(&mut host, 10);
    device.borrow_mut().input.extend(b"0123456789");

    host.run_lines(&mut port, 150);
    assert!(!port.overrun());

    host.run_lines(&mut port, 100);
    assert!(port.overrun());
    assert!(device.borrow().flushes > 0);
    assert_ne!(port.read_data(&mut host) & OVRUN, 0);

    port.rbf_interrupt_changed(false);
    assert_eq!(port.read_data(&mut host) & OVRUN, 0);
}

#[test]
fn cycle_exact_mode_never_overruns() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder()
        .device_name("/dev/ttyS0")
        .cycle_exact(true)
        .build();
    let (mut port, device) = device_port(config);
    port.write_period(&mut host, 10);
    device.borrow_mut().input.extend([b'x'; 300]);

    host.run_lines(&mut port, 260);
    assert!(!port.overrun());
}

#[test]
fn device_break_is_held_then_ends_with_stop_bit() {
    let mut host = TestHost::new();
    let (mut port, device) = device_port(device_config());
    port.write_period(&mut host, 10);
    device.borrow_mut().break_pending = true;

    collect_words(&mut host, &mut port, 20);
    assert!(port.break_active());
    assert_eq!(port.read_data(&mut host) & RXD, 0);

    let words = collect_words(&mut host, &mut port, 20 * FRAME as usize + 20);
    assert!(words.contains(&0x0000));
    assert_eq!(words.last(), Some(&0x0100));
    assert!(!port.break_active());
    assert_ne!(port.read_data(&mut host) & RXD, 0);
}

#[test]
fn loopback_break_reaches_own_receiver() {
    let mut host = TestHost::new();
    let mut port = loopback_port(false);
    port.write_period(&mut host, 10);

    port.set_break(true);
    let words = collect_words(&mut host, &mut port, 10);
    assert!(words.iter().all(|&w| w == 0));
    assert!(!words.is_empty());
    assert!(port.break_active());
    assert_eq!(port.read_data(&mut host) & RXD, 0);

    port.set_break(false);
    let words = collect_words(&mut host, &mut port, 2 * FRAME as usize);
    assert_eq!(words.last(), Some(&0x0100));
    assert!(!port.break_active());
    assert_ne!(port.read_data(&mut host) & RXD, 0);
}

#[test]
fn period_change_mid_frame_keeps_elapsed_bits() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder().cycle_exact(true).build();
    let mut port = SerialPort::new(config);
    port.init();
    assert_eq!(port.transport_kind(), TransportKind::None);
    port.write_period(&mut host, 368);

    port.write_data(&mut host, 0x0141);
    host.advance_to(&mut port, 1);
    // Three bits and 100 cycles of the fourth have gone out.
    let change = 1 + 3 * 369 + 100;
    host.advance_to(&mut port, change);
    port.write_period(&mut host, 100);

    // The rest of bit three at the old rate, six whole bits at the new one.
    let end = change + (369 - 100) + 6 * 101;
    host.advance_to(&mut port, end - 1);
    assert_eq!(port.shift_state(), ShiftState::Loaded);
    host.advance_to(&mut port, end);
    assert_eq!(port.shift_state(), ShiftState::Empty);
    host.advance_to(&mut port, end + 1);
    assert_ne!(port.read_data(&mut host) & TSRE, 0);
}

#[test]
fn unconnected_frame_length_ignores_line_ticks() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder().cycle_exact(true).build();
    let mut port = SerialPort::new(config);
    port.init();
    port.write_period(&mut host, 368);
    host.run_lines(&mut port, 10);

    for word in [0x0141, 0x0142] {
        let end = host.now + 1 + 3690;
        port.write_data(&mut host, word);
        for _ in 0..20 {
            host.run_lines(&mut port, 1);
            if host.now < end {
                assert_eq!(port.shift_state(), ShiftState::Loaded, "cycle {}", host.now);
            } else {
                assert_eq!(port.shift_state(), ShiftState::Empty, "cycle {}", host.now);
            }
        }
    }
}

#[test]
fn period_change_mid_frame_holds_while_lines_tick() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder().cycle_exact(true).build();
    let mut port = SerialPort::new(config);
    port.init();
    port.write_period(&mut host, 368);

    port.write_data(&mut host, 0x0141);
    host.advance_to(&mut port, 1);
    // Five lines in: bit 3 has had 1135 - 3 * 369 = 28 cycles.
    host.run_lines(&mut port, 5);
    let change = host.now;
    port.write_period(&mut host, 100);

    let end = change + (369 - 28) + 6 * 101;
    while host.now + u64::from(LINE) < end {
        host.run_lines(&mut port, 1);
        assert_eq!(port.shift_state(), ShiftState::Loaded, "cycle {}", host.now);
    }
    host.advance_to(&mut port, end);
    assert_eq!(port.shift_state(), ShiftState::Empty);
}

#[test]
fn first_period_write_starts_from_empty_accumulators() {
    let mut host = TestHost::new();
    let (mut port, device) = device_port(device_config());
    host.run_lines(&mut port, 50);

    port.write_period(&mut host, 368);
    device.borrow_mut().input.push_back(b'A');
    host.run_lines(&mut port, 1);
    assert_eq!(port.read_data(&mut host) & RBF, 0);

    let words = collect_words(&mut host, &mut port, 5);
    assert_eq!(words, vec![0x0100 | u16::from(b'A')]);
}

#[test]
fn unplugged_device_goes_quiet_without_stopping_the_port() {
    let mut host = TestHost::new();
    let (mut port, device) = device_port(device_config());
    port.write_period(&mut host, 10);
    assert!(port.is_available());

    device.borrow_mut().unplugged = true;
    port.write_data(&mut host, 0x0141);
    assert!(!port.is_available());

    device.borrow_mut().input.extend(b"lost");
    for word in [0x0142, 0x0143] {
        port.write_data(&mut host, word);
        host.run_lines(&mut port, 2);
        assert_eq!(port.shift_state(), ShiftState::Empty);
        let value = port.read_data(&mut host);
        assert_eq!(value & (TBE | TSRE | RBF), TBE | TSRE);
    }
    assert!(!host.interrupt_pending(Interrupt::ReceiveBufferFull));
    assert!(device.borrow().output.is_empty());
}

#[test]
fn failing_input_poll_marks_device_unavailable() {
    let mut host = TestHost::new();
    let (mut port, device) = device_port(device_config());
    port.write_period(&mut host, 10);

    device.borrow_mut().unplugged = true;
    host.run_lines(&mut port, 3);
    assert!(!port.is_available());
    assert!(!host.interrupt_pending(Interrupt::ReceiveBufferFull));
    assert_eq!(port.read_data(&mut host) & RBF, 0);
}

#[test]
fn cycle_exact_device_transmit_drains_after_frame() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder()
        .device_name("/dev/ttyS0")
        .cycle_exact(true)
        .build();
    let (mut port, device) = device_port(config);
    port.write_period(&mut host, 368);

    port.write_data(&mut host, 0x0141);
    host.advance_to(&mut port, 1);
    assert_eq!(device.borrow().output, b"A");
    assert_eq!(port.shift_state(), ShiftState::Draining);
    assert!(!host.interrupt_pending(Interrupt::TransmitBufferEmpty));

    host.advance_to(&mut port, 2);
    assert!(host.interrupt_pending(Interrupt::TransmitBufferEmpty));
    host.advance_to(&mut port, 1 + 3690 - 1);
    assert_eq!(port.shift_state(), ShiftState::Draining);
    host.advance_to(&mut port, 1 + 3690);
    assert_eq!(port.shift_state(), ShiftState::Empty);
}

#[test]
fn ninebit_frames_use_sync_prefix() {
    let mut host = TestHost::new();
    let (mut port, device) = device_port(device_config());
    port.write_period(&mut host, 0x8000 | 368);

    port.write_data(&mut host, 0x03ff);
    assert_eq!(device.borrow().output, vec![0xa9, 0xff]);

    device.borrow_mut().input.extend([0xa9, 0x55]);
    let words = collect_words(&mut host, &mut port, 20);
    assert_eq!(words, vec![0x0355]);
}

#[test]
fn ninebit_receiver_resyncs_after_bad_prefix() {
    let mut host = TestHost::new();
    let (mut port, device) = device_port(device_config());
    port.write_period(&mut host, 0x8000 | 368);

    device.borrow_mut().input.extend([0x10, 0xa8, 0x42]);
    let words = collect_words(&mut host, &mut port, 30);
    assert_eq!(words, vec![0x0242]);
}

#[test]
fn crlf_translation_in_both_directions() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder()
        .device_name("/dev/ttyS0")
        .crlf(true)
        .build();
    let (mut port, device) = device_port(config);
    port.write_period(&mut host, 10);

    port.write_data(&mut host, 0x0100 | u16::from(b'\n'));
    port.write_data(&mut host, 0x0100 | u16::from(b'A'));
    assert_eq!(device.borrow().output, b"\r\nA");

    device.borrow_mut().input.extend(b"\r\n\0B");
    let words = collect_words(&mut host, &mut port, 10);
    assert_eq!(words, vec![0x0100 | 0x0d, 0x0100 | u16::from(b'B')]);
}

#[test]
fn stalled_output_retries_without_duplicate_bytes() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder()
        .device_name("/dev/ttyS0")
        .crlf(true)
        .build();
    let (mut port, device) = device_port(config);
    port.write_period(&mut host, 10);
    device.borrow_mut().write_room = Some(0);

    for _ in 0..99 {
        port.write_data(&mut host, 0x0100 | u16::from(b'x'));
    }
    assert_eq!(port.shift_state(), ShiftState::Empty);
    port.write_data(&mut host, 0x0100 | u16::from(b'\n'));
    assert_eq!(port.shift_state(), ShiftState::Stalled);

    device.borrow_mut().write_room = None;
    host.run_lines(&mut port, 1);
    assert_eq!(port.shift_state(), ShiftState::Empty);

    let output = device.borrow().output.clone();
    assert_eq!(output.len(), 101);
    assert!(output.ends_with(b"x\r\n"));
    assert_eq!(output.iter().filter(|&&b| b == b'\r').count(), 1);
}

#[test]
fn loopback_wires_dtr_to_dsr_and_rts_to_cts() {
    let config = SerialConfig::builder()
        .device_name(LOOPBACK_SERIAL)
        .modem_lines(true)
        .build();
    let mut port = SerialPort::new(config);
    port.init();

    // Both outputs driven low: asserted.
    port.write_status(0x00, 0xc0);
    assert_eq!(port.read_status(0xff), 0xc3 | 0x04);

    port.write_status(0xc0, 0xc0);
    assert_eq!(port.read_status(0xff), 0xff);

    // Only RTS asserted.
    port.write_status(0x80, 0xc0);
    let status = port.read_status(0xff);
    assert_eq!(status & CiaSerialBits::CTS.bits(), 0);
    assert_ne!(status & CiaSerialBits::DSR.bits(), 0);
    assert_ne!(status & CiaSerialBits::CD.bits(), 0);
}

#[test]
fn unconnected_port_leaves_status_untouched() {
    let mut port = SerialPort::new(SerialConfig::builder().modem_lines(true).build());
    port.init();
    assert_eq!(port.read_status(0x5a), 0x5a);
}

#[test]
fn ring_indicator_overrides_sel() {
    let config = SerialConfig::builder()
        .device_name("/dev/ttyS0")
        .ring_indicator(true)
        .build();
    let (mut port, device) = device_port(config);

    device.borrow_mut().signals = LineSignals::ALWAYS_ASSERTED;
    assert_ne!(port.read_status(0x00) & 0x04, 0);
    device.borrow_mut().signals = LineSignals::ALWAYS_ASSERTED | LineSignals::RI;
    assert_eq!(port.read_status(0xff) & 0x04, 0);
}

#[test]
fn sel_follows_printer_or_cia_value() {
    let config = SerialConfig::builder()
        .device_name("/dev/ttyS0")
        .printer_shares_sel(true)
        .build();
    let (mut port, _device) = device_port(config);
    assert_ne!(port.read_status(0x00) & 0x04, 0);

    let (mut port, _device) = device_port(device_config());
    assert_eq!(port.read_status(0x00) & 0x04, 0);
    assert_ne!(port.read_status(0x04) & 0x04, 0);
}

#[test]
fn modem_lines_drive_device_flow_control() {
    let config = SerialConfig::builder()
        .device_name("/dev/ttyS0")
        .modem_lines(true)
        .build();
    let (mut port, device) = device_port(config);

    port.write_status(0xc0, 0xc0);
    port.write_status(0x00, 0xc0);
    assert_eq!(
        device.borrow().flow,
        vec![FlowControl::DtrDsr, FlowControl::RtsCts]
    );
}

#[test]
fn open_on_demand_follows_dtr() {
    let config = SerialConfig::builder()
        .device_name(LOOPBACK_SERIAL)
        .modem_lines(true)
        .open_on_demand(true)
        .build();
    let mut port = SerialPort::new(config);
    port.init();
    assert!(!port.is_open());

    port.write_status(0x80, 0x80);
    assert!(!port.is_open());
    port.write_status(0x00, 0x80);
    assert!(port.is_open());
    assert!(port.is_available());
    port.write_status(0x80, 0x80);
    assert!(!port.is_open());
}

#[test]
fn shared_memory_links_two_ports() {
    let segment = Arc::new(SharedSegment::new());
    let config = SerialConfig::builder()
        .device_name(INTERNAL_SERIAL)
        .modem_lines(true)
        .build();
    let mut a = SerialPort::with_provider(config.clone(), Box::new(SegmentProvider(segment.clone())));
    let mut b = SerialPort::with_provider(config, Box::new(SegmentProvider(segment)));
    a.init();
    b.init();
    assert_eq!(a.transport_kind(), TransportKind::SharedMemoryIpc);
    assert_eq!(b.transport_kind(), TransportKind::SharedMemoryIpc);

    let mut host_a = TestHost::new();
    let mut host_b = TestHost::new();
    a.write_period(&mut host_a, 10);
    b.write_period(&mut host_b, 10);

    a.write_data(&mut host_a, 0x0141);
    host_b.run_lines(&mut b, 1);
    assert_eq!(b.read_data(&mut host_b) & (RBF | Serdatr::WORD_MASK), RBF | 0x0141);
    host_b.acknowledge(Interrupt::ReceiveBufferFull);

    // DTR asserted, RTS off.
    a.write_status(0x40, 0xc0);
    host_b.run_lines(&mut b, 1);
    assert_eq!(b.read_status(0xff), 0xc3 | 0x10 | 0x04);

    a.set_break(true);
    host_b.run_lines(&mut b, 1);
    assert!(b.break_active());
}

#[test]
fn shared_memory_version_mismatch_leaves_port_unconnected() {
    let segment = Arc::new(SharedSegment::with_version(0xdead_beef));
    let config = SerialConfig::builder().device_name(INTERNAL_SERIAL).build();
    let mut port = SerialPort::with_provider(config, Box::new(SegmentProvider(segment)));
    assert!(!port.open_configured());
    assert_eq!(port.transport_kind(), TransportKind::None);
}

#[test]
fn failed_open_keeps_transmitter_registers_working() {
    let mut host = TestHost::new();
    let mut port = SerialPort::new(SerialConfig::builder().device_name("/dev/ttyS9").build());
    port.init();
    assert!(!port.is_open());
    assert!(!port.is_available());

    port.write_period(&mut host, 10);
    port.write_data(&mut host, 0x0141);
    let value = port.read_data(&mut host);
    assert_eq!(value & (TBE | TSRE), TBE | TSRE);
}

#[test]
fn external_words_queue_while_register_is_full() {
    let mut host = TestHost::new();
    let config = SerialConfig::builder().receive_queue_capacity(2).build();
    let mut port = SerialPort::new(config);
    port.init();
    port.write_period(&mut host, 10);

    assert!(port.receive_external(&mut host, 0x0101));
    assert!(port.receive_external(&mut host, 0x0102));
    assert!(port.receive_external(&mut host, 0x0103));
    assert!(!port.receive_external(&mut host, 0x0104));
    assert_eq!(port.queued_words(), 2);

    assert_eq!(port.read_data(&mut host) & Serdatr::WORD_MASK, 0x0101);
    // Nothing moves while RBF is still pending.
    host.run_lines(&mut port, 1);
    assert_eq!(port.queued_words(), 2);

    host.acknowledge(Interrupt::ReceiveBufferFull);
    host.run_lines(&mut port, 1);
    assert_eq!(port.read_data(&mut host) & Serdatr::WORD_MASK, 0x0102);
    assert_eq!(port.queued_words(), 1);
}

#[test]
fn unread_word_rerequests_interrupt_until_read() {
    let mut host = TestHost::new();
    host.intena = Interrupt::ReceiveBufferFull.mask() | 0x4000;
    let mut port = SerialPort::new(SerialConfig::default());
    port.init();

    port.receive_external(&mut host, 0x0141);
    host.acknowledge(Interrupt::ReceiveBufferFull);
    port.rethink(&mut host);
    assert!(host.interrupt_pending(Interrupt::ReceiveBufferFull));

    port.read_data(&mut host);
    assert!(!host.interrupt_pending(Interrupt::ReceiveBufferFull));
    port.rethink(&mut host);
    assert!(!host.interrupt_pending(Interrupt::ReceiveBufferFull));
}

#[test]
fn events_from_closed_session_are_ignored() {
    let mut host = TestHost::new();
    let mut port = loopback_port(true);
    port.write_period(&mut host, 368);
    port.write_data(&mut host, 0x0141);

    port.close();
    assert!(port.open_configured());
    host.advance_to(&mut port, 5000);
    assert_eq!(port.shift_state(), ShiftState::Empty);
    assert_eq!(port.read_data(&mut host) & RBF, 0);
}

#[test]
fn peripheral_sees_transmit_and_feeds_receiver() {
    let mut host = TestHost::new();
    let sent = Rc::new(RefCell::new(Vec::new()));
    let mut port = SerialPort::new(SerialConfig::default());
    port.attach_peripheral(Box::new(Touchscreen {
        sent: sent.clone(),
        reply: Some(b'Z'),
    }));
    port.init();
    port.write_period(&mut host, 10);

    port.write_data(&mut host, 0x0141);
    assert_eq!(*sent.borrow(), vec![0x0141]);

    host.run_lines(&mut port, 1);
    assert_eq!(
        port.read_data(&mut host) & (RBF | Serdatr::WORD_MASK),
        RBF | 0x0100 | u16::from(b'Z')
    );
}

#[test]
fn midi_carries_data_only_at_midi_rate() {
    let mut host = TestHost::new();
    let sent = Rc::new(RefCell::new(Vec::new()));
    let config = SerialConfig::builder().midi_out_device("midi0").build();
    let mut port = SerialPort::with_provider(config, Box::new(MidiProvider(sent.clone())));
    port.init();
    assert_eq!(port.transport_kind(), TransportKind::Midi);

    port.write_period(&mut host, 111);
    assert_eq!(port.baud(), 31400);
    port.write_data(&mut host, 0x0100 | u16::from(b'A'));
    host.run_lines(&mut port, 10);
    assert_eq!(port.shift_state(), ShiftState::Empty);

    port.write_period(&mut host, 368);
    port.write_data(&mut host, 0x0100 | u16::from(b'B'));
    host.run_lines(&mut port, 30);
    assert_eq!(*sent.borrow(), b"A");
}
