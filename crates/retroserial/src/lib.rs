use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use retroserial_common::{
    BeamTiming, EventQueue, Interrupt, InterruptController, SchedulePolicy, Scheduler,
    SerialConfig, PAL_FRAME_LINES, PAL_LINE_CYCLES,
};
use retroserial_paula::serial::PAULA_CLOCK;
use retroserial_paula::{ScheduledEvent, Serdatr, SerialPort, ShiftState};

pub mod host_serial;

use host_serial::HostSerialPorts;

/// One PAL frame of wall clock time.
const FRAME_DURATION: Duration = Duration::from_micros(20_000);
const INTENA_MASTER: u16 = 0x4000;

pub struct RunOptions {
    pub config: SerialConfig,
    pub baud: u32,
    pub ninebit: bool,
    /// Stop after this many frames.
    pub frames: Option<u64>,
    /// Keep running after stdin is exhausted.
    pub listen: bool,
    /// Pace emulation to real PAL frame time.
    pub throttle: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config: SerialConfig::default(),
            baud: 9600,
            ninebit: false,
            frames: None,
            listen: false,
            throttle: true,
        }
    }
}

/// Parse command line arguments (without the program name).
pub fn parse_args<I>(args: I) -> Result<RunOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut options = RunOptions::default();
    let mut device = String::new();
    let mut midi_out = String::new();
    let mut midi_in = String::new();
    let mut crlf = false;
    let mut cycle_exact = false;
    let mut direct = false;
    let mut modem_lines = false;
    let mut hw_flow_control = false;
    let mut log_output = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--baud" => {
                let value = args.next().ok_or_else(|| anyhow!("--baud needs a value"))?;
                options.baud = value
                    .parse()
                    .with_context(|| format!("invalid baud rate '{}'", value))?;
                if options.baud == 0 {
                    bail!("baud rate must be positive");
                }
            }
            "--frames" => {
                let value = args.next().ok_or_else(|| anyhow!("--frames needs a value"))?;
                let frames = value
                    .parse()
                    .with_context(|| format!("invalid frame count '{}'", value))?;
                options.frames = Some(frames);
            }
            "--midi-out" => {
                midi_out = args.next().ok_or_else(|| anyhow!("--midi-out needs a device"))?;
            }
            "--midi-in" => {
                midi_in = args.next().ok_or_else(|| anyhow!("--midi-in needs a device"))?;
            }
            "--ninebit" => options.ninebit = true,
            "--crlf" => crlf = true,
            "--cycle-exact" => cycle_exact = true,
            "--direct" => direct = true,
            "--modem-lines" => modem_lines = true,
            "--rtscts" => hw_flow_control = true,
            "--log-output" => log_output = true,
            "--listen" => options.listen = true,
            "--no-throttle" => options.throttle = false,
            flag if flag.starts_with("--") => bail!("unknown option '{}'", flag),
            name => {
                if !device.is_empty() {
                    bail!("more than one device given ('{}' and '{}')", device, name);
                }
                device = name.to_string();
            }
        }
    }

    options.config = SerialConfig::builder()
        .device_name(device)
        .midi_out_device(midi_out)
        .midi_in_device(midi_in)
        .crlf(crlf)
        .cycle_exact(cycle_exact)
        .direct(direct)
        .modem_lines(modem_lines)
        .hw_flow_control(hw_flow_control)
        .log_output(log_output)
        .build();
    Ok(options)
}

/// SERPER value for `baud`.
pub fn period_for_baud(baud: u32, ninebit: bool) -> u16 {
    let period = (PAULA_CLOCK / baud.max(1)).saturating_sub(1).min(0x7fff) as u16;
    if ninebit {
        period | 0x8000
    } else {
        period
    }
}

/// The rest of the machine, reduced to a PAL beam counter, INTREQ/INTENA
/// and an event queue.
pub struct HeadlessHost {
    now: u64,
    events: EventQueue<ScheduledEvent>,
    intreq: u16,
    intena: u16,
    delayed: Vec<(u64, Interrupt)>,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self {
            now: 0,
            events: EventQueue::new(),
            intreq: 0,
            intena: INTENA_MASTER
                | Interrupt::TransmitBufferEmpty.mask()
                | Interrupt::ReceiveBufferFull.mask(),
            delayed: Vec::new(),
        }
    }
}

impl HeadlessHost {
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

    fn run_until(&mut self, port: &mut SerialPort, target: u64) {
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

    /// Run one scan line: due events, then the horizontal sync.
    pub fn run_line(&mut self, port: &mut SerialPort) {
        let target = self.now + u64::from(PAL_LINE_CYCLES);
        self.run_until(port, target);
        port.tick_line(self);
        port.rethink(self);
    }

    /// The CPU clearing an INTREQ bit.
    pub fn acknowledge(&mut self, port: &mut SerialPort, irq: Interrupt) {
        self.intreq &= !irq.mask();
        if irq == Interrupt::ReceiveBufferFull {
            port.rbf_interrupt_changed(false);
        }
    }
}

impl Scheduler<ScheduledEvent> for HeadlessHost {
    fn now(&self) -> u64 {
        self.now
    }

    fn schedule(&mut self, delay: u64, event: ScheduledEvent, policy: SchedulePolicy) {
        self.events.schedule_at(self.now + delay, event, policy);
    }
}

impl InterruptController for HeadlessHost {
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
        self.intena & INTENA_MASTER != 0 && self.intena & irq.mask() != 0
    }
}

impl BeamTiming for HeadlessHost {
    fn line_cycles(&self) -> u32 {
        PAL_LINE_CYCLES
    }

    fn frame_lines(&self) -> u32 {
        PAL_FRAME_LINES
    }
}

/// A polling terminal program: once per line it reads SERDATR, collects a
/// received byte and feeds the next outgoing byte when TBE is set.
pub struct Terminal {
    port: SerialPort,
    host: HeadlessHost,
    outgoing: VecDeque<u8>,
    ninebit: bool,
}

impl Terminal {
    pub fn open(config: SerialConfig, baud: u32, ninebit: bool) -> Result<Self> {
        let name = config.device_name.clone();
        let mut port = SerialPort::with_provider(config, Box::new(HostSerialPorts));
        if !port.open_configured() {
            bail!("could not open serial device '{}'", name);
        }
        let mut host = HeadlessHost::default();
        port.write_period(&mut host, period_for_baud(baud, ninebit));
        log::info!(
            "Terminal on '{}' at {} baud ({:?})",
            name,
            port.baud(),
            port.transport_kind()
        );
        Ok(Self {
            port,
            host,
            outgoing: VecDeque::new(),
            ninebit,
        })
    }

    pub fn queue_input(&mut self, bytes: &[u8]) {
        self.outgoing.extend(bytes);
    }

    pub fn step_line(&mut self, received: &mut Vec<u8>) {
        let status = self.port.read_data(&mut self.host);
        if status & Serdatr::RBF.bits() != 0 {
            received.push(status as u8);
            self.host.acknowledge(&mut self.port, Interrupt::ReceiveBufferFull);
        }
        if status & Serdatr::TBE.bits() != 0 {
            if let Some(byte) = self.outgoing.pop_front() {
                let stop = if self.ninebit {
                    Serdatr::STOP9
                } else {
                    Serdatr::STOP8
                };
                self.host.acknowledge(&mut self.port, Interrupt::TransmitBufferEmpty);
                self.port
                    .write_data(&mut self.host, u16::from(byte) | stop.bits());
            }
        }
        self.host.run_line(&mut self.port);
    }

    /// Nothing queued and the transmitter has gone quiet.
    pub fn is_idle(&self) -> bool {
        self.outgoing.is_empty() && self.port.shift_state() == ShiftState::Empty
    }

    pub fn port(&self) -> &SerialPort {
        &self.port
    }

    pub fn close(mut self) {
        self.port.close();
    }
}

fn spawn_stdin_reader() -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Send stdin through the configured device and print what comes back.
pub fn run(options: RunOptions) -> Result<()> {
    let mut terminal = Terminal::open(options.config, options.baud, options.ninebit)?;
    let input = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut stdout = io::stdout().lock();
    let mut received = Vec::new();
    let mut frame = 0u64;

    loop {
        let frame_start = Instant::now();
        while stdin_open {
            match input.try_recv() {
                Ok(bytes) => terminal.queue_input(&bytes),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => stdin_open = false,
            }
        }

        for _ in 0..PAL_FRAME_LINES {
            terminal.step_line(&mut received);
        }
        if !received.is_empty() {
            stdout.write_all(&received)?;
            stdout.flush()?;
            received.clear();
        }

        frame += 1;
        if options.frames.is_some_and(|limit| frame >= limit) {
            break;
        }
        if !stdin_open && !options.listen && terminal.is_idle() {
            break;
        }
        if options.throttle {
            if let Some(rest) = FRAME_DURATION.checked_sub(frame_start.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    log::info!("Stopped after {} frames", frame);
    terminal.close();
    Ok(())
}
