/// Chipset interrupt sources used by the serial port.
///
/// The discriminant is the bit position in INTREQ/INTENA.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Interrupt {
    /// Transmit buffer empty (TBE, level 1).
    TransmitBufferEmpty = 0,
    /// Receive buffer full (RBF, level 5).
    ReceiveBufferFull = 11,
}

impl Interrupt {
    #[inline]
    pub const fn mask(self) -> u16 {
        1 << (self as u16)
    }
}

/// How a newly scheduled event interacts with an already pending event of
/// the same logical kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulePolicy {
    /// Always add a new event.
    Append,
    /// Drop any pending event of the same kind, then add this one.
    Replace,
    /// Move a pending event of the same kind; do nothing if none is pending.
    ReplaceExisting,
}

/// Cycle-indexed event scheduler owned by the host emulator.
///
/// Events are plain values; the host hands them back to the device that
/// scheduled them once its clock reaches `now() + delay`.
pub trait Scheduler<E> {
    /// Current value of the chipset cycle counter (colour clocks).
    fn now(&self) -> u64;
    fn schedule(&mut self, delay: u64, event: E, policy: SchedulePolicy);
}

/// Interrupt request/enable registers of the host chipset.
pub trait InterruptController {
    /// Set the request bit for `irq`, `delay` cycles from now.
    fn request_interrupt(&mut self, irq: Interrupt, delay: u32);
    fn clear_interrupt(&mut self, irq: Interrupt);
    fn interrupt_pending(&self, irq: Interrupt) -> bool;
    /// True when both the source enable bit and the master enable are set.
    fn interrupt_enabled(&self, irq: Interrupt) -> bool;
}

/// Video beam geometry, which drives the per-line tick.
pub trait BeamTiming {
    /// Colour clocks per scan line (`maxhpos`).
    fn line_cycles(&self) -> u32;
    /// Scan lines per frame (`maxvpos`).
    fn frame_lines(&self) -> u32;
}
