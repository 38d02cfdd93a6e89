use retroserial_common::{LogicalEvent, SchedulePolicy};

use super::{SerialHost, SerialPort, ShiftState};

/// Deferred work the port hands to the host scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SerialEvent {
    /// SERDAT write that lands one cycle after the CPU bus access.
    WriteData(u16),
    /// The last bit of the shifter has gone out on the wire.
    ShiftComplete,
    /// The transmitter finished a frame with nobody listening.
    TransmitEnd,
    /// A looped back frame reached the receiver; `residual` cycles of the
    /// transmit frame remain after that.
    LoopbackReceive { residual: u32 },
}

/// A [`SerialEvent`] tagged with the session it was scheduled in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScheduledEvent {
    pub generation: u32,
    pub kind: SerialEvent,
}

impl LogicalEvent for ScheduledEvent {
    fn same_event(&self, other: &Self) -> bool {
        std::mem::discriminant(&self.kind) == std::mem::discriminant(&other.kind)
    }
}

impl SerialPort {
    pub(super) fn schedule(
        &self,
        host: &mut dyn SerialHost,
        delay: u64,
        kind: SerialEvent,
        policy: SchedulePolicy,
    ) {
        let event = ScheduledEvent {
            generation: self.generation,
            kind,
        };
        host.schedule(delay, event, policy);
    }

    /// Run an event previously handed to the host. Events from a session
    /// that has since been closed or reopened are dropped.
    pub fn handle_event(&mut self, host: &mut dyn SerialHost, event: ScheduledEvent) {
        if event.generation != self.generation {
            log::trace!("SERIAL: stale event {:?} ignored", event.kind);
            return;
        }
        match event.kind {
            SerialEvent::WriteData(word) => self.send_data(host, word),
            SerialEvent::ShiftComplete => self.shift_complete(host),
            SerialEvent::TransmitEnd => self.transmit_end(host),
            SerialEvent::LoopbackReceive { residual } => {
                if self.is_loopback() {
                    self.loopback_receive(host, residual);
                }
            }
        }
    }

    fn shift_complete(&mut self, host: &mut dyn SerialHost) {
        if self.check_shift_empty(host) {
            let bit_period = self.clock.bit_period();
            self.tx.last_bit_cycle = host.now() + bit_period;
            self.tx.last_bit_lines = (bit_period / u64::from(host.line_cycles().max(1))) as u32 + 2;
        } else if matches!(self.tx.state, ShiftState::Loaded | ShiftState::Stalled) {
            let line = u64::from(host.line_cycles());
            self.schedule(host, line, SerialEvent::ShiftComplete, SchedulePolicy::Replace);
        }
    }

    fn transmit_end(&mut self, host: &mut dyn SerialHost) {
        self.finish_shift();
        self.copy_to_shift(host);
        self.tx.pending = false;
        self.tx.holding_ready_at = host.now() + 1;
    }

    /// Deliver the word in the shifter to our own receiver.
    pub(super) fn loopback_receive(&mut self, host: &mut dyn SerialHost, residual: u32) {
        self.rx.word = self.tx.shift;
        self.raise_receive(host);
        self.schedule(
            host,
            u64::from(residual),
            SerialEvent::TransmitEnd,
            SchedulePolicy::Append,
        );
    }
}
