use crate::host::SchedulePolicy;

/// Identity of an event for the purpose of replace-style scheduling.
pub trait LogicalEvent {
    fn same_event(&self, other: &Self) -> bool;
}

struct Pending<E> {
    fire_at: u64,
    seq: u64,
    event: E,
}

/// Small cycle-indexed event queue.
///
/// This is the reference scheduler used by the headless frontend and by
/// device tests. Events that fall due on the same cycle fire in the order
/// they were scheduled.
pub struct EventQueue<E> {
    pending: Vec<Pending<E>>,
    next_seq: u64,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<E: LogicalEvent> EventQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Insert `event` at absolute cycle `fire_at`, honouring `policy`.
    pub fn schedule_at(&mut self, fire_at: u64, event: E, policy: SchedulePolicy) {
        match policy {
            SchedulePolicy::Append => {}
            SchedulePolicy::Replace => {
                self.pending.retain(|p| !p.event.same_event(&event));
            }
            SchedulePolicy::ReplaceExisting => {
                if !self.pending.iter().any(|p| p.event.same_event(&event)) {
                    return;
                }
                self.pending.retain(|p| !p.event.same_event(&event));
            }
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.push(Pending {
            fire_at,
            seq,
            event,
        });
    }

    /// Absolute cycle of the earliest pending event matching `wanted`.
    pub fn fire_time_of(&self, wanted: &E) -> Option<u64> {
        self.pending
            .iter()
            .filter(|p| p.event.same_event(wanted))
            .map(|p| p.fire_at)
            .min()
    }

    /// Cycle of the next event to fire, if any.
    pub fn next_due(&self) -> Option<u64> {
        self.pending.iter().map(|p| p.fire_at).min()
    }

    /// Remove and return the earliest event due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<E> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.fire_at <= now)
            .min_by_key(|(_, p)| (p.fire_at, p.seq))
            .map(|(i, _)| i)?;
        Some(self.pending.swap_remove(index).event)
    }
}
