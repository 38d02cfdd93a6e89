//! Serial words exchanged with a second emulator through shared memory.
//!
//! The segment holds two single-producer/single-consumer rings, one per
//! direction. Neither side takes a lock: each end only advances its own
//! offset and flags its own activity, and a ring whose peer has not flagged
//! activity is treated as dormant.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::TransportError;

pub const SHARED_RING_SIZE: usize = 256;
/// Layout version stamped into both ring headers by the first process.
pub const SHARED_SEGMENT_VERSION: u32 = 0x5345_5201;

/// Control word carrying the sender's modem lines in the low 16 bits.
pub(crate) const CONTROL_LINES: u32 = 0x8000_0000;
/// Control word carrying a break transition.
pub(crate) const CONTROL_BREAK: u32 = 0x4000_0000;
pub(crate) const BREAK_OFF: u32 = 0x10000;
pub(crate) const BREAK_ON: u32 = 0x20000;

struct SharedRing {
    version: AtomicU32,
    active_read: AtomicBool,
    active_write: AtomicBool,
    read_offset: AtomicU32,
    write_offset: AtomicU32,
    data: [AtomicU32; SHARED_RING_SIZE],
}

impl SharedRing {
    fn new(version: u32) -> Self {
        Self {
            version: AtomicU32::new(version),
            active_read: AtomicBool::new(false),
            active_write: AtomicBool::new(false),
            read_offset: AtomicU32::new(0),
            write_offset: AtomicU32::new(0),
            data: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }
}

/// Memory shared by the two endpoints.
pub struct SharedSegment {
    rings: [SharedRing; 2],
    master_claimed: AtomicBool,
}

impl Default for SharedSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSegment {
    pub fn new() -> Self {
        Self {
            rings: [SharedRing::new(0), SharedRing::new(0)],
            master_claimed: AtomicBool::new(false),
        }
    }

    /// A segment already created by a peer that stamped `version`.
    pub fn with_version(version: u32) -> Self {
        Self {
            rings: [SharedRing::new(version), SharedRing::new(version)],
            master_claimed: AtomicBool::new(true),
        }
    }
}

pub struct SharedMemoryTransport {
    segment: Arc<SharedSegment>,
    master: bool,
    tx: usize,
    rx: usize,
    /// Peer modem lines (low 16 bits) and break state (`BREAK_ON`/`BREAK_OFF`).
    remote_flags: u32,
    active: bool,
}

impl SharedMemoryTransport {
    /// Attach to `segment`. The first endpoint becomes the master and owns
    /// ring 0 for transmit; the second one checks the master's version.
    pub fn attach(segment: Arc<SharedSegment>) -> Result<Self, TransportError> {
        let master = !segment.master_claimed.swap(true, Ordering::AcqRel);
        let (tx, rx) = if master {
            for ring in &segment.rings {
                ring.version.store(SHARED_SEGMENT_VERSION, Ordering::Release);
            }
            log::info!("SERIAL: created internal serial port shared memory");
            (0, 1)
        } else {
            for ring in &segment.rings {
                let found = ring.version.load(Ordering::Acquire);
                if found != SHARED_SEGMENT_VERSION {
                    return Err(TransportError::VersionMismatch {
                        found,
                        expected: SHARED_SEGMENT_VERSION,
                    });
                }
            }
            log::info!("SERIAL: found already existing serial port shared memory");
            (1, 0)
        };

        segment.rings[tx].active_write.store(true, Ordering::Release);
        segment.rings[rx].active_read.store(true, Ordering::Release);
        Ok(Self {
            segment,
            master,
            tx,
            rx,
            remote_flags: 0,
            active: true,
        })
    }

    pub fn is_master(&self) -> bool {
        self.master
    }

    pub fn send(&mut self, word: u32) {
        if !self.active {
            return;
        }
        let ring = &self.segment.rings[self.tx];
        ring.active_write.store(true, Ordering::Release);
        if !ring.active_read.load(Ordering::Acquire) {
            return;
        }
        let w = ring.write_offset.load(Ordering::Relaxed) as usize;
        let next = (w + 1) % SHARED_RING_SIZE;
        if next == ring.read_offset.load(Ordering::Acquire) as usize {
            log::warn!("SERIAL: shared serial port memory overflow!");
            return;
        }
        ring.data[w].store(word, Ordering::Relaxed);
        ring.write_offset.store(next as u32, Ordering::Release);
    }

    pub fn receive(&mut self) -> Option<u32> {
        if !self.active {
            return None;
        }
        let ring = &self.segment.rings[self.rx];
        ring.active_read.store(true, Ordering::Release);
        if !ring.active_write.load(Ordering::Acquire) {
            return None;
        }
        let r = ring.read_offset.load(Ordering::Relaxed) as usize;
        if r == ring.write_offset.load(Ordering::Acquire) as usize {
            return None;
        }
        let word = ring.data[r].load(Ordering::Relaxed);
        ring.read_offset
            .store(((r + 1) % SHARED_RING_SIZE) as u32, Ordering::Release);
        Some(word)
    }

    /// Mark both of our ring ends idle and drop anything still queued.
    pub fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.remote_flags = 0;
        let tx = &self.segment.rings[self.tx];
        tx.active_write.store(false, Ordering::Release);
        tx.write_offset
            .store(tx.read_offset.load(Ordering::Acquire), Ordering::Release);
        let rx = &self.segment.rings[self.rx];
        rx.active_read.store(false, Ordering::Release);
        rx.read_offset
            .store(rx.write_offset.load(Ordering::Acquire), Ordering::Release);
    }

    pub fn remote_lines(&self) -> u32 {
        self.remote_flags & 0xffff
    }

    pub fn set_remote_lines(&mut self, word: u32) {
        self.remote_flags = (self.remote_flags & 0x0fff_0000) | (word & 0xffff);
    }

    /// Latch a break control word. Returns false if it carried no break bits.
    pub fn apply_break_word(&mut self, word: u32) -> bool {
        let bits = word & (BREAK_ON | BREAK_OFF);
        if bits == 0 {
            return false;
        }
        self.remote_flags = (self.remote_flags & !(BREAK_ON | BREAK_OFF)) | bits;
        true
    }

    pub fn remote_break(&self) -> bool {
        self.remote_flags & BREAK_ON != 0
    }
}

impl Drop for SharedMemoryTransport {
    fn drop(&mut self) {
        self.deactivate();
    }
}
