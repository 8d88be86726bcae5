//! Dirty-flag handoff between the change listener and the scheduler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Collapses bursts of change notifications into a single pending signal.
///
/// The listener calls [`mark_dirty`](Self::mark_dirty) once per observed
/// mutation; the scheduler calls [`take_dirty`](Self::take_dirty) once per
/// tick. Reading and clearing happen in one atomic swap, so a mark that races
/// a take is observed either by that take or by the next one, never lost.
#[derive(Debug)]
pub struct EventCoalescer {
    pending: AtomicU64,
    watching: AtomicBool,
}

impl EventCoalescer {
    /// Creates a clean coalescer backed by a live change feed.
    pub fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
            watching: AtomicBool::new(true),
        }
    }

    /// Records one change notification. Idempotent with respect to the
    /// dirty flag; safe to call from any number of threads.
    pub fn mark_dirty(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Atomically reads and clears the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.take_pending() > 0
    }

    /// Atomically drains the flag, returning how many notifications were
    /// coalesced since the previous drain.
    pub fn take_pending(&self) -> u64 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Returns whether a change is pending, without clearing it.
    pub fn is_dirty(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    /// Sets whether a live change feed is currently backing the flag.
    pub fn set_watching(&self, watching: bool) {
        self.watching.store(watching, Ordering::Release);
    }

    /// Returns false while the change feed is down; the flag then cannot be
    /// trusted to report every mutation.
    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Acquire)
    }
}

impl Default for EventCoalescer {
    fn default() -> Self {
        Self::new()
    }
}
