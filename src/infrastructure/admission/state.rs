//! Admission gate internal state types.
//!
//! Shared by the gate, its permits and the spacing timer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::Permit;
use crate::domain::Priority;

/// A caller blocked in [`AdmissionGate::acquire`](super::AdmissionGate::acquire).
pub(super) struct Waiter {
    pub(super) priority: Priority,
    pub(super) seq: u64,
    pub(super) enqueued_at: Instant,
    pub(super) tx: oneshot::Sender<Permit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    /// Max-heap order: more urgent priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Everything guarded by the gate's single lock.
pub(super) struct GateState {
    /// Free concurrency slots.
    pub(super) available: usize,
    pub(super) waiters: BinaryHeap<Waiter>,
    pub(super) next_seq: u64,
    /// A spacing timer is already scheduled to re-run dispatch.
    pub(super) timer_armed: bool,
}

impl GateState {
    pub(super) fn new(max_concurrent: usize) -> Self {
        Self {
            available: max_concurrent,
            waiters: BinaryHeap::new(),
            next_seq: 0,
            timer_armed: false,
        }
    }

    pub(super) fn waiting_by_priority(&self) -> [usize; 4] {
        let mut counts = [0usize; 4];
        for waiter in &self.waiters {
            if !waiter.tx.is_closed() {
                counts[waiter.priority.index()] += 1;
            }
        }
        counts
    }
}

/// Shared counters updated atomically on acquire and release.
pub(super) struct GateCounters {
    pub(super) requests: AtomicU64,
    pub(super) timeouts: AtomicU64,
    pub(super) circuit_rejections: AtomicU64,
    pub(super) succeeded: AtomicU64,
    pub(super) failed: AtomicU64,
    pub(super) admitted: [AtomicU64; 4],
    pub(super) wait_micros: [AtomicU64; 4],
}

impl GateCounters {
    pub(super) fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            circuit_rejections: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            admitted: Default::default(),
            wait_micros: Default::default(),
        }
    }

    pub(super) fn record_admit(&self, priority: Priority, waited: Duration) {
        let i = priority.index();
        self.admitted[i].fetch_add(1, AtomicOrdering::Relaxed);
        self.wait_micros[i].fetch_add(waited.as_micros() as u64, AtomicOrdering::Relaxed);
    }

    /// Average wait in milliseconds for one priority level.
    pub(super) fn avg_wait_ms(&self, priority: Priority) -> f64 {
        let i = priority.index();
        let admitted = self.admitted[i].load(AtomicOrdering::Relaxed);
        if admitted == 0 {
            return 0.0;
        }
        self.wait_micros[i].load(AtomicOrdering::Relaxed) as f64 / admitted as f64 / 1000.0
    }
}
