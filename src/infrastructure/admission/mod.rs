//! Priority admission gate for one upstream target.
//!
//! Bounds simultaneous upstream calls to `max_concurrent` and decides who goes
//! next when a slot frees up: the most urgent priority first, FIFO within a
//! priority. Before any slot is granted the [`RateController`] must agree that
//! enough time has passed since the previous grant.
//!
//! # Scheduling
//!
//! Waiters sit in a binary heap. Whenever a slot frees up, a waiter enqueues,
//! or the spacing timer fires, `dispatch` hands permits to the head of the
//! heap for as long as slots are free and the rate controller allows. When
//! spacing blocks the head, a single timer is armed for the remaining delay.
//! Waiters never hold a slot while they sleep on spacing, so a rate-limited
//! head does not pin concurrency.
//!
//! # Cancellation
//!
//! A waiter that times out, or whose future is dropped, is removed from the
//! heap. A permit granted to a caller that has already gone away is dropped
//! inside the channel and returns its slot.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::domain::{CallOutcome, Priority};
use crate::error::{Error, Result};
use crate::infrastructure::breaker::CircuitBreaker;
use crate::infrastructure::config::GateConfig;
use crate::infrastructure::rate::RateController;

mod state;

use state::{GateCounters, GateState, Waiter};

struct GateInner {
    target: String,
    max_concurrent: usize,
    acquire_timeout: Duration,
    rate: Arc<RateController>,
    breaker: Arc<CircuitBreaker>,
    state: Mutex<GateState>,
    counters: GateCounters,
}

/// Per-priority slice of [`GateStats`].
#[derive(Debug, Clone, Serialize)]
pub struct PriorityStats {
    pub priority: Priority,
    pub waiting: usize,
    pub admitted: u64,
    pub avg_wait_ms: f64,
}

/// Read-only admission statistics.
#[derive(Debug, Clone, Serialize)]
pub struct GateStats {
    pub active: usize,
    pub max_concurrent: usize,
    pub total_requests: u64,
    pub timeouts: u64,
    pub circuit_rejections: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub priorities: Vec<PriorityStats>,
}

impl GateStats {
    /// Callers currently queued across all priorities.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.priorities.iter().map(|p| p.waiting).sum()
    }

    #[must_use]
    pub fn for_priority(&self, priority: Priority) -> Option<&PriorityStats> {
        self.priorities.iter().find(|p| p.priority == priority)
    }
}

/// Bounded-concurrency, priority-ordered admission gate.
///
/// Cheap to clone; clones share the same slots and queue.
#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(
        target: impl Into<String>,
        config: &GateConfig,
        rate: Arc<RateController>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            inner: Arc::new(GateInner {
                target: target.into(),
                max_concurrent,
                acquire_timeout: config.acquire_timeout(),
                rate,
                breaker,
                state: Mutex::new(GateState::new(max_concurrent)),
                counters: GateCounters::new(),
            }),
        }
    }

    /// Wait for an admission slot.
    ///
    /// # Errors
    ///
    /// - [`Error::CircuitOpen`] immediately, without queueing, when the
    ///   target's breaker is open
    /// - [`Error::Timeout`] when no slot was granted within the acquire timeout
    pub async fn acquire(&self, priority: Priority) -> Result<Permit> {
        if let Err(err) = self.inner.breaker.check() {
            self.inner
                .counters
                .circuit_rejections
                .fetch_add(1, Ordering::Relaxed);
            debug!(target = %self.inner.target, priority = %priority, "Rejected, circuit open");
            return Err(err);
        }
        self.inner.counters.requests.fetch_add(1, Ordering::Relaxed);

        let (mut rx, seq) = {
            let mut state = self.inner.state.lock();

            // Fast path: nobody ahead of us, a free slot, and spacing satisfied.
            if state.waiters.is_empty() && state.available > 0 && self.inner.rate.try_acquire().is_ok()
            {
                state.available -= 1;
                drop(state);
                self.inner.counters.record_admit(priority, Duration::ZERO);
                return Ok(Permit::new(self.inner.clone(), priority));
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter {
                priority,
                seq,
                enqueued_at: Instant::now(),
                tx,
            });
            trace!(
                target = %self.inner.target,
                priority = %priority,
                seq,
                queued = state.waiters.len(),
                "Queued for admission"
            );
            self.inner.dispatch_locked(&mut state);
            (rx, seq)
        };

        let mut queued = QueuedWaiter {
            inner: &self.inner,
            seq,
            done: false,
        };

        match tokio::time::timeout(self.inner.acquire_timeout, &mut rx).await {
            Ok(Ok(permit)) => {
                queued.done = true;
                Ok(permit)
            }
            Ok(Err(_)) | Err(_) => {
                queued.done = true;
                if queued.remove() {
                    self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target = %self.inner.target,
                        priority = %priority,
                        timeout_secs = self.inner.acquire_timeout.as_secs(),
                        "Timed out waiting for admission"
                    );
                    return Err(Error::Timeout(self.inner.acquire_timeout));
                }
                // Granted while the timer fired: dispatch sends under the lock
                // that `remove` just took, so the permit is already in the channel.
                rx.try_recv()
                    .map_err(|_| Error::Timeout(self.inner.acquire_timeout))
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> GateStats {
        let (active, waiting) = {
            let state = self.inner.state.lock();
            (
                self.inner.max_concurrent - state.available,
                state.waiting_by_priority(),
            )
        };
        let counters = &self.inner.counters;
        GateStats {
            active,
            max_concurrent: self.inner.max_concurrent,
            total_requests: counters.requests.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            circuit_rejections: counters.circuit_rejections.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            priorities: Priority::ALL
                .iter()
                .map(|&priority| PriorityStats {
                    priority,
                    waiting: waiting[priority.index()],
                    admitted: counters.admitted[priority.index()].load(Ordering::Relaxed),
                    avg_wait_ms: counters.avg_wait_ms(priority),
                })
                .collect(),
        }
    }

    pub fn rate(&self) -> &RateController {
        &self.inner.rate
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }
}

impl GateInner {
    /// Grant permits to the head of the queue while slots and spacing allow.
    fn dispatch_locked(self: &Arc<Self>, state: &mut GateState) {
        while state.available > 0 {
            let Some(head) = state.waiters.peek() else {
                break;
            };
            if head.tx.is_closed() {
                state.waiters.pop();
                continue;
            }

            if let Err(remaining) = self.rate.try_acquire() {
                self.arm_timer(state, remaining);
                break;
            }

            let Some(waiter) = state.waiters.pop() else {
                break;
            };
            state.available -= 1;

            let waited = waiter.enqueued_at.elapsed();
            match waiter.tx.send(Permit::new(self.clone(), waiter.priority)) {
                Ok(()) => {
                    self.counters.record_admit(waiter.priority, waited);
                    trace!(
                        target = %self.target,
                        priority = %waiter.priority,
                        seq = waiter.seq,
                        waited_ms = waited.as_millis() as u64,
                        "Admitted"
                    );
                }
                Err(mut permit) => {
                    // Receiver vanished between the check and the send.
                    permit.disarm();
                    state.available += 1;
                }
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, state: &mut GateState, delay: Duration) {
        if state.timer_armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(target = %self.target, "No runtime to schedule spacing timer");
            return;
        };
        state.timer_armed = true;

        let weak: Weak<Self> = Arc::downgrade(self);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock();
                state.timer_armed = false;
                inner.dispatch_locked(&mut state);
            }
        });
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.available += 1;
        self.dispatch_locked(&mut state);
    }
}

/// Removes a waiter from the heap if `acquire` is abandoned mid-wait.
struct QueuedWaiter<'a> {
    inner: &'a Arc<GateInner>,
    seq: u64,
    done: bool,
}

impl QueuedWaiter<'_> {
    /// Returns true if the waiter was still queued.
    fn remove(&self) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.waiters.len();
        let seq = self.seq;
        state.waiters.retain(|w| w.seq != seq);
        state.waiters.len() != before
    }
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.remove();
        }
    }
}

/// One admission slot. Returned to the gate exactly once, on drop.
pub struct Permit {
    inner: Arc<GateInner>,
    priority: Priority,
    armed: bool,
}

impl Permit {
    fn new(inner: Arc<GateInner>, priority: Priority) -> Self {
        Self {
            inner,
            priority,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Report the call's outcome to the rate controller and breaker, then
    /// release the slot.
    pub fn complete(self, outcome: &CallOutcome) {
        self.inner.rate.record_outcome(outcome);
        self.inner.breaker.record(outcome);
        let counter = if outcome.is_success() {
            &self.inner.counters.succeeded
        } else {
            &self.inner.counters.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Release the slot without reporting an outcome.
    pub fn release(self) {}
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            self.inner.release();
        }
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("target", &self.inner.target)
            .field("priority", &self.priority)
            .finish()
    }
}

#[cfg(test)]
mod tests;
