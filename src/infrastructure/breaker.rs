//! Per-target circuit breaker.
//!
//! Counts consecutive health failures and fails fast once the target looks
//! unhealthy, then lets traffic probe for recovery.
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ───────────────────────────────▶ OPEN
//!     ▲                                     │  ▲
//!     │ successes >= success_threshold      │  │ any failure
//!     │                                     ▼  │
//!     └──────────────────────────────── HALF_OPEN
//!                  (recovery_timeout elapsed, checked on next call)
//! ```
//!
//! The OPEN → HALF_OPEN transition is evaluated lazily in [`CircuitBreaker::check`].
//! A target that sees no traffic stays nominally OPEN past its recovery
//! timeout until the next call arrives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::{CallOutcome, CircuitState};
use crate::error::{Error, Result};
use crate::infrastructure::config::BreakerConfig;

struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            opened_at: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.successes = 0;
        self.opened_at = Some(now);
    }
}

/// Read-only breaker view for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds until the next call may probe; `None` unless OPEN.
    pub retry_in_ms: Option<u64>,
    /// Calls rejected while OPEN. Not part of the threshold math.
    pub rejected: u64,
}

pub struct CircuitBreaker {
    target: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(target: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
            rejected: AtomicU64::new(0),
        }
    }

    /// Admission check performed before every call.
    ///
    /// Moves OPEN to HALF_OPEN once the recovery timeout has elapsed. While
    /// HALF_OPEN every call is let through.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] while OPEN and still cooling down.
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.state != CircuitState::Open {
            return Ok(());
        }

        let opened_at = state.opened_at.unwrap_or_else(Instant::now);
        let elapsed = opened_at.elapsed();
        if elapsed >= self.config.recovery_timeout() {
            state.state = CircuitState::HalfOpen;
            state.successes = 0;
            info!(target = %self.target, "Circuit breaker half-open, probing upstream");
            return Ok(());
        }

        self.rejected.fetch_add(1, Ordering::Relaxed);
        Err(Error::CircuitOpen {
            retry_in: self.config.recovery_timeout() - elapsed,
        })
    }

    /// Record the outcome of an admitted call.
    ///
    /// Faults that say nothing about host health (not found, rejected) are
    /// ignored.
    pub fn record(&self, outcome: &CallOutcome) {
        let mut state = self.state.lock();
        match outcome {
            CallOutcome::Success => match state.state {
                CircuitState::Closed => state.failures = 0,
                CircuitState::HalfOpen => {
                    state.successes += 1;
                    if state.successes >= self.config.success_threshold {
                        *state = BreakerState::closed();
                        info!(target = %self.target, "Circuit breaker closed, upstream recovered");
                    }
                }
                // Straggler admitted before the breaker opened.
                CircuitState::Open => {}
            },
            CallOutcome::Failure(fault) if fault.counts_against_health() => match state.state {
                CircuitState::Closed => {
                    state.failures += 1;
                    if state.failures >= self.config.failure_threshold {
                        state.open(Instant::now());
                        warn!(
                            target = %self.target,
                            failures = state.failures,
                            recovery_secs = self.config.recovery_timeout_secs,
                            "Circuit breaker opened"
                        );
                    }
                }
                CircuitState::HalfOpen => {
                    state.failures += 1;
                    state.open(Instant::now());
                    warn!(
                        target = %self.target,
                        error = %fault,
                        "Probe failed, circuit breaker re-opened"
                    );
                }
                CircuitState::Open => {}
            },
            CallOutcome::Failure(_) => {}
        }
    }

    /// Force the breaker CLOSED and clear both counters.
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::closed();
        info!(target = %self.target, "Circuit breaker manually reset");
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    #[must_use]
    pub fn status(&self) -> BreakerStatus {
        let state = self.state.lock();
        let retry_in_ms = match (state.state, state.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config
                    .recovery_timeout()
                    .saturating_sub(opened_at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        BreakerStatus {
            state: state.state,
            failure_count: state.failures,
            success_count: state.successes,
            retry_in_ms,
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
