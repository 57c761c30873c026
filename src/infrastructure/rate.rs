//! Adaptive inter-request spacing for one upstream target.
//!
//! The controller is the only component that decides how far apart admitted
//! calls must be. It backs off multiplicatively on overload signals and
//! recovers slowly on success:
//!
//! - success: `delay *= 0.9`
//! - overload: `delay *= 2`, or `hint / (recent_requests * 0.8)` when the host
//!   sent a retry hint and that value is larger
//! - any other fault: unchanged
//!
//! The delay is always clamped to `[min_interval, max_interval]`.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::CallOutcome;
use crate::infrastructure::config::RateConfig;

const SUCCESS_FACTOR: f64 = 0.9;
const HINT_SHARE: f64 = 0.8;

struct RateState {
    delay: Duration,
    last_request: Option<Instant>,
    recent_requests: VecDeque<Instant>,
    recent_overloads: VecDeque<Instant>,
}

impl RateState {
    fn prune(&mut self, now: Instant, window: Duration) {
        prune_window(&mut self.recent_requests, now, window);
        prune_window(&mut self.recent_overloads, now, window);
    }
}

fn prune_window(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = entries.front() {
        if now.duration_since(*front) > window {
            entries.pop_front();
        } else {
            break;
        }
    }
}

/// Point-in-time view of the controller for status snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct RateSnapshot {
    pub delay_ms: u64,
    pub recent_requests: usize,
    pub recent_overloads: usize,
}

/// Per-target adaptive rate controller.
pub struct RateController {
    min_interval: Duration,
    max_interval: Duration,
    window: Duration,
    state: Mutex<RateState>,
}

impl RateController {
    #[must_use]
    pub fn new(config: &RateConfig) -> Self {
        let min_interval = config.min_interval();
        Self {
            min_interval,
            max_interval: config.max_interval().max(min_interval),
            window: config.window(),
            state: Mutex::new(RateState {
                delay: min_interval,
                last_request: None,
                recent_requests: VecDeque::new(),
                recent_overloads: VecDeque::new(),
            }),
        }
    }

    /// Current minimum spacing between two granted requests.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        self.state.lock().delay
    }

    /// Claim the next request slot in time.
    ///
    /// Succeeds and records the request when at least the current delay has
    /// elapsed since the previous grant. Otherwise returns how long the caller
    /// must still wait; nothing is recorded in that case.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(last) = state.last_request {
            let elapsed = now.duration_since(last);
            if elapsed < state.delay {
                return Err(state.delay - elapsed);
            }
        }

        state.last_request = Some(now);
        state.recent_requests.push_back(now);
        state.prune(now, self.window);
        Ok(())
    }

    /// Feed the outcome of a completed call back into the policy.
    pub fn record_outcome(&self, outcome: &CallOutcome) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.prune(now, self.window);

        let previous = state.delay;
        let next = match outcome {
            CallOutcome::Success => previous.mul_f64(SUCCESS_FACTOR),
            CallOutcome::Failure(fault) if fault.is_overload() => {
                state.recent_overloads.push_back(now);
                let doubled = previous.saturating_mul(2);
                match fault.retry_hint() {
                    Some(hint) => {
                        let recent = state.recent_requests.len().max(1) as f64;
                        let spread = hint.as_secs_f64() / (recent * HINT_SHARE);
                        let hinted =
                            Duration::try_from_secs_f64(spread).unwrap_or(self.max_interval);
                        doubled.max(hinted)
                    }
                    None => doubled,
                }
            }
            CallOutcome::Failure(_) => return,
        };

        state.delay = next.clamp(self.min_interval, self.max_interval);

        if state.delay > previous {
            warn!(
                previous_ms = previous.as_millis() as u64,
                delay_ms = state.delay.as_millis() as u64,
                recent_overloads = state.recent_overloads.len(),
                "Upstream overloaded, backing off"
            );
        } else if state.delay < previous {
            debug!(delay_ms = state.delay.as_millis() as u64, "Rate recovering");
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RateSnapshot {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.prune(now, self.window);
        RateSnapshot {
            delay_ms: state.delay.as_millis() as u64,
            recent_requests: state.recent_requests.len(),
            recent_overloads: state.recent_overloads.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UpstreamFault;

    fn controller(min_ms: u64, max_ms: u64) -> RateController {
        RateController::new(&RateConfig {
            min_interval_ms: min_ms,
            max_interval_ms: max_ms,
            window_secs: 10,
        })
    }

    fn overload(hint: Option<Duration>) -> CallOutcome {
        CallOutcome::Failure(UpstreamFault::Overloaded { retry_after: hint })
    }

    #[test]
    fn starts_at_min_interval() {
        let rate = controller(50, 5_000);
        assert_eq!(rate.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn consecutive_overloads_double_until_cap() {
        let rate = controller(50, 5_000);
        for n in 1..=10u32 {
            rate.record_outcome(&overload(None));
            let expected = Duration::from_millis(50 * 2u64.pow(n)).min(Duration::from_millis(5_000));
            assert_eq!(rate.next_delay(), expected, "after {n} overloads");
        }
    }

    #[test]
    fn timeouts_count_as_overload() {
        let rate = controller(50, 5_000);
        rate.record_outcome(&CallOutcome::Failure(UpstreamFault::Timeout));
        assert_eq!(rate.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn success_shrinks_but_never_below_min() {
        let rate = controller(50, 5_000);
        rate.record_outcome(&overload(None));
        rate.record_outcome(&overload(None));
        assert_eq!(rate.next_delay(), Duration::from_millis(200));

        rate.record_outcome(&CallOutcome::Success);
        let shrunk = rate.next_delay().as_secs_f64();
        assert!((shrunk - 0.180).abs() < 1e-6, "got {shrunk}");

        for _ in 0..100 {
            rate.record_outcome(&CallOutcome::Success);
        }
        assert_eq!(rate.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn non_overload_faults_leave_delay_alone() {
        let rate = controller(50, 5_000);
        rate.record_outcome(&overload(None));
        rate.record_outcome(&CallOutcome::Failure(UpstreamFault::NotFound("vm".into())));
        rate.record_outcome(&CallOutcome::Failure(UpstreamFault::Rejected("no".into())));
        rate.record_outcome(&CallOutcome::Failure(UpstreamFault::Unavailable("tcp".into())));
        assert_eq!(rate.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn hinted_overload_spreads_hint_over_recent_requests() {
        let rate = controller(10, 60_000);
        for _ in 0..4 {
            rate.try_acquire().unwrap();
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        rate.record_outcome(&overload(Some(Duration::from_secs(8))));

        // 8s / (4 * 0.8) = 2.5s, well above the doubled 20ms.
        let hinted = Duration::from_secs(8).div_f64(4.0 * 0.8);
        assert!(rate.next_delay() >= hinted);
        assert!(rate.next_delay() >= Duration::from_millis(20));
    }

    #[test]
    fn hint_with_no_recent_requests_uses_one() {
        let rate = controller(10, 60_000);
        rate.record_outcome(&overload(Some(Duration::from_secs(1))));
        assert_eq!(rate.next_delay(), Duration::from_secs(1).div_f64(0.8));
    }

    #[test]
    fn hint_is_clamped_to_max() {
        let rate = controller(10, 1_000);
        rate.record_outcome(&overload(Some(Duration::from_secs(30))));
        assert_eq!(rate.next_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn unrepresentable_hint_backs_off_to_max() {
        let rate = controller(10, 1_000);
        rate.record_outcome(&overload(Some(Duration::from_secs(u64::MAX))));
        assert_eq!(rate.next_delay(), Duration::from_millis(1_000));

        rate.record_outcome(&overload(Some(Duration::MAX)));
        assert_eq!(rate.next_delay(), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_enforces_spacing() {
        let rate = controller(100, 5_000);
        assert!(rate.try_acquire().is_ok());

        let remaining = rate.try_acquire().unwrap_err();
        assert_eq!(remaining, Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(rate.try_acquire().unwrap_err(), Duration::from_millis(40));

        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(rate.try_acquire().is_ok());
        assert_eq!(rate.snapshot().recent_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn window_forgets_old_requests() {
        let rate = controller(10, 5_000);
        rate.try_acquire().unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        rate.try_acquire().unwrap();
        assert_eq!(rate.snapshot().recent_requests, 1);
    }
}
