//! Classified upstream faults.
//!
//! The upstream client turns whatever its transport reports into one of these
//! variants exactly once, at its boundary. Everything downstream (rate
//! controller, breaker, callers) matches on the variant instead of inspecting
//! error strings.

use std::time::Duration;

use thiserror::Error;

/// Closed set of ways an upstream call can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFault {
    /// Host signalled it is over capacity (busy status, explicit throttling).
    ///
    /// `retry_after` carries the host's hinted retry/timeout window when it
    /// sent one.
    #[error("upstream overloaded (retry hint: {retry_after:?})")]
    Overloaded { retry_after: Option<Duration> },

    /// No response within the call deadline.
    #[error("upstream call timed out")]
    Timeout,

    /// Transport-level failure: refused connection, dropped session, TLS.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The requested object does not exist on the host.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other business-level rejection.
    #[error("rejected by upstream: {0}")]
    Rejected(String),
}

impl UpstreamFault {
    /// Overload signal for the rate controller: busy, throttled or timed out.
    #[must_use]
    pub const fn is_overload(&self) -> bool {
        matches!(self, Self::Overloaded { .. } | Self::Timeout)
    }

    /// Whether the fault says something about the host's health.
    ///
    /// `NotFound` and `Rejected` mean the host answered, so they neither trip
    /// nor heal the circuit breaker.
    #[must_use]
    pub const fn counts_against_health(&self) -> bool {
        matches!(
            self,
            Self::Overloaded { .. } | Self::Timeout | Self::Unavailable(_)
        )
    }

    /// Hinted retry window, if the host sent one.
    #[must_use]
    pub const fn retry_hint(&self) -> Option<Duration> {
        match self {
            Self::Overloaded { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status returned by the management API.
    ///
    /// Returns `None` for success statuses. `retry_after` is the parsed
    /// `Retry-After` header, attached only to overload responses.
    #[must_use]
    pub fn from_http_status(status: u16, retry_after: Option<Duration>, detail: &str) -> Option<Self> {
        match status {
            200..=399 => None,
            429 | 503 => Some(Self::Overloaded { retry_after }),
            408 | 504 => Some(Self::Timeout),
            404 => Some(Self::NotFound(detail.to_string())),
            500..=599 => Some(Self::Unavailable(format!("status {status}: {detail}"))),
            _ => Some(Self::Rejected(format!("status {status}: {detail}"))),
        }
    }
}

/// Outcome of one admitted upstream call, reported back to the rate
/// controller and circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure(UpstreamFault),
}

impl CallOutcome {
    /// Derive the outcome from a call result without consuming it.
    pub fn of<T>(result: &Result<T, UpstreamFault>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(fault) => Self::Failure(fault.clone()),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The fault, if this outcome is a failure.
    #[must_use]
    pub const fn fault(&self) -> Option<&UpstreamFault> {
        match self {
            Self::Success => None,
            Self::Failure(fault) => Some(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_statuses_are_overloads() {
        let hint = Some(Duration::from_secs(4));
        let fault = UpstreamFault::from_http_status(503, hint, "busy").unwrap();
        assert!(fault.is_overload());
        assert_eq!(fault.retry_hint(), hint);

        let fault = UpstreamFault::from_http_status(504, hint, "gateway").unwrap();
        assert_eq!(fault, UpstreamFault::Timeout);
        assert_eq!(fault.retry_hint(), None);
    }

    #[test]
    fn not_found_is_neutral_for_health() {
        let fault = UpstreamFault::from_http_status(404, None, "vm-12").unwrap();
        assert!(!fault.is_overload());
        assert!(!fault.counts_against_health());
    }

    #[test]
    fn success_status_is_not_a_fault() {
        assert!(UpstreamFault::from_http_status(200, None, "").is_none());
    }

    #[test]
    fn outcome_reflects_result() {
        let ok: Result<u8, UpstreamFault> = Ok(1);
        assert!(CallOutcome::of(&ok).is_success());

        let err: Result<u8, UpstreamFault> = Err(UpstreamFault::Timeout);
        assert_eq!(CallOutcome::of(&err).fault(), Some(&UpstreamFault::Timeout));
    }
}
