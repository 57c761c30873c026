//! Circuit breaker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip CLOSED → OPEN.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive HALF_OPEN successes that close the circuit again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time spent OPEN before the next call is let through as a probe.
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    3
}

const fn default_recovery_timeout_secs() -> u64 {
    30
}

impl BreakerConfig {
    #[must_use]
    pub const fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}
