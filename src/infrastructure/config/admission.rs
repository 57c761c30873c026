//! Admission gate and rate controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Concurrency limits for calls into one upstream target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    /// Maximum number of upstream calls in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long a caller may wait for admission before giving up.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Deadline for a single admitted call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

const fn default_max_concurrent() -> usize {
    8
}

const fn default_acquire_timeout_secs() -> u64 {
    30
}

const fn default_call_timeout_secs() -> u64 {
    60
}

impl GateConfig {
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Adaptive inter-request spacing.
///
/// The delay starts at `min_interval_ms`, shrinks by 10% on success and
/// doubles on overload, always clamped to `[min_interval_ms, max_interval_ms]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateConfig {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Rolling window used to count recent requests and overload signals.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

const fn default_min_interval_ms() -> u64 {
    50
}

const fn default_max_interval_ms() -> u64 {
    5_000
}

const fn default_window_secs() -> u64 {
    10
}

impl RateConfig {
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    #[must_use]
    pub const fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            window_secs: default_window_secs(),
        }
    }
}
