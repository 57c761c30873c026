//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all gateway settings.
//! Configuration is loaded from a TOML file; every section has defaults so a
//! file listing only `[[targets]]` is valid.
//!
//! # Example
//!
//! ```no_run
//! use vmgate::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::admission::{GateConfig, RateConfig};
use super::breaker::BreakerConfig;
use super::logging::LoggingConfig;
use super::pool::PoolConfig;
use super::relay::RelayConfig;
use super::target::TargetConfig;
use crate::error::{ConfigError, Result};

/// Background refresh settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshConfig {
    /// Seconds between refresh cycles.
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
}

const fn default_refresh_interval_secs() -> u64 {
    30
}

impl RefreshConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval_secs(),
        }
    }
}

/// Main application configuration.
///
/// Gate, rate, breaker and pool sections apply to every target: each target
/// gets its own instances built from the same immutable snapshot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Concurrency limits for upstream calls.
    #[serde(default)]
    pub gate: GateConfig,

    /// Adaptive inter-request spacing.
    #[serde(default)]
    pub rate: RateConfig,

    /// Circuit breaker thresholds.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Upstream session pool.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Console relay listener and upstream leg.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Background refresh loop.
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Protected upstream hosts.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The TOML content is malformed
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Initialize tracing from the `[logging]` section.
    pub fn init_logging(&self) {
        self.logging.init();
    }

    /// Targets with `enabled = true`.
    pub fn enabled_targets(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter().filter(|t| t.enabled)
    }

    /// Look up a target by id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTarget`] when no target has that id.
    pub fn target(&self, id: &str) -> Result<&TargetConfig> {
        self.targets
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| ConfigError::UnknownTarget(id.to_string()).into())
    }

    /// Validate configuration values.
    ///
    /// Checks that all limits are positive and ranges are ordered.
    fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: &str| -> crate::error::Error {
            ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            }
            .into()
        };

        if !self.logging.is_known_format() {
            return Err(invalid("logging.format", "must be \"pretty\" or \"json\""));
        }

        if self.gate.max_concurrent == 0 {
            return Err(invalid("max_concurrent", "must be greater than 0"));
        }
        if self.gate.acquire_timeout_secs == 0 {
            return Err(invalid("gate.acquire_timeout_secs", "must be greater than 0"));
        }
        if self.gate.call_timeout_secs == 0 {
            return Err(invalid("call_timeout_secs", "must be greater than 0"));
        }

        // A zero floor would make the multiplicative policy stick at zero.
        if self.rate.min_interval_ms == 0 {
            return Err(invalid("min_interval_ms", "must be greater than 0"));
        }
        if self.rate.max_interval_ms < self.rate.min_interval_ms {
            return Err(invalid("max_interval_ms", "must be >= min_interval_ms"));
        }
        if self.rate.window_secs == 0 {
            return Err(invalid("window_secs", "must be greater than 0"));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be greater than 0"));
        }
        if self.breaker.success_threshold == 0 {
            return Err(invalid("success_threshold", "must be greater than 0"));
        }
        if self.breaker.recovery_timeout_secs == 0 {
            return Err(invalid("recovery_timeout_secs", "must be greater than 0"));
        }

        if self.pool.size == 0 {
            return Err(invalid("pool.size", "must be greater than 0"));
        }
        if self.pool.connection_ttl_secs == 0 {
            return Err(invalid("connection_ttl_secs", "must be greater than 0"));
        }
        if self.pool.acquire_timeout_secs == 0 {
            return Err(invalid("pool.acquire_timeout_secs", "must be greater than 0"));
        }

        if self.relay.subprotocol.trim().is_empty() {
            return Err(invalid("subprotocol", "must not be empty"));
        }
        if !self.relay.path_prefix.starts_with('/') {
            return Err(invalid("path_prefix", "must start with '/'"));
        }
        if self.relay.pending_ttl_secs == 0 {
            return Err(invalid("pending_ttl_secs", "must be greater than 0"));
        }
        if self.relay.connect_timeout_secs == 0 {
            return Err(invalid("connect_timeout_secs", "must be greater than 0"));
        }
        if matches!(self.relay.idle_timeout_secs, Some(0))
            || matches!(self.relay.max_session_secs, Some(0))
            || matches!(self.relay.keepalive_secs, Some(0))
        {
            return Err(invalid(
                "relay timeouts",
                "omit the setting to disable it instead of using 0",
            ));
        }

        if self.refresh.interval_secs == 0 {
            return Err(invalid("refresh.interval_secs", "must be greater than 0"));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.id.trim().is_empty() {
                return Err(ConfigError::MissingField { field: "targets.id" }.into());
            }
            if target.host.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "targets.host",
                }
                .into());
            }
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "targets.id",
                    reason: format!("duplicate target id '{}'", target.id),
                }
                .into());
            }
        }

        Ok(())
    }
}
