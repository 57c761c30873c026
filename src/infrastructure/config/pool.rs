//! Upstream session pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded pool of authenticated upstream sessions.
///
/// Sessions are created lazily on demand, never pre-warmed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum number of sessions (idle + borrowed).
    #[serde(default = "default_pool_size")]
    pub size: usize,
    /// Session time-to-live in seconds, measured from creation.
    #[serde(default = "default_connection_ttl_secs")]
    pub connection_ttl_secs: u64,
    /// How long `get` waits for a free session before `PoolExhausted`.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Ping idle sessions before handing them out.
    #[serde(default = "default_validate_on_borrow")]
    pub validate_on_borrow: bool,
}

const fn default_pool_size() -> usize {
    5
}

const fn default_connection_ttl_secs() -> u64 {
    300
}

const fn default_acquire_timeout_secs() -> u64 {
    10
}

const fn default_validate_on_borrow() -> bool {
    true
}

impl PoolConfig {
    #[must_use]
    pub const fn connection_ttl(&self) -> Duration {
        Duration::from_secs(self.connection_ttl_secs)
    }

    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            connection_ttl_secs: default_connection_ttl_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            validate_on_borrow: default_validate_on_borrow(),
        }
    }
}
