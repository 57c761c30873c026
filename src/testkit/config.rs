//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.
//! Avoids each test module defining its own slightly-different defaults.

use crate::infrastructure::config::{
    BreakerConfig, Config, GateConfig, PoolConfig, RateConfig, RelayConfig, TargetConfig,
};

/// Id of the single target in [`gateway`].
pub const TARGET: &str = "esxi-test";

/// Gate with short timeouts so a stuck test fails fast.
pub fn gate(max_concurrent: usize) -> GateConfig {
    GateConfig {
        max_concurrent,
        acquire_timeout_secs: 5,
        call_timeout_secs: 5,
    }
}

/// Rate controller with a 1 ms floor: spacing is effectively off.
pub fn rate() -> RateConfig {
    RateConfig {
        min_interval_ms: 1,
        max_interval_ms: 5_000,
        window_secs: 10,
    }
}

pub fn breaker(failure_threshold: u32) -> BreakerConfig {
    BreakerConfig {
        failure_threshold,
        success_threshold: 2,
        recovery_timeout_secs: 30,
    }
}

/// Pool with the given size, 5 minute TTL and validation on borrow.
pub fn pool(size: usize) -> PoolConfig {
    PoolConfig {
        size,
        connection_ttl_secs: 300,
        acquire_timeout_secs: 5,
        validate_on_borrow: true,
    }
}

/// Relay on an ephemeral loopback port with plain `ws://` upstream.
pub fn relay() -> RelayConfig {
    RelayConfig {
        listen: "127.0.0.1:0".to_string(),
        upstream_tls: false,
        connect_timeout_secs: 5,
        close_grace_ms: 200,
        ..RelayConfig::default()
    }
}

pub fn target(id: &str) -> TargetConfig {
    TargetConfig {
        id: id.to_string(),
        name: None,
        host: "127.0.0.1".to_string(),
        port: 443,
        enabled: true,
    }
}

/// Full configuration with one target and the fast settings above.
pub fn gateway(max_concurrent: usize, failure_threshold: u32) -> Config {
    Config {
        gate: gate(max_concurrent),
        rate: rate(),
        breaker: breaker(failure_threshold),
        pool: pool(max_concurrent),
        relay: relay(),
        targets: vec![target(TARGET)],
        ..Config::default()
    }
}
