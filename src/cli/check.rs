//! `vmgate check`: validate a configuration file.

use std::path::Path;

use super::output;
use crate::error::Result;
use crate::infrastructure::config::Config;

/// Load and validate the configuration, then print what it resolves to.
///
/// # Errors
///
/// Returns the load or validation error.
pub fn execute<P: AsRef<Path>>(config_path: P) -> Result<()> {
    let path = config_path.as_ref();
    println!("Checking configuration: {}", path.display());

    let config = match Config::load(path) {
        Ok(config) => config,
        Err(err) => {
            output::error(&format!("Configuration is invalid: {err}"));
            return Err(err);
        }
    };
    output::ok("Configuration is valid");
    print_summary(&config);
    Ok(())
}

fn print_summary(config: &Config) {
    output::section("Admission");
    output::key_value("max concurrent", config.gate.max_concurrent);
    output::key_value("acquire timeout", format!("{}s", config.gate.acquire_timeout_secs));
    output::key_value("call timeout", format!("{}s", config.gate.call_timeout_secs));
    output::key_value(
        "request spacing",
        format!(
            "{}-{} ms",
            config.rate.min_interval_ms, config.rate.max_interval_ms
        ),
    );

    output::section("Circuit breaker");
    output::key_value("failure threshold", config.breaker.failure_threshold);
    output::key_value("success threshold", config.breaker.success_threshold);
    output::key_value(
        "recovery timeout",
        format!("{}s", config.breaker.recovery_timeout_secs),
    );

    output::section("Connection pool");
    output::key_value("size", config.pool.size);
    output::key_value("ttl", format!("{}s", config.pool.connection_ttl_secs));
    output::key_value("validate on borrow", config.pool.validate_on_borrow);

    output::section("Console relay");
    output::key_value("listen", &config.relay.listen);
    output::key_value("path", config.relay.attach_path("{session}"));
    output::key_value("subprotocol", &config.relay.subprotocol);
    output::key_value(
        "upstream",
        if config.relay.upstream_tls { "wss" } else { "ws" },
    );
    output::key_value("verify tls", config.relay.verify_tls);
    output::key_value("idle timeout", output::optional_secs(config.relay.idle_timeout_secs));
    output::key_value("keepalive", output::optional_secs(config.relay.keepalive_secs));

    output::section("Targets");
    if config.targets.is_empty() {
        output::warn("No targets configured");
    }
    for target in &config.targets {
        let state = if target.enabled { "enabled" } else { "disabled" };
        output::key_value(
            target.display_name(),
            format!("{}:{} ({state})", target.host, target.port),
        );
    }
}
