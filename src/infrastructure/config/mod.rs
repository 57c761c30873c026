//! Configuration snapshot for the gateway and relay.
//!
//! Loaded once from TOML at the composition root and treated as immutable
//! afterwards; nothing here is renegotiated at runtime.

pub mod admission;
pub mod breaker;
pub mod logging;
pub mod pool;
pub mod relay;
pub mod settings;
pub mod target;

pub use admission::{GateConfig, RateConfig};
pub use breaker::BreakerConfig;
pub use logging::LoggingConfig;
pub use pool::PoolConfig;
pub use relay::RelayConfig;
pub use settings::{Config, RefreshConfig};
pub use target::TargetConfig;
