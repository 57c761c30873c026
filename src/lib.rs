//! vmgate - Admission control and console relay for hypervisor management APIs.
//!
//! The upstream host has little request capacity, answers bursts with
//! overload errors, and allows only a handful of concurrent logins. This crate
//! sits in front of it and decides *when* calls may run, and carries console
//! byte streams to it.
//!
//! # Architecture
//!
//! One set of guards per upstream target, composed in
//! [`infrastructure::gateway::TargetGateway`]:
//!
//! - **Admission gate** - bounded concurrency, strict priority, FIFO within a
//!   priority
//! - **Rate controller** - adaptive spacing between granted requests
//! - **Circuit breaker** - fail fast while the target is unhealthy
//! - **Connection pool** - reusable authenticated sessions with TTL and
//!   liveness checks
//!
//! Console streams go through [`infrastructure::relay::RelayManager`], which
//! pairs each client WebSocket with its own upstream WebSocket and copies
//! frames opaquely in both directions.
//!
//! # Modules
//!
//! - [`domain`] - Priorities, ids, console tickets, classified upstream faults
//! - [`error`] - Error types for the crate
//! - [`port`] - Upstream session traits the pool and gateway are generic over
//! - [`infrastructure`] - Gate, rate, breaker, pool, gateway registry, relay, config
//! - [`application`] - Console broker and background refresh with stale cache
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use vmgate::infrastructure::config::Config;
//! use vmgate::infrastructure::relay::RelayManager;
//!
//! # async fn run() -> vmgate::error::Result<()> {
//! let config = Config::load("config.toml")?;
//! let relay = RelayManager::new(config.relay.clone())?;
//! let listener = relay.bind().await?;
//! relay.serve(listener).await;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
