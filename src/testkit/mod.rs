//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`upstream`] - Scripted [`UpstreamConnector`](crate::port::UpstreamConnector)
//!   and session with per-call fault injection and concurrency tracking.
//! - [`console`] - Loopback WebSocket console host that insists on the binary
//!   sub-protocol and echoes frames.
//! - [`config`] - Canonical test configurations (fast timeouts, small pools).

pub mod config;
pub mod console;
pub mod upstream;
