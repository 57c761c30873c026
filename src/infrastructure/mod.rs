//! Infrastructure layer.
//!
//! Everything between business callers and the upstream host: admission,
//! spacing, failure isolation, session pooling and the console relay.
//!
//! # Submodules
//!
//! - [`admission`] - Priority admission gate (bounded concurrency)
//! - [`rate`] - Adaptive inter-request spacing
//! - [`breaker`] - Per-target circuit breaker
//! - [`pool`] - Pool of authenticated upstream sessions
//! - [`gateway`] - Per-target composition and the process registry
//! - [`relay`] - Console WebSocket relay
//! - [`config`] - Configuration loading and validation

pub mod admission;
pub mod breaker;
pub mod config;
pub mod gateway;
pub mod pool;
pub mod rate;
pub mod relay;
