//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! The gateway never talks to the hypervisor API directly. Adapters implement
//! the outbound ports below and the pool, gateway and refresh service stay
//! generic over them.
//!
//! # Available Ports
//!
//! - [`UpstreamConnector`] - Opens one authenticated upstream session
//! - [`UpstreamSession`] - Liveness probe and teardown for a pooled session

pub mod outbound;

pub use outbound::upstream::{UpstreamConnector, UpstreamSession};
