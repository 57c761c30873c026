//! Upstream-agnostic domain types.
//!
//! Everything the gateway and relay need to talk about without knowing which
//! hypervisor API sits on the other side: request priorities, identifiers,
//! console tickets, and the closed set of upstream fault kinds.

pub mod circuit;
pub mod fault;
pub mod id;
pub mod priority;
pub mod ticket;

pub use circuit::CircuitState;
pub use fault::{CallOutcome, UpstreamFault};
pub use id::{SessionId, TargetId};
pub use priority::Priority;
pub use ticket::ConsoleTicket;
