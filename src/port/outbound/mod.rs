//! Outbound ports: what the gateway needs from the outside world.

pub mod upstream;
