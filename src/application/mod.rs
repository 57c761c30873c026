//! Application services (use cases).
//!
//! These services sit on top of the gateway registry and relay: opening
//! consoles and keeping cached snapshots warm.

pub mod cache;
pub mod console;
pub mod refresh;

pub use cache::{CacheEntry, StaleCache};
pub use console::{open_console, ConsoleLease};
pub use refresh::{RefreshService, RefreshSummary};
