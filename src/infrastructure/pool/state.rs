//! Connection pool internal state types.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::time::Instant;

/// Shared counters updated atomically by borrowers and guards.
pub(super) struct SharedCounters {
    /// Sessions opened, including replacements.
    pub(super) created: AtomicU64,
    /// Sessions replaced after failing TTL or liveness validation.
    pub(super) reconnects: AtomicU64,
    /// Failed session creations.
    pub(super) errors: AtomicU64,
    /// Borrows that gave up waiting for a free slot.
    pub(super) exhausted: AtomicU64,
    /// Successful borrows.
    pub(super) borrows: AtomicU64,
}

impl SharedCounters {
    pub(super) fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            borrows: AtomicU64::new(0),
        }
    }
}

/// One authenticated upstream session and when it was opened.
///
/// `created_at` is fixed for the session's lifetime; returning a session to
/// the pool never refreshes it.
pub(super) struct PooledSession<S> {
    pub(super) id: u64,
    pub(super) session: S,
    pub(super) created_at: Instant,
}

pub(super) type SharedSession<S> = Arc<PooledSession<S>>;
