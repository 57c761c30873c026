//! Relay session records and counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::{ConsoleTicket, SessionId};

/// A console session created but not yet attached by a client.
pub(super) struct PendingSession {
    pub(super) ticket: ConsoleTicket,
    pub(super) created_at: Instant,
}

/// An attached session with both legs running.
pub(super) struct ActiveSession {
    pub(super) host: String,
    pub(super) activity: std::sync::Arc<Activity>,
    pub(super) cancel: oneshot::Sender<()>,
}

/// Per-session traffic and liveness, shared between the bridge loops.
///
/// Times are milliseconds since `started`, so a paused test clock drives
/// idle detection the same way the wall clock does.
pub struct Activity {
    started: Instant,
    last_ms: AtomicU64,
    to_upstream: AtomicU64,
    to_client: AtomicU64,
}

impl Activity {
    pub(super) fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: AtomicU64::new(0),
            to_upstream: AtomicU64::new(0),
            to_client: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub(super) fn record(&self, to_upstream: bool, bytes: usize) {
        let counter = if to_upstream {
            &self.to_upstream
        } else {
            &self.to_client
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    /// Time since the last relayed frame (or since start).
    pub(super) fn idle_for(&self) -> std::time::Duration {
        let idle = self.now_ms().saturating_sub(self.last_ms.load(Ordering::Relaxed));
        std::time::Duration::from_millis(idle)
    }

    pub(super) fn age(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    pub fn bytes_to_upstream(&self) -> u64 {
        self.to_upstream.load(Ordering::Relaxed)
    }

    pub fn bytes_to_client(&self) -> u64 {
        self.to_client.load(Ordering::Relaxed)
    }
}

/// Shared counters updated atomically by the manager and bridge tasks.
pub(super) struct RelayCounters {
    pub(super) created: AtomicU64,
    pub(super) attached: AtomicU64,
    pub(super) completed: AtomicU64,
    /// Attach attempts for unknown, used or expired ids.
    pub(super) rejected: AtomicU64,
    pub(super) expired: AtomicU64,
    /// Attaches whose upstream leg could not be opened.
    pub(super) failed: AtomicU64,
    pub(super) bytes_to_upstream: AtomicU64,
    pub(super) bytes_to_client: AtomicU64,
}

impl RelayCounters {
    pub(super) fn new() -> Self {
        Self {
            created: AtomicU64::new(0),
            attached: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_to_upstream: AtomicU64::new(0),
            bytes_to_client: AtomicU64::new(0),
        }
    }

    pub(super) fn absorb(&self, activity: &Activity) {
        self.bytes_to_upstream
            .fetch_add(activity.bytes_to_upstream(), Ordering::Relaxed);
        self.bytes_to_client
            .fetch_add(activity.bytes_to_client(), Ordering::Relaxed);
    }
}

/// Read-only relay statistics. Byte totals cover finished sessions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub pending: usize,
    pub connecting: usize,
    pub active: usize,
    pub created: u64,
    pub attached: u64,
    pub completed: u64,
    pub rejected: u64,
    pub expired: u64,
    pub failed: u64,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
}

/// One attached session, for status listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub host: String,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
}
