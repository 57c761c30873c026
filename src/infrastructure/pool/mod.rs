//! Bounded pool of authenticated upstream sessions for one target.
//!
//! # Architecture
//!
//! A tokio [`Semaphore`] with `size` permits bounds how many sessions can be
//! borrowed at once; every [`PooledConnection`] holds one permit for its
//! lifetime. Free sessions wait on an idle list guarded by a mutex that is
//! only held for list manipulation, never across an upstream call.
//!
//! Sessions are created lazily: a borrow takes an idle session if one exists
//! and opens a new one otherwise. Since only permit holders create sessions
//! and the idle list is drained before creating, the number of live sessions
//! never exceeds `size`.
//!
//! Before an idle session is handed out it is checked against the TTL and,
//! when `validate_on_borrow` is set, pinged within the borrower's remaining
//! wait. A session failing either check is logged out and transparently
//! replaced (counted as a reconnect). Only a failed replacement surfaces to the
//! caller, as [`Error::Connection`]. A borrow cancelled mid-check logs the
//! session out rather than losing it, and sessions returned after
//! [`close`](ConnectionPool::close) are logged out too.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Error, Result};
use crate::infrastructure::config::PoolConfig;
use crate::port::{UpstreamConnector, UpstreamSession};

mod guard;
mod state;

use guard::Checkout;
pub use guard::PooledConnection;
use state::{PooledSession, SharedCounters, SharedSession};

pub(crate) struct PoolInner<C: UpstreamConnector> {
    target: String,
    connector: C,
    config: PoolConfig,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<SharedSession<C::Session>>>,
    /// Live sessions, idle and borrowed.
    total: AtomicUsize,
    next_id: AtomicU64,
    counters: SharedCounters,
}

/// Runtime statistics for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub reconnects: u64,
    pub errors: u64,
    pub exhausted: u64,
    pub borrows: u64,
}

/// Upstream session pool. Cheap to clone.
pub struct ConnectionPool<C: UpstreamConnector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: UpstreamConnector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: UpstreamConnector> ConnectionPool<C> {
    /// Create an empty pool. No session is opened until the first borrow.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` or `connection_ttl_secs` is zero.
    pub fn new(target: impl Into<String>, connector: C, config: PoolConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.size",
                reason: "must be > 0".to_string(),
            }
            .into());
        }
        if config.connection_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection_ttl_secs",
                reason: "must be > 0".to_string(),
            }
            .into());
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                target: target.into(),
                slots: Arc::new(Semaphore::new(config.size)),
                connector,
                config,
                idle: Mutex::new(Vec::new()),
                total: AtomicUsize::new(0),
                next_id: AtomicU64::new(0),
                counters: SharedCounters::new(),
            }),
        })
    }

    /// Borrow a session, waiting up to the configured acquire timeout.
    ///
    /// # Errors
    ///
    /// See [`get_timeout`](Self::get_timeout).
    pub async fn get(&self) -> Result<PooledConnection<C>> {
        self.get_timeout(self.inner.config.acquire_timeout()).await
    }

    /// Borrow a session, waiting up to `timeout` for one to free up.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] if every session stayed busy for `timeout`
    /// - [`Error::Connection`] if a new or replacement session could not be opened
    pub async fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection<C>> {
        let started = Instant::now();
        let slot = match tokio::time::timeout(timeout, self.inner.slots.clone().acquire_owned()).await {
            Ok(Ok(slot)) => slot,
            Ok(Err(_)) => return Err(Error::Connection("connection pool closed".to_string())),
            Err(_) => {
                self.inner.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                let waited = started.elapsed();
                warn!(
                    target = %self.inner.target,
                    waited_ms = waited.as_millis() as u64,
                    size = self.inner.config.size,
                    "Connection pool exhausted"
                );
                return Err(Error::PoolExhausted { waited });
            }
        };

        let candidate = self.inner.idle.lock().pop();
        let conn = match candidate {
            Some(conn) => {
                let budget = timeout.saturating_sub(started.elapsed());
                self.inner
                    .validate_or_replace(Checkout::new(&self.inner, conn), budget)
                    .await?
            }
            None => self.inner.create().await?,
        };

        self.inner.counters.borrows.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            pool: self.inner.clone(),
            conn,
            discard: false,
            _slot: slot,
        })
    }

    /// Host the connector logs into.
    pub fn host(&self) -> &str {
        self.inner.connector.host()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle.lock().len();
        let total = self.inner.total.load(Ordering::Relaxed);
        let counters = &self.inner.counters;
        PoolStats {
            size: self.inner.config.size,
            total,
            idle,
            in_use: self.inner.config.size - self.inner.slots.available_permits(),
            created: counters.created.load(Ordering::Relaxed),
            reconnects: counters.reconnects.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            exhausted: counters.exhausted.load(Ordering::Relaxed),
            borrows: counters.borrows.load(Ordering::Relaxed),
        }
    }

    /// Stop lending and log out every idle session.
    ///
    /// Borrowed sessions are left alone until returned, then logged out.
    pub async fn close(&self) {
        self.inner.slots.close();
        let drained: Vec<_> = std::mem::take(&mut *self.inner.idle.lock());
        for conn in drained {
            self.inner.total.fetch_sub(1, Ordering::Relaxed);
            conn.session.disconnect().await;
        }
        info!(target = %self.inner.target, "Connection pool closed");
    }
}

impl<C: UpstreamConnector> PoolInner<C> {
    async fn create(&self) -> Result<SharedSession<C::Session>> {
        match self.connector.connect().await {
            Ok(session) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                self.total.fetch_add(1, Ordering::Relaxed);
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target = %self.target,
                    host = self.connector.host(),
                    session = id,
                    "Opened upstream session"
                );
                Ok(Arc::new(PooledSession {
                    id,
                    session,
                    created_at: Instant::now(),
                }))
            }
            Err(err) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(target = %self.target, error = %err, "Failed to open upstream session");
                let reason = match err {
                    Error::Connection(reason) => reason,
                    other => other.to_string(),
                };
                Err(Error::Connection(reason))
            }
        }
    }

    /// Hand out a checked-out idle session, or log it out and open a fresh
    /// one. The ping gets whatever is left of the borrower's `budget`; no
    /// reply within it counts as a failed check.
    async fn validate_or_replace(
        &self,
        checkout: Checkout<'_, C>,
        budget: Duration,
    ) -> Result<SharedSession<C::Session>> {
        let conn = checkout.session();
        let id = conn.id;
        let age = conn.created_at.elapsed();
        let reason = if age >= self.config.connection_ttl() {
            Some(format!("expired after {}s", age.as_secs()))
        } else if self.config.validate_on_borrow {
            match tokio::time::timeout(budget, conn.session.ping()).await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(_) => Some(format!("no ping reply within {}ms", budget.as_millis())),
            }
        } else {
            None
        };

        let Some(reason) = reason else {
            return Ok(checkout.keep());
        };

        info!(
            target = %self.target,
            session = id,
            reason = %reason,
            "Replacing upstream session"
        );
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        // Logout runs as its own task so a cancelled borrow cannot cut it short.
        if let Some(logout) = self.disconnect_later(checkout.retire()) {
            let _ = logout.await;
        }

        self.create().await.map_err(|err| {
            Error::Connection(format!("replacement for session {id} failed: {err}"))
        })
    }

    /// Log a session out on its own task.
    fn disconnect_later(&self, conn: SharedSession<C::Session>) -> Option<JoinHandle<()>> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(async move { conn.session.disconnect().await })),
            Err(_) => {
                debug!(target = %self.target, session = conn.id, "No runtime, skipping logout");
                None
            }
        }
    }
}
