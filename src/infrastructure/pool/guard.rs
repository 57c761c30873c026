//! Scoped borrow of a pooled session.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use super::state::SharedSession;
use super::PoolInner;
use crate::port::UpstreamConnector;

/// A session borrowed from a [`ConnectionPool`](super::ConnectionPool).
///
/// Returned to the pool on drop, on every exit path. The pool never touches a
/// borrowed session, so anything derived from it (console tickets, API
/// cookies) stays valid for the whole borrow.
pub struct PooledConnection<C: UpstreamConnector> {
    pub(super) pool: Arc<PoolInner<C>>,
    pub(super) conn: SharedSession<C::Session>,
    pub(super) discard: bool,
    pub(super) _slot: OwnedSemaphorePermit,
}

impl<C: UpstreamConnector> PooledConnection<C> {
    /// Pool-local id of the underlying session.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.conn.id
    }

    /// Time since the underlying session was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.conn.created_at.elapsed()
    }

    /// Drop the session instead of returning it, e.g. after a call left it in
    /// an unknown state.
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl<C: UpstreamConnector> Deref for PooledConnection<C> {
    type Target = C::Session;

    fn deref(&self) -> &Self::Target {
        &self.conn.session
    }
}

impl<C: UpstreamConnector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.conn.id)
            .field("age", &self.age())
            .field("discard", &self.discard)
            .finish_non_exhaustive()
    }
}

impl<C: UpstreamConnector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if !self.discard {
            // Checked under the idle lock: `close` marks the pool closed
            // before draining, so a push here is always seen by the drain.
            let mut idle = self.pool.idle.lock();
            if !self.pool.slots.is_closed() {
                idle.push(self.conn.clone());
                return;
            }
            drop(idle);
            debug!(
                target = %self.pool.target,
                session = self.conn.id,
                "Pool closed, logging out returned session"
            );
        } else {
            debug!(target = %self.pool.target, session = self.conn.id, "Discarding session");
        }
        self.pool.total.fetch_sub(1, Ordering::Relaxed);
        self.pool.disconnect_later(self.conn.clone());
        // `_slot` drops after this body, so a waiting borrower finds the
        // session already back on the idle list.
    }
}

/// An idle session taken off the list for validation.
///
/// Until [`keep`](Self::keep) or [`retire`](Self::retire) is called the pool
/// still counts the session as its own. Dropping the checkout early (the
/// borrower gave up mid-ping) logs it out instead of losing it.
pub(super) struct Checkout<'a, C: UpstreamConnector> {
    pool: &'a PoolInner<C>,
    conn: SharedSession<C::Session>,
    armed: bool,
}

impl<'a, C: UpstreamConnector> Checkout<'a, C> {
    pub(super) fn new(pool: &'a PoolInner<C>, conn: SharedSession<C::Session>) -> Self {
        Self { pool, conn, armed: true }
    }

    pub(super) fn session(&self) -> &SharedSession<C::Session> {
        &self.conn
    }

    /// The session passed validation and goes to the borrower.
    pub(super) fn keep(mut self) -> SharedSession<C::Session> {
        self.armed = false;
        self.conn.clone()
    }

    /// The session failed validation: stop counting it and hand it back for
    /// logout.
    pub(super) fn retire(mut self) -> SharedSession<C::Session> {
        self.armed = false;
        self.pool.total.fetch_sub(1, Ordering::Relaxed);
        self.conn.clone()
    }
}

impl<C: UpstreamConnector> Drop for Checkout<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.total.fetch_sub(1, Ordering::Relaxed);
            debug!(
                target = %self.pool.target,
                session = self.conn.id,
                "Borrow abandoned during validation"
            );
            self.pool.disconnect_later(self.conn.clone());
        }
    }
}
