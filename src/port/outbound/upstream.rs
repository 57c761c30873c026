//! Upstream session port.
//!
//! A session is one authenticated login against the management API. Sessions
//! are expensive to create and the host caps how many may exist at once, so
//! they are pooled and reused.

use async_trait::async_trait;

use crate::error::Result;

/// One authenticated session against the upstream management API.
///
/// Business calls (listing machines, fetching metrics, acquiring console
/// tickets) live on the concrete type; the pool only needs liveness and
/// teardown.
#[async_trait]
pub trait UpstreamSession: Send + Sync + 'static {
    /// Cheap no-op round trip used to validate the session before reuse.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has expired or the host is unreachable.
    async fn ping(&self) -> Result<()>;

    /// Log out and release the upstream login slot.
    async fn disconnect(&self);
}

/// Factory for [`UpstreamSession`]s bound to one target host.
#[async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    type Session: UpstreamSession;

    /// Open and authenticate a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if login fails or the host cannot be reached.
    async fn connect(&self) -> Result<Self::Session>;

    /// Host name used in logs.
    fn host(&self) -> &str;
}
