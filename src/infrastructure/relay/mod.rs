//! Console session relay.
//!
//! A console request registers a *pending* session holding a short-lived
//! upstream ticket. When the client's WebSocket arrives at
//! `{path_prefix}/{session_id}` the upgrade is checked against the pending
//! table, the session is claimed (single use) once the handshake completes,
//! the upstream console socket is dialled with the ticket, and two
//! independent loops copy frames between the legs until either side stops.
//! A session is closable at every stage, including while its upstream leg is
//! still connecting.
//!
//! Sessions share nothing but the manager's lookup tables and counters: no
//! ordering, no rate limiting, no admission. Ending one session never touches
//! another.

mod bridge;
mod dial;
mod listener;
mod session;


use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::domain::{ConsoleTicket, SessionId};
use crate::error::{Error, Result};
use crate::infrastructure::config::RelayConfig;

pub use bridge::{EndReason, Leg};
pub use session::{RelayStats, SessionInfo};

use bridge::BridgeOptions;
use session::{Activity, ActiveSession, PendingSession, RelayCounters};

struct RelayInner {
    config: RelayConfig,
    tls: Option<Arc<ClientConfig>>,
    pending: DashMap<SessionId, PendingSession>,
    /// Claimed sessions whose upstream leg is still being dialled.
    connecting: DashMap<SessionId, oneshot::Sender<()>>,
    active: DashMap<SessionId, ActiveSession>,
    counters: RelayCounters,
}

/// Owns every console session in the process.
///
/// Cheap to clone; clones share the same session tables.
#[derive(Clone)]
pub struct RelayManager {
    inner: Arc<RelayInner>,
}

/// Handle to a running relay session.
#[derive(Debug)]
pub struct RelayHandle {
    id: SessionId,
    task: JoinHandle<EndReason>,
}

impl RelayHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Wait for the session to end.
    pub async fn wait(self) -> EndReason {
        self.task.await.unwrap_or(EndReason::Cancelled)
    }
}

impl RelayManager {
    /// Create a manager for the given relay settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream TLS configuration cannot be built.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let tls = dial::tls_config(&config)?;
        Ok(Self {
            inner: Arc::new(RelayInner {
                config,
                tls,
                pending: DashMap::new(),
                connecting: DashMap::new(),
                active: DashMap::new(),
                counters: RelayCounters::new(),
            }),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Register a console session for `ticket` and return its id.
    ///
    /// The session stays claimable for `pending_ttl`.
    pub fn create_session(&self, ticket: ConsoleTicket) -> SessionId {
        self.purge_expired();

        let id = SessionId::generate();
        info!(session = %id, host = %ticket.host, port = ticket.port, "Console session created");
        self.inner.pending.insert(
            id.clone(),
            PendingSession {
                ticket,
                created_at: Instant::now(),
            },
        );
        self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Path a client connects to in order to attach to `id`.
    pub fn attach_path(&self, id: &SessionId) -> String {
        self.inner.config.attach_path(id.as_str())
    }

    /// True if `id` is registered, unexpired and not yet attached.
    pub fn is_pending(&self, id: &SessionId) -> bool {
        let ttl = self.inner.config.pending_ttl();
        self.inner
            .pending
            .get(id)
            .is_some_and(|s| s.created_at.elapsed() < ttl)
    }

    /// Take a pending session for attachment. Ids are single use.
    fn claim(&self, id: &SessionId) -> Result<PendingSession> {
        let Some((_, pending)) = self.inner.pending.remove(id) else {
            return Err(self.reject(id, false));
        };
        if pending.created_at.elapsed() >= self.inner.config.pending_ttl() {
            return Err(self.reject(id, true));
        }
        Ok(pending)
    }

    /// Check that `id` could be claimed, without claiming it.
    ///
    /// Unknown ids are counted as rejected and expired ones are dropped, just
    /// as a failed [`claim`](Self::claim) would.
    fn check_attachable(&self, id: &SessionId) -> Result<()> {
        let ttl = self.inner.config.pending_ttl();
        let expired = self
            .inner
            .pending
            .get(id)
            .map(|s| s.created_at.elapsed() >= ttl);
        match expired {
            Some(false) => Ok(()),
            Some(true) => {
                self.inner.pending.remove(id);
                Err(self.reject(id, true))
            }
            None => Err(self.reject(id, false)),
        }
    }

    fn reject(&self, id: &SessionId, expired: bool) -> Error {
        let counters = &self.inner.counters;
        counters.rejected.fetch_add(1, Ordering::Relaxed);
        if expired {
            counters.expired.fetch_add(1, Ordering::Relaxed);
            warn!(session = %id, "Attach for expired console session");
        } else {
            warn!(session = %id, "Attach for unknown console session");
        }
        Error::UnknownSession(id.clone())
    }

    /// Attach an already-upgraded client socket to session `id`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownSession`] for unknown, used or expired ids
    /// - the dial error if the upstream console cannot be reached
    ///
    /// The client socket is closed on error.
    pub async fn attach<S>(&self, id: &SessionId, mut client: WebSocketStream<S>) -> Result<RelayHandle>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match self.claim(id) {
            Ok(pending) => self.start(id.clone(), pending, client).await,
            Err(err) => {
                let _ = client.close(Some(close_frame(CloseCode::Policy, "unknown session"))).await;
                Err(err)
            }
        }
    }

    async fn start<S>(
        &self,
        id: SessionId,
        pending: PendingSession,
        mut client: WebSocketStream<S>,
    ) -> Result<RelayHandle>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let config = &self.inner.config;
        let ticket = pending.ticket;
        let (cancel, mut cancel_rx) = oneshot::channel();
        self.inner.connecting.insert(id.clone(), cancel);

        let dialled = tokio::select! {
            dialled = dial::dial(config, self.inner.tls.clone(), &ticket) => Some(dialled),
            _ = &mut cancel_rx => None,
        };
        let cancel = self.inner.connecting.remove(&id).map(|(_, cancel)| cancel);

        let (upstream, cancel) = match (dialled, cancel) {
            (Some(Err(err)), _) => {
                self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(session = %id, host = %ticket.host, error = %err, "Upstream console dial failed");
                let _ = client
                    .close(Some(close_frame(CloseCode::Error, "upstream unavailable")))
                    .await;
                return Err(err);
            }
            (Some(Ok(upstream)), Some(cancel)) => (upstream, cancel),
            (dialled, _) => {
                // Closed while connecting.
                if let Some(Ok(mut upstream)) = dialled {
                    let _ = upstream.close(None).await;
                }
                debug!(session = %id, "Console session closed before attaching");
                let _ = client
                    .close(Some(close_frame(CloseCode::Normal, "session closed")))
                    .await;
                return Err(Error::UnknownSession(id));
            }
        };

        let activity = Arc::new(Activity::new());
        self.inner.active.insert(
            id.clone(),
            ActiveSession {
                host: ticket.host.clone(),
                activity: activity.clone(),
                cancel,
            },
        );
        self.inner.counters.attached.fetch_add(1, Ordering::Relaxed);
        info!(session = %id, host = %ticket.host, "Console session attached");

        let options = BridgeOptions {
            idle_timeout: config.idle_timeout(),
            max_session: config.max_session(),
            keepalive: config.keepalive(),
            close_grace: config.close_grace(),
        };
        let inner = self.inner.clone();
        let session = id.clone();
        let task = tokio::spawn(async move {
            let reason = bridge::run(client, upstream, options, cancel_rx, &activity).await;

            inner.active.remove(&session);
            inner.counters.completed.fetch_add(1, Ordering::Relaxed);
            inner.counters.absorb(&activity);
            info!(
                session = %session,
                reason = %reason,
                duration_secs = activity.age().as_secs(),
                bytes_to_upstream = activity.bytes_to_upstream(),
                bytes_to_client = activity.bytes_to_client(),
                "Console session ended"
            );
            reason
        });

        Ok(RelayHandle { id, task })
    }

    /// Close a session. Returns false if the id is not known.
    ///
    /// An attached session is cancelled and both legs are closed. One still
    /// connecting upstream is abandoned and its client closed; a pending one
    /// is simply dropped.
    pub fn close(&self, id: &SessionId) -> bool {
        if let Some((_, session)) = self.inner.active.remove(id) {
            debug!(session = %id, "Cancelling console session");
            let _ = session.cancel.send(());
            return true;
        }
        if let Some((_, cancel)) = self.inner.connecting.remove(id) {
            debug!(session = %id, "Cancelling console session while connecting");
            let _ = cancel.send(());
            return true;
        }
        self.inner.pending.remove(id).is_some()
    }

    /// Cancel every attached or connecting session and drop all pending ones.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self
            .inner
            .active
            .iter()
            .map(|e| e.key().clone())
            .chain(self.inner.connecting.iter().map(|e| e.key().clone()))
            .collect();
        for id in &ids {
            self.close(id);
        }
        self.inner.pending.clear();
        info!(cancelled = ids.len(), "Console relay shut down");
    }

    pub fn stats(&self) -> RelayStats {
        self.purge_expired();
        let c = &self.inner.counters;
        RelayStats {
            pending: self.inner.pending.len(),
            connecting: self.inner.connecting.len(),
            active: self.inner.active.len(),
            created: c.created.load(Ordering::Relaxed),
            attached: c.attached.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            bytes_to_upstream: c.bytes_to_upstream.load(Ordering::Relaxed),
            bytes_to_client: c.bytes_to_client.load(Ordering::Relaxed),
        }
    }

    /// Attached sessions, for status listings.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.inner
            .active
            .iter()
            .map(|entry| {
                let activity = &entry.activity;
                SessionInfo {
                    id: entry.key().clone(),
                    host: entry.host.clone(),
                    age_secs: activity.age().as_secs(),
                    idle_secs: activity.idle_for().as_secs(),
                    bytes_to_upstream: activity.bytes_to_upstream(),
                    bytes_to_client: activity.bytes_to_client(),
                }
            })
            .collect()
    }

    fn purge_expired(&self) {
        let ttl = self.inner.config.pending_ttl();
        let mut expired = 0u64;
        self.inner.pending.retain(|id, session| {
            let keep = session.created_at.elapsed() < ttl;
            if !keep {
                debug!(session = %id, "Pending console session expired");
                expired += 1;
            }
            keep
        });
        if expired > 0 {
            self.inner
                .counters
                .expired
                .fetch_add(expired, Ordering::Relaxed);
        }
    }
}

fn close_frame(code: CloseCode, reason: &'static str) -> CloseFrame<'static> {
    CloseFrame {
        code,
        reason: reason.into(),
    }
}
