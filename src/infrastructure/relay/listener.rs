//! Client-facing WebSocket listener.
//!
//! The session id is checked during the HTTP upgrade, so unknown or expired
//! ids are refused with a plain 404 before any WebSocket is established. The
//! session is only claimed once the handshake has completed; a client that
//! drops mid-upgrade leaves it pending.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tracing::{debug, info, warn};

use super::RelayManager;
use crate::domain::SessionId;
use crate::error::Result;

type Target = Arc<Mutex<Option<SessionId>>>;

impl RelayManager {
    /// Bind the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(&self.inner.config.listen).await?)
    }

    /// Accept client connections forever, one task per connection.
    pub async fn serve(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, prefix = %self.inner.config.path_prefix, "Console relay listening");
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let manager = self.clone();
                    tokio::spawn(async move { manager.handle_client(stream, peer).await });
                }
                Err(err) => warn!(error = %err, "Console relay accept failed"),
            }
        }
    }

    /// Session id addressed by an attach path, if the path has the right shape.
    pub(super) fn session_from_path(&self, path: &str) -> Option<SessionId> {
        let prefix = self.inner.config.path_prefix.trim_end_matches('/');
        let id = path.strip_prefix(prefix)?.strip_prefix('/')?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        Some(SessionId::new(id))
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) {
        let target: Target = Arc::new(Mutex::new(None));
        let slot = target.clone();
        let manager = self.clone();

        let callback = move |request: &Request,
                             mut response: Response|
              -> std::result::Result<Response, ErrorResponse> {
            let path = request.uri().path();
            let Some(id) = manager.session_from_path(path) else {
                return Err(refuse(StatusCode::NOT_FOUND, "unknown console path"));
            };
            manager
                .check_attachable(&id)
                .map_err(|_| refuse(StatusCode::NOT_FOUND, "unknown or expired console session"))?;

            // Echo the first offered sub-protocol; browsers drop the socket otherwise.
            let offered = request
                .headers()
                .get(header::SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').map(str::trim).find(|p| !p.is_empty()))
                .and_then(|p| HeaderValue::from_str(p).ok());
            if let Some(protocol) = offered {
                response
                    .headers_mut()
                    .insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);
            }

            *slot.lock() = Some(id);
            Ok(response)
        };

        let client = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(client) => client,
            Err(err) => {
                debug!(%peer, error = %err, "Console upgrade refused");
                return;
            }
        };

        let Some(id) = target.lock().take() else {
            return;
        };
        debug!(%peer, session = %id, "Console client connected");
        if let Err(err) = self.attach(&id, client).await {
            debug!(%peer, session = %id, error = %err, "Console attach failed");
        }
    }
}

fn refuse(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}
