//! Console broker: ticket through the gate, stream through the relay.
//!
//! Only ticket acquisition is admission-controlled, at
//! [`Priority::Critical`]. Once the relay session exists its traffic never
//! touches the gate again.

use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::info;

use crate::domain::{ConsoleTicket, Priority, SessionId};
use crate::error::Result;
use crate::infrastructure::gateway::{CallResult, TargetGateway};
use crate::infrastructure::relay::RelayManager;
use crate::port::UpstreamConnector;

/// What a client needs to attach to a freshly opened console.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleLease {
    pub session_id: SessionId,
    /// Path to open the client WebSocket on.
    pub attach_path: String,
    /// Hypervisor host serving the console.
    pub host: String,
}

/// Acquire a console ticket and register a relay session for it.
///
/// `fetch_ticket` runs on a pooled session while the gate permit is held, so
/// the session stays logged in until the ticket is in hand.
///
/// # Errors
///
/// Any gateway error from ticket acquisition; no relay session is created in
/// that case.
pub async fn open_console<C, F>(
    gateway: &TargetGateway<C>,
    relay: &RelayManager,
    fetch_ticket: F,
) -> Result<ConsoleLease>
where
    C: UpstreamConnector,
    F: for<'a> FnOnce(&'a C::Session) -> BoxFuture<'a, CallResult<ConsoleTicket>>,
{
    let ticket = gateway.execute(Priority::Critical, fetch_ticket).await?;
    let host = ticket.host.clone();
    let session_id = relay.create_session(ticket);
    let attach_path = relay.attach_path(&session_id);

    info!(
        target = %gateway.target(),
        session = %session_id,
        host = %host,
        "Console opened"
    );
    Ok(ConsoleLease {
        session_id,
        attach_path,
        host,
    })
}
