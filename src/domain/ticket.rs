//! Short-lived console access tickets.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

/// Ticket issued by the upstream host for one console connection.
///
/// The ticket is only valid for a short window and is bound to the session
/// that acquired it, so it must be used while that session is still alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleTicket {
    /// Opaque ticket token.
    pub ticket: String,
    /// Host serving the console endpoint (may differ from the API host).
    pub host: String,
    /// Console endpoint port.
    #[serde(default = "default_console_port")]
    pub port: u16,
    /// Certificate thumbprint reported alongside the ticket, if any.
    #[serde(default)]
    pub ssl_thumbprint: Option<String>,
}

const fn default_console_port() -> u16 {
    443
}

impl ConsoleTicket {
    pub fn new(ticket: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            ticket: ticket.into(),
            host: host.into(),
            port,
            ssl_thumbprint: None,
        }
    }

    /// Build the console WebSocket URL: `{scheme}://{host}:{port}/ticket/{ticket}`.
    ///
    /// # Errors
    ///
    /// Returns an error if host or ticket do not form a valid URL.
    pub fn endpoint(&self, tls: bool) -> Result<Url> {
        let scheme = if tls { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}/", self.host, self.port))?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .extend(["ticket", self.ticket.as_str()]);
        Ok(url)
    }
}
