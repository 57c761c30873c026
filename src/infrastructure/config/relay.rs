//! Console relay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the console relay listener and its upstream leg.
///
/// Idle timeout, total session lifetime and upstream keepalive are all
/// disabled unless set explicitly. The upstream console endpoint keeps its own
/// connection alive; injecting pings on a short default caused spurious
/// mid-session disconnects.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Address the client-facing WebSocket listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Path prefix clients attach on: `{path_prefix}/{session_id}`.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Sub-protocol requested from the upstream console endpoint.
    ///
    /// The upstream silently drops connections that omit it.
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
    /// `Origin` header sent on the upstream handshake.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Dial the upstream with `wss://` (true) or `ws://`.
    #[serde(default = "default_true")]
    pub upstream_tls: bool,
    /// Verify the upstream certificate. Hypervisors usually present
    /// self-signed certificates, hence off by default.
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How long a created session may wait for its client to attach.
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    /// Close a session after this long with no frames in either direction.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Hard cap on a session's total lifetime.
    #[serde(default)]
    pub max_session_secs: Option<u64>,
    /// Interval for pings sent on the upstream leg.
    #[serde(default)]
    pub keepalive_secs: Option<u64>,
    /// Grace period for closing both legs once a session ends.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

fn default_listen() -> String {
    "0.0.0.0:8765".into()
}

fn default_path_prefix() -> String {
    "/console".into()
}

fn default_subprotocol() -> String {
    "binary".into()
}

fn default_origin() -> String {
    "http://localhost".into()
}

const fn default_true() -> bool {
    true
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_pending_ttl_secs() -> u64 {
    60
}

const fn default_close_grace_ms() -> u64 {
    500
}

impl RelayConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub const fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn max_session(&self) -> Option<Duration> {
        self.max_session_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub const fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Client attach path for a session id.
    #[must_use]
    pub fn attach_path(&self, session_id: &str) -> String {
        format!("{}/{}", self.path_prefix.trim_end_matches('/'), session_id)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path_prefix: default_path_prefix(),
            subprotocol: default_subprotocol(),
            origin: default_origin(),
            upstream_tls: true,
            verify_tls: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            pending_ttl_secs: default_pending_ttl_secs(),
            idle_timeout_secs: None,
            max_session_secs: None,
            keepalive_secs: None,
            close_grace_ms: default_close_grace_ms(),
        }
    }
}
