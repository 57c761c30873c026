use std::time::Duration;

use thiserror::Error;

use crate::domain::{SessionId, UpstreamFault};

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Upstream signalled it is over capacity.
    #[error("upstream overloaded (retry hint: {retry_after:?})")]
    Overloaded { retry_after: Option<Duration> },

    /// No response, or no admission slot, within the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Fast-fail: the target's circuit breaker is open.
    #[error("circuit breaker open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// No pooled session became free within the wait budget.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// A session could not be (re)established.
    #[error("connection error: {0}")]
    Connection(String),

    /// Relay attach for a nonexistent or expired session id.
    #[error("unknown or expired session: {0}")]
    UnknownSession(SessionId),

    /// Non-transient upstream failure (not found, rejected).
    #[error(transparent)]
    Upstream(UpstreamFault),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map a classified upstream fault onto the gateway taxonomy.
    #[must_use]
    pub fn from_fault(fault: UpstreamFault, call_timeout: Duration) -> Self {
        match fault {
            UpstreamFault::Overloaded { retry_after } => Self::Overloaded { retry_after },
            UpstreamFault::Timeout => Self::Timeout(call_timeout),
            UpstreamFault::Unavailable(reason) => Self::Connection(reason),
            other => Self::Upstream(other),
        }
    }

    /// True when the caller should fall back to stale cached data instead of
    /// surfacing an error: the target is shedding load locally.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::PoolExhausted { .. })
    }

    /// True for failures that are expected to clear on their own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Overloaded { .. }
                | Self::Timeout(_)
                | Self::CircuitOpen { .. }
                | Self::PoolExhausted { .. }
                | Self::Connection(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}
