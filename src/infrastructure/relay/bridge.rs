//! Two-way frame pump between a client and an upstream console socket.
//!
//! Data frames are forwarded as-is in both directions; they are never parsed.
//! Control frames (ping, pong) are answered by each socket locally and not
//! forwarded. The first loop to stop, or the cancel signal, or an idle/total
//! timeout, ends the session; both sockets are then closed within the grace
//! period.

use std::fmt;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use super::session::Activity;

/// Which socket of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Upstream,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Upstream => "upstream",
        })
    }
}

/// Why a relay session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// That leg closed cleanly or hit end of stream.
    Closed(Leg),
    /// Read or write error on that leg.
    Failed(Leg, String),
    /// Closed through [`RelayManager::close`](super::RelayManager::close).
    Cancelled,
    IdleTimeout,
    SessionLimit,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(leg) => write!(f, "{leg} closed"),
            Self::Failed(leg, err) => write!(f, "{leg} failed: {err}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::SessionLimit => f.write_str("session time limit"),
        }
    }
}

pub(super) struct BridgeOptions {
    pub(super) idle_timeout: Option<Duration>,
    pub(super) max_session: Option<Duration>,
    /// Ping the upstream leg at this period. Off unless configured.
    pub(super) keepalive: Option<Duration>,
    pub(super) close_grace: Duration,
}

/// Relay frames until either side stops, then close both sockets.
pub(super) async fn run<C, U>(
    client: WebSocketStream<C>,
    upstream: WebSocketStream<U>,
    options: BridgeOptions,
    cancel: oneshot::Receiver<()>,
    activity: &Activity,
) -> EndReason
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let reason = {
        let to_upstream = pump(
            &mut client_rx,
            &mut upstream_tx,
            Leg::Client,
            options.keepalive,
            activity,
        );
        let to_client = pump(&mut upstream_rx, &mut client_tx, Leg::Upstream, None, activity);

        tokio::select! {
            reason = to_upstream => reason,
            reason = to_client => reason,
            _ = cancel => EndReason::Cancelled,
            reason = watchdog(options.idle_timeout, activity) => reason,
            () = deadline(options.max_session) => EndReason::SessionLimit,
        }
    };

    let grace = options.close_grace;
    let _ = tokio::join!(
        tokio::time::timeout(grace, client_tx.close()),
        tokio::time::timeout(grace, upstream_tx.close()),
    );
    reason
}

/// Copy data frames from `source` to `sink` until `source` ends.
async fn pump<R, W>(
    source: &mut R,
    sink: &mut W,
    from: Leg,
    keepalive: Option<Duration>,
    activity: &Activity,
) -> EndReason
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    let to = match from {
        Leg::Client => Leg::Upstream,
        Leg::Upstream => Leg::Client,
    };
    let mut ticker = keepalive.map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let next = tokio::select! {
            next = source.next() => next,
            () = tick(&mut ticker) => {
                if let Err(err) = sink.send(Message::Ping(Vec::new())).await {
                    return EndReason::Failed(to, err.to_string());
                }
                continue;
            }
        };

        match next {
            Some(Ok(message @ (Message::Binary(_) | Message::Text(_)))) => {
                let len = message.len();
                if let Err(err) = sink.send(message).await {
                    return EndReason::Failed(to, err.to_string());
                }
                activity.record(from == Leg::Client, len);
            }
            Some(Ok(Message::Close(_))) | None => return EndReason::Closed(from),
            Some(Ok(_)) => {}
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                return EndReason::Closed(from)
            }
            Some(Err(err)) => return EndReason::Failed(from, err.to_string()),
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn watchdog(idle_timeout: Option<Duration>, activity: &Activity) -> EndReason {
    let Some(limit) = idle_timeout else {
        return std::future::pending().await;
    };
    loop {
        let idle = activity.idle_for();
        if idle >= limit {
            return EndReason::IdleTimeout;
        }
        tokio::time::sleep(limit - idle).await;
    }
}

async fn deadline(max_session: Option<Duration>) {
    match max_session {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
