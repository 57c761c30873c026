//! Scripted upstream for pool, gateway and refresh tests.
//!
//! [`ScriptedUpstream`] is the shared handle tests keep to script behaviour
//! and read counters; [`ScriptedConnector`] is what gets handed to the pool.
//!
//! - Connect results are popped from a queue (defaults to success).
//! - Call results are popped from a queue (defaults to `Ok("{op}@{session}")`).
//! - Individual sessions can be marked as failing their liveness ping.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{ConsoleTicket, UpstreamFault};
use crate::error::{Error, Result};
use crate::port::{UpstreamConnector, UpstreamSession};

#[derive(Default)]
struct UpstreamState {
    connect_results: Mutex<VecDeque<Result<()>>>,
    responses: Mutex<VecDeque<std::result::Result<String, UpstreamFault>>>,
    failing_pings: Mutex<HashSet<u64>>,
    live: Mutex<HashSet<u64>>,
    latency: Mutex<Duration>,
    ping_latency: Mutex<Duration>,
    console: Mutex<Option<(String, u16)>>,
    next_session: AtomicU64,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    pings: AtomicUsize,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Test-side handle to a scripted upstream host.
#[derive(Clone, Default)]
pub struct ScriptedUpstream {
    state: Arc<UpstreamState>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> ScriptedConnector {
        ScriptedConnector {
            upstream: self.clone(),
        }
    }

    pub fn push_connect_result(&self, result: Result<()>) {
        self.state.connect_results.lock().push_back(result);
    }

    pub fn push_response(&self, result: std::result::Result<String, UpstreamFault>) {
        self.state.responses.lock().push_back(result);
    }

    /// Queue `count` identical faults.
    pub fn push_faults(&self, fault: UpstreamFault, count: usize) {
        let mut responses = self.state.responses.lock();
        for _ in 0..count {
            responses.push_back(Err(fault.clone()));
        }
    }

    /// How long every call takes.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    /// Delay every ping by `latency` before it answers.
    pub fn set_ping_latency(&self, latency: Duration) {
        *self.state.ping_latency.lock() = latency;
    }

    /// Make the given session fail its next liveness checks.
    pub fn fail_ping(&self, session_id: u64) {
        self.state.failing_pings.lock().insert(session_id);
    }

    /// Console endpoint returned in tickets.
    pub fn set_console_endpoint(&self, host: &str, port: u16) {
        *self.state.console.lock() = Some((host.to_string(), port));
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet logged out.
    pub fn live_sessions(&self) -> usize {
        self.state.live.lock().len()
    }

    pub fn is_live(&self, session_id: u64) -> bool {
        self.state.live.lock().contains(&session_id)
    }
}

/// Connector handed to a [`ConnectionPool`](crate::infrastructure::pool::ConnectionPool).
pub struct ScriptedConnector {
    upstream: ScriptedUpstream,
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self) -> Result<ScriptedSession> {
        let state = &self.upstream.state;
        state.connects.fetch_add(1, Ordering::SeqCst);
        let scripted = state.connect_results.lock().pop_front().unwrap_or(Ok(()));
        scripted?;

        let id = state.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        state.live.lock().insert(id);
        Ok(ScriptedSession {
            id,
            upstream: self.upstream.clone(),
        })
    }

    fn host(&self) -> &str {
        "scripted.local"
    }
}

/// One scripted login.
pub struct ScriptedSession {
    id: u64,
    upstream: ScriptedUpstream,
}

impl ScriptedSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// A business call: waits the configured latency and returns the next
    /// scripted response.
    pub async fn call(&self, op: &str) -> std::result::Result<String, UpstreamFault> {
        let state = &self.upstream.state;
        state.calls.fetch_add(1, Ordering::SeqCst);
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *state.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let response = if self.upstream.is_live(self.id) {
            state
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("{op}@{}", self.id)))
        } else {
            Err(UpstreamFault::Unavailable(format!("session {} logged out", self.id)))
        };

        state.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    /// Acquire a console ticket tied to this session.
    pub async fn acquire_ticket(&self, vm: &str) -> std::result::Result<ConsoleTicket, UpstreamFault> {
        let raw = self.call(&format!("ticket-{vm}")).await?;
        let ticket = raw.replace(['@', '/'], "-");
        let (host, port) = self
            .upstream
            .state
            .console
            .lock()
            .clone()
            .unwrap_or_else(|| ("127.0.0.1".to_string(), 443));
        Ok(ConsoleTicket::new(ticket, host, port))
    }
}

#[async_trait]
impl UpstreamSession for ScriptedSession {
    async fn ping(&self) -> Result<()> {
        let state = &self.upstream.state;
        state.pings.fetch_add(1, Ordering::SeqCst);
        let latency = *state.ping_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if state.failing_pings.lock().contains(&self.id) || !self.upstream.is_live(self.id) {
            return Err(Error::Connection(format!("session {} not authenticated", self.id)));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let state = &self.upstream.state;
        state.disconnects.fetch_add(1, Ordering::SeqCst);
        state.live.lock().remove(&self.id);
    }
}
