//! Per-target composition of gate, rate controller, breaker and pool.
//!
//! [`TargetGateway::execute`] is the one way business code reaches an
//! upstream target:
//!
//! 1. acquire an admission permit at the caller's priority (fails fast when
//!    the breaker is open)
//! 2. borrow a pooled session
//! 3. run the call under the call deadline
//! 4. report the outcome to the rate controller and breaker
//! 5. return the session and the permit
//!
//! Step 5 happens on every exit path: both resources are RAII guards.

mod registry;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{CallOutcome, Priority, TargetId, UpstreamFault};
use crate::error::{Error, Result};
use crate::infrastructure::admission::{AdmissionGate, GateStats};
use crate::infrastructure::breaker::{BreakerStatus, CircuitBreaker};
use crate::infrastructure::config::Config;
use crate::infrastructure::pool::{ConnectionPool, PoolStats};
use crate::infrastructure::rate::{RateController, RateSnapshot};
use crate::port::UpstreamConnector;

pub use registry::{GatewayRegistry, GatewayStatus};

/// Result of one upstream business call, before gateway mapping.
pub type CallResult<T> = std::result::Result<T, UpstreamFault>;

/// Observability snapshot for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target: TargetId,
    pub host: String,
    pub gate: GateStats,
    pub rate: RateSnapshot,
    pub breaker: BreakerStatus,
    pub pool: PoolStats,
}

/// Everything protecting one upstream target.
pub struct TargetGateway<C: UpstreamConnector> {
    target: TargetId,
    gate: AdmissionGate,
    rate: Arc<RateController>,
    breaker: Arc<CircuitBreaker>,
    pool: ConnectionPool<C>,
    call_timeout: Duration,
}

impl<C: UpstreamConnector> TargetGateway<C> {
    /// Build the gateway for `target` from the shared configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool settings are invalid.
    pub fn new(target: TargetId, connector: C, config: &Config) -> Result<Self> {
        let name = target.as_str();
        let rate = Arc::new(RateController::new(&config.rate));
        let breaker = Arc::new(CircuitBreaker::new(name, config.breaker.clone()));
        let gate = AdmissionGate::new(name, &config.gate, rate.clone(), breaker.clone());
        let pool = ConnectionPool::new(name, connector, config.pool.clone())?;

        info!(
            target = %target,
            max_concurrent = config.gate.max_concurrent,
            pool_size = config.pool.size,
            "Target gateway ready"
        );
        Ok(Self {
            target,
            gate,
            rate,
            breaker,
            pool,
            call_timeout: config.gate.call_timeout(),
        })
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Run `call` against a pooled session once admitted at `priority`.
    ///
    /// The closure receives the borrowed session; anything it derives from
    /// the session (tickets, cookies) stays valid until it returns.
    ///
    /// # Errors
    ///
    /// - [`Error::CircuitOpen`] or [`Error::PoolExhausted`]: the target is
    ///   shedding load; callers should serve stale data
    ///   ([`Error::is_degraded`])
    /// - [`Error::Timeout`] for admission or call deadlines
    /// - [`Error::Connection`] if no session could be established
    /// - the mapped [`UpstreamFault`] otherwise
    pub async fn execute<T, F>(&self, priority: Priority, call: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a C::Session) -> BoxFuture<'a, CallResult<T>>,
    {
        let permit = self.gate.acquire(priority).await?;

        let conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(err @ Error::PoolExhausted { .. }) => {
                // Local shortage, not an upstream signal.
                permit.release();
                return Err(err);
            }
            Err(err) => {
                permit.complete(&CallOutcome::Failure(UpstreamFault::Unavailable(
                    err.to_string(),
                )));
                return Err(err);
            }
        };

        let result = tokio::time::timeout(self.call_timeout, call(&*conn))
            .await
            .unwrap_or(Err(UpstreamFault::Timeout));
        let outcome = CallOutcome::of(&result);

        // A timed out or dropped session is in an unknown state.
        if matches!(
            outcome.fault(),
            Some(UpstreamFault::Timeout | UpstreamFault::Unavailable(_))
        ) {
            debug!(target = %self.target, session = conn.id(), "Discarding session after failed call");
            conn.discard();
        } else {
            drop(conn);
        }
        permit.complete(&outcome);

        result.map_err(|fault| Error::from_fault(fault, self.call_timeout))
    }

    /// Force the breaker closed.
    pub fn reset_breaker(&self) {
        info!(target = %self.target, "Circuit breaker reset by operator");
        self.breaker.reset();
    }

    pub fn status(&self) -> TargetStatus {
        TargetStatus {
            target: self.target.clone(),
            host: self.pool.host().to_string(),
            gate: self.gate.stats(),
            rate: self.rate.snapshot(),
            breaker: self.breaker.status(),
            pool: self.pool.stats(),
        }
    }

    /// Log out every idle session.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
