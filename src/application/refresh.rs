//! Background refresh of per-target snapshots.
//!
//! Runs as its own task: every `interval` it fetches one snapshot per target
//! through the gateway at [`Priority::Low`], so interactive requests always
//! overtake it in the admission queue. Failures leave the previous value in
//! the [`StaleCache`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::cache::StaleCache;
use crate::domain::Priority;
use crate::infrastructure::gateway::{CallResult, GatewayRegistry};
use crate::port::UpstreamConnector;

type Fetch<S, V> = Arc<dyn for<'a> Fn(&'a S) -> BoxFuture<'a, CallResult<V>> + Send + Sync>;

/// Counts from one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    /// Targets skipped because their breaker is open or pool exhausted.
    pub degraded: usize,
    pub failed: usize,
}

/// Periodic LOW-priority fetcher feeding a [`StaleCache`].
pub struct RefreshService<C: UpstreamConnector, V> {
    registry: Arc<GatewayRegistry<C>>,
    cache: Arc<StaleCache<V>>,
    fetch: Fetch<C::Session, V>,
    interval: Duration,
}

impl<C, V> RefreshService<C, V>
where
    C: UpstreamConnector,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F>(
        registry: Arc<GatewayRegistry<C>>,
        cache: Arc<StaleCache<V>>,
        interval: Duration,
        fetch: F,
    ) -> Self
    where
        F: for<'a> Fn(&'a C::Session) -> BoxFuture<'a, CallResult<V>> + Send + Sync + 'static,
    {
        Self {
            registry,
            cache,
            fetch: Arc::new(fetch),
            interval,
        }
    }

    pub fn cache(&self) -> &Arc<StaleCache<V>> {
        &self.cache
    }

    /// Refresh every target once.
    pub async fn refresh_once(&self) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let targets: Vec<_> = self.registry.targets().cloned().collect();

        for target in targets {
            let gateway = match self.registry.get(target.as_str()) {
                Ok(gateway) => gateway,
                Err(err) => {
                    warn!(target = %target, error = %err, "Refresh target vanished");
                    continue;
                }
            };

            let fetch = self.fetch.clone();
            match gateway
                .execute(Priority::Low, move |session| fetch(session))
                .await
            {
                Ok(value) => {
                    self.cache.store(&target, value);
                    summary.refreshed += 1;
                }
                Err(err) if err.is_degraded() => {
                    debug!(target = %target, error = %err, "Refresh skipped, serving stale data");
                    self.cache.record_error(&target, &err);
                    summary.degraded += 1;
                }
                Err(err) => {
                    warn!(target = %target, error = %err, "Refresh failed, keeping previous data");
                    self.cache.record_error(&target, &err);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Refresh on every tick until `shutdown` flips to true or closes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "Refresh service started");

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let summary = self.refresh_once().await;
                    debug!(
                        refreshed = summary.refreshed,
                        degraded = summary.degraded,
                        failed = summary.failed,
                        "Refresh pass complete"
                    );
                }
            }
        }
        info!("Refresh service stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;

    use super::*;
    use crate::domain::{TargetId, UpstreamFault};
    use crate::testkit;
    use crate::testkit::upstream::{ScriptedConnector, ScriptedUpstream};

    fn service(
        interval: Duration,
    ) -> (RefreshService<ScriptedConnector, String>, ScriptedUpstream) {
        let upstream = ScriptedUpstream::new();
        let config = testkit::config::gateway(2, 2);
        let registry =
            GatewayRegistry::from_config(&config, |_| upstream.connector()).unwrap();
        let service = RefreshService::new(
            Arc::new(registry),
            Arc::new(StaleCache::new()),
            interval,
            |session: &testkit::upstream::ScriptedSession| session.call("inventory").boxed(),
        );
        (service, upstream)
    }

    fn target() -> TargetId {
        TargetId::new(testkit::config::TARGET)
    }

    #[tokio::test]
    async fn test_refresh_populates_cache_at_low_priority() {
        let (service, _upstream) = service(Duration::from_secs(30));

        let summary = service.refresh_once().await;
        assert_eq!(summary.refreshed, 1);
        assert_eq!(service.cache().value(&target()), Some("inventory@1".to_string()));

        let stats = service.registry.get(testkit::config::TARGET).unwrap().status();
        assert_eq!(stats.gate.for_priority(Priority::Low).unwrap().admitted, 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_value() {
        let (service, upstream) = service(Duration::from_secs(30));
        service.refresh_once().await;

        upstream.push_response(Err(UpstreamFault::Rejected("maintenance".into())));
        let summary = service.refresh_once().await;
        assert_eq!(summary.failed, 1);

        let entry = service.cache().get(&target()).unwrap();
        assert_eq!(entry.value.as_deref(), Some("inventory@1"));
        assert!(entry.is_stale());
        assert!(entry.last_error.unwrap().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_open_breaker_counts_as_degraded() {
        let (service, upstream) = service(Duration::from_secs(30));
        service.refresh_once().await;
        upstream.push_faults(UpstreamFault::Overloaded { retry_after: None }, 2);
        service.refresh_once().await;
        service.refresh_once().await;

        let summary = service.refresh_once().await;
        assert_eq!(summary.degraded, 1);
        assert_eq!(service.cache().value(&target()), Some("inventory@1".to_string()));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (service, _upstream) = service(Duration::from_secs(30));
        service.refresh_once().await;
        assert!(service.cache().invalidate(&target()));
        assert!(service.cache().get(&target()).is_none());

        service.refresh_once().await;
        assert!(service.cache().value(&target()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let (service, upstream) = service(Duration::from_secs(10));
        let (tx, rx) = watch::channel(false);
        let handle = service.spawn(rx);

        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // Immediate first tick, then at 10s and 20s.
        assert_eq!(upstream.calls(), 3);
    }
}
