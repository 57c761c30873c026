use std::sync::Arc;

use futures_util::FutureExt;

use super::*;
use crate::domain::CircuitState;
use crate::testkit;
use crate::testkit::upstream::{ScriptedConnector, ScriptedUpstream};

// -- Helpers --------------------------------------------------------------

fn gateway_with(config: &Config) -> (Arc<TargetGateway<ScriptedConnector>>, ScriptedUpstream) {
    let upstream = ScriptedUpstream::new();
    let gateway =
        TargetGateway::new(TargetId::new(testkit::config::TARGET), upstream.connector(), config)
            .unwrap();
    (Arc::new(gateway), upstream)
}

fn gateway(
    max_concurrent: usize,
    failure_threshold: u32,
) -> (Arc<TargetGateway<ScriptedConnector>>, ScriptedUpstream) {
    gateway_with(&testkit::config::gateway(max_concurrent, failure_threshold))
}

// -- Happy path -----------------------------------------------------------

#[tokio::test]
async fn test_execute_runs_call_on_pooled_session() {
    let (gateway, upstream) = gateway(2, 5);

    let first = gateway
        .execute(Priority::Normal, |s| s.call("list-vms").boxed())
        .await
        .unwrap();
    let second = gateway
        .execute(Priority::Normal, |s| s.call("list-vms").boxed())
        .await
        .unwrap();

    assert_eq!(first, "list-vms@1");
    assert_eq!(second, "list-vms@1");
    assert_eq!(upstream.connects(), 1);

    let status = gateway.status();
    assert_eq!(status.gate.succeeded, 2);
    assert_eq!(status.gate.active, 0);
    assert_eq!(status.pool.in_use, 0);
    assert_eq!(status.pool.idle, 1);
}

#[tokio::test]
async fn test_ticket_valid_for_whole_call() {
    let (gateway, upstream) = gateway(1, 5);

    let (ticket, live) = gateway
        .execute(Priority::Critical, |s| {
            let upstream = upstream.clone();
            async move {
                let ticket = s.acquire_ticket("vm-42").await?;
                Ok::<_, UpstreamFault>((ticket, upstream.is_live(s.id())))
            }
            .boxed()
        })
        .await
        .unwrap();

    assert!(live);
    assert!(ticket.ticket.contains("vm-42"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bounded_by_gate() {
    let (gateway, upstream) = gateway(3, 5);
    upstream.set_latency(Duration::from_millis(100));

    let mut handles = Vec::new();
    for i in 0..12 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            gateway
                .execute(Priority::Normal, move |s| {
                    async move {
                        let op = format!("op-{i}");
                        s.call(&op).await
                    }
                    .boxed()
                })
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert!(upstream.peak_in_flight() <= 3);
    assert!(upstream.connects() <= 3);
}

// -- Failure accounting ---------------------------------------------------

#[tokio::test]
async fn test_overloads_open_breaker_then_fail_fast() {
    let (gateway, upstream) = gateway(2, 5);
    upstream.push_faults(UpstreamFault::Overloaded { retry_after: None }, 5);

    for _ in 0..5 {
        let err = gateway
            .execute(Priority::Normal, |s| s.call("stats").boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Overloaded { .. }));
    }
    assert_eq!(gateway.status().breaker.state, CircuitState::Open);

    let calls = upstream.calls();
    let err = gateway
        .execute(Priority::Critical, |s| s.call("stats").boxed())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert!(err.is_degraded());
    assert_eq!(upstream.calls(), calls);
}

#[tokio::test]
async fn test_business_fault_keeps_session_and_health() {
    let (gateway, upstream) = gateway(1, 2);
    upstream.push_faults(UpstreamFault::NotFound("vm-9".into()), 3);

    for _ in 0..3 {
        let err = gateway
            .execute(Priority::Normal, |s| s.call("get-vm").boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(UpstreamFault::NotFound(_))));
    }

    let status = gateway.status();
    assert_eq!(status.breaker.state, CircuitState::Closed);
    assert_eq!(status.breaker.failure_count, 0);
    assert_eq!(upstream.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_discards_session() {
    let mut config = testkit::config::gateway(1, 5);
    config.gate.call_timeout_secs = 1;
    let (gateway, upstream) = gateway_with(&config);
    upstream.set_latency(Duration::from_secs(10));

    let err = gateway
        .execute(Priority::Normal, |s| s.call("slow").boxed())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(1)));

    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert_eq!(upstream.disconnects(), 1);
    assert_eq!(gateway.status().pool.total, 0);
    assert_eq!(gateway.status().breaker.failure_count, 1);
}

#[tokio::test]
async fn test_connect_failure_counts_against_health() {
    let (gateway, upstream) = gateway(1, 5);
    upstream.push_connect_result(Err(Error::Connection("bad credentials".into())));

    let err = gateway
        .execute(Priority::Normal, |s| s.call("x").boxed())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    let status = gateway.status();
    assert_eq!(status.breaker.failure_count, 1);
    assert_eq!(status.gate.failed, 1);
    assert_eq!(status.gate.active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_exhaustion_is_local() {
    let mut config = testkit::config::gateway(2, 1);
    config.pool.size = 1;
    config.pool.acquire_timeout_secs = 1;
    let (gateway, upstream) = gateway_with(&config);
    upstream.set_latency(Duration::from_secs(5));

    let busy = gateway.clone();
    let held = tokio::spawn(async move {
        busy.execute(Priority::Normal, |s| s.call("long").boxed()).await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = gateway
        .execute(Priority::Normal, |s| s.call("short").boxed())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { .. }));
    assert!(err.is_degraded());

    // A breaker with threshold 1 would have opened on a counted failure.
    assert_eq!(gateway.status().breaker.state, CircuitState::Closed);
    assert!(held.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_reset_breaker_closes_circuit() {
    let (gateway, upstream) = gateway(1, 1);
    upstream.push_faults(UpstreamFault::Timeout, 1);
    let _ = gateway
        .execute(Priority::Normal, |s| s.call("x").boxed())
        .await;
    assert_eq!(gateway.status().breaker.state, CircuitState::Open);

    gateway.reset_breaker();
    assert_eq!(gateway.status().breaker.state, CircuitState::Closed);
    assert!(gateway
        .execute(Priority::Normal, |s| s.call("x").boxed())
        .await
        .is_ok());
}

// -- Registry -------------------------------------------------------------

#[tokio::test]
async fn test_registry_builds_enabled_targets_only() {
    let mut config = testkit::config::gateway(2, 5);
    let mut disabled = testkit::config::target("esxi-off");
    disabled.enabled = false;
    config.targets.push(disabled);
    config.targets.push(testkit::config::target("esxi-two"));

    let upstream = ScriptedUpstream::new();
    let registry = GatewayRegistry::from_config(&config, |_| upstream.connector()).unwrap();

    let ids: Vec<&str> = registry.targets().map(TargetId::as_str).collect();
    assert_eq!(ids, vec!["esxi-test", "esxi-two"]);
    assert!(matches!(
        registry.get("esxi-off"),
        Err(Error::Config(crate::error::ConfigError::UnknownTarget(_)))
    ));
    assert!(registry.get("esxi-two").is_ok());
}

#[tokio::test]
async fn test_registry_status_serializes() {
    let config = testkit::config::gateway(2, 5);
    let upstream = ScriptedUpstream::new();
    let relay = crate::infrastructure::relay::RelayManager::new(config.relay.clone()).unwrap();
    let registry = GatewayRegistry::from_config(&config, |_| upstream.connector())
        .unwrap()
        .with_relay(relay);

    registry
        .get(testkit::config::TARGET)
        .unwrap()
        .execute(Priority::Low, |s| s.call("refresh").boxed())
        .await
        .unwrap();

    let json = serde_json::to_value(registry.status()).unwrap();
    let target = &json["targets"][0];
    assert_eq!(target["target"], "esxi-test");
    assert_eq!(target["breaker"]["state"], "closed");
    assert_eq!(target["pool"]["created"], 1);
    assert_eq!(target["gate"]["total_requests"], 1);
    assert_eq!(json["relay"]["active"], 0);
}
