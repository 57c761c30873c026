//! End-to-end admission scenarios against a scripted upstream.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::Instant;

use vmgate::domain::{CircuitState, Priority, TargetId, UpstreamFault};
use vmgate::error::Error;
use vmgate::infrastructure::gateway::{GatewayRegistry, TargetGateway};
use vmgate::testkit;
use vmgate::testkit::upstream::{ScriptedConnector, ScriptedUpstream};

const CALL_LATENCY: Duration = Duration::from_millis(100);

fn gateway(
    max_concurrent: usize,
    failure_threshold: u32,
) -> (Arc<TargetGateway<ScriptedConnector>>, ScriptedUpstream) {
    let upstream = ScriptedUpstream::new();
    let config = testkit::config::gateway(max_concurrent, failure_threshold);
    let gateway = TargetGateway::new(
        TargetId::new(testkit::config::TARGET),
        upstream.connector(),
        &config,
    )
    .unwrap();
    (Arc::new(gateway), upstream)
}

fn spawn_call(
    gateway: &Arc<TargetGateway<ScriptedConnector>>,
    priority: Priority,
    label: String,
    done: &Arc<Mutex<Vec<String>>>,
) -> tokio::task::JoinHandle<()> {
    let gateway = gateway.clone();
    let done = done.clone();
    tokio::spawn(async move {
        gateway
            .execute(priority, |s| s.call("query").boxed())
            .await
            .unwrap();
        done.lock().unwrap().push(label);
    })
}

// -- Priority ---------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_critical_overtakes_queued_normal_calls() {
    let (gateway, upstream) = gateway(3, 5);
    upstream.set_latency(CALL_LATENCY);
    let done = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for i in 0..3 {
        handles.push(spawn_call(&gateway, Priority::Normal, format!("warm-{i}"), &done));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.status().gate.active, 3);

    for i in 0..10 {
        handles.push(spawn_call(&gateway, Priority::Normal, format!("normal-{i}"), &done));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    handles.push(spawn_call(&gateway, Priority::Critical, "critical".to_string(), &done));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(gateway.status().gate.waiting(), 11);

    for handle in handles {
        handle.await.unwrap();
    }

    let order = done.lock().unwrap().clone();
    let critical_at = order.iter().position(|l| l == "critical").unwrap();
    let normals_after = order[critical_at + 1..]
        .iter()
        .filter(|l| l.starts_with("normal-"))
        .count();
    assert!(
        normals_after >= 6,
        "critical finished behind too many queued calls: {order:?}"
    );

    // FIFO within one priority.
    let normals: Vec<_> = order.iter().filter(|l| l.starts_with("normal-")).collect();
    let expected: Vec<_> = (0..10).map(|i| format!("normal-{i}")).collect();
    assert_eq!(normals, expected.iter().collect::<Vec<_>>());

    let status = gateway.status();
    assert_eq!(status.gate.active, 0);
    assert_eq!(status.gate.succeeded, 14);
    assert!(upstream.peak_in_flight() <= 3);
}

#[tokio::test(start_paused = true)]
async fn test_burst_never_exceeds_concurrency_or_pool_size() {
    let (gateway, upstream) = gateway(3, 5);
    upstream.set_latency(Duration::from_millis(20));
    let done = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..20)
        .map(|i| spawn_call(&gateway, Priority::ALL[i % 4], format!("call-{i}"), &done))
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(done.lock().unwrap().len(), 20);
    assert!(upstream.peak_in_flight() <= 3);
    assert!(upstream.connects() <= 3);
    assert_eq!(gateway.status().pool.in_use, 0);
}

// -- Circuit breaker --------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_overload_storm_opens_breaker_and_recovers() {
    let (gateway, upstream) = gateway(2, 5);
    upstream.push_faults(UpstreamFault::Overloaded { retry_after: None }, 5);

    for _ in 0..5 {
        let err = gateway
            .execute(Priority::Normal, |s| s.call("list-vms").boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Overloaded { .. }), "got {err:?}");
    }
    assert_eq!(gateway.status().breaker.state, CircuitState::Open);
    assert!(gateway.status().rate.delay_ms > 1);

    let started = Instant::now();
    let err = gateway
        .execute(Priority::Critical, |s| s.call("list-vms").boxed())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }), "got {err:?}");
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(upstream.calls(), 5);

    tokio::time::advance(Duration::from_secs(30)).await;

    gateway
        .execute(Priority::Normal, |s| s.call("probe").boxed())
        .await
        .unwrap();
    assert_eq!(gateway.status().breaker.state, CircuitState::HalfOpen);

    gateway
        .execute(Priority::Normal, |s| s.call("probe").boxed())
        .await
        .unwrap();
    let status = gateway.status();
    assert_eq!(status.breaker.state, CircuitState::Closed);
    assert_eq!(status.breaker.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_breaker() {
    let (gateway, upstream) = gateway(1, 2);
    upstream.push_faults(UpstreamFault::Timeout, 2);

    for _ in 0..2 {
        let _ = gateway
            .execute(Priority::Normal, |s| s.call("list-vms").boxed())
            .await;
    }
    assert_eq!(gateway.status().breaker.state, CircuitState::Open);

    tokio::time::advance(Duration::from_secs(30)).await;
    upstream.push_response(Err(UpstreamFault::Unavailable("still down".into())));
    let err = gateway
        .execute(Priority::Normal, |s| s.call("probe").boxed())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
    assert_eq!(gateway.status().breaker.state, CircuitState::Open);
}

// -- Registry ---------------------------------------------------------------

#[tokio::test]
async fn test_targets_are_isolated() {
    let mut config = testkit::config::gateway(2, 1);
    config.targets.push(testkit::config::target("esxi-other"));

    let broken = ScriptedUpstream::new();
    let healthy = ScriptedUpstream::new();
    broken.push_faults(UpstreamFault::Overloaded { retry_after: None }, 1);
    let registry = GatewayRegistry::from_config(&config, |target| {
        if target.id == testkit::config::TARGET {
            broken.connector()
        } else {
            healthy.connector()
        }
    })
    .unwrap();

    let first = registry.get(testkit::config::TARGET).unwrap();
    let _ = first
        .execute(Priority::Normal, |s| s.call("list-vms").boxed())
        .await;
    assert_eq!(first.status().breaker.state, CircuitState::Open);

    let other = registry.get("esxi-other").unwrap();
    let answer = other
        .execute(Priority::Normal, |s| s.call("list-vms").boxed())
        .await
        .unwrap();
    assert_eq!(answer, "list-vms@1");
    assert_eq!(other.status().breaker.state, CircuitState::Closed);

    registry.shutdown().await;
}
