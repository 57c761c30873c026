use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::*;
use crate::domain::{CircuitState, UpstreamFault};
use crate::infrastructure::config::{BreakerConfig, RateConfig};

fn gate_with(max_concurrent: usize, min_interval_ms: u64, failure_threshold: u32) -> AdmissionGate {
    let rate = Arc::new(RateController::new(&RateConfig {
        min_interval_ms,
        max_interval_ms: 5_000,
        window_secs: 10,
    }));
    let breaker = Arc::new(CircuitBreaker::new(
        "gate-test",
        BreakerConfig {
            failure_threshold,
            success_threshold: 1,
            recovery_timeout_secs: 30,
        },
    ));
    AdmissionGate::new(
        "gate-test",
        &GateConfig {
            max_concurrent,
            acquire_timeout_secs: 5,
            call_timeout_secs: 60,
        },
        rate,
        breaker,
    )
}

fn gate(max_concurrent: usize) -> AdmissionGate {
    gate_with(max_concurrent, 1, 5)
}

/// Spawn a waiter that records its priority when admitted and releases at once.
fn spawn_recorder(
    gate: &AdmissionGate,
    priority: Priority,
    order: &Arc<Mutex<Vec<(Priority, usize)>>>,
    tag: usize,
) -> tokio::task::JoinHandle<()> {
    let gate = gate.clone();
    let order = order.clone();
    tokio::spawn(async move {
        let permit = gate.acquire(priority).await.unwrap();
        order.lock().push((priority, tag));
        permit.release();
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// --- Concurrency bound ---

#[tokio::test(start_paused = true)]
async fn grants_up_to_max_concurrent_then_queues() {
    let gate = gate(2);
    let a = gate.acquire(Priority::Normal).await.unwrap();
    settle().await;
    let b = gate.acquire(Priority::Normal).await.unwrap();
    assert_eq!(gate.stats().active, 2);

    let g = gate.clone();
    let third = tokio::spawn(async move { g.acquire(Priority::Normal).await.map(|_| ()) });
    settle().await;
    assert_eq!(gate.stats().waiting(), 1);
    assert!(!third.is_finished());

    drop(a);
    third.await.unwrap().unwrap();
    drop(b);
    assert_eq!(gate.stats().active, 0);
}

// --- Ordering ---

#[tokio::test(start_paused = true)]
async fn more_urgent_waiters_are_served_first() {
    let gate = gate(1);
    let held = gate.acquire(Priority::Normal).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for (tag, priority) in [Priority::Low, Priority::Normal, Priority::High, Priority::Critical]
        .into_iter()
        .enumerate()
    {
        handles.push(spawn_recorder(&gate, priority, &order, tag));
        settle().await;
    }
    assert_eq!(gate.stats().waiting(), 4);

    drop(held);
    for h in handles {
        h.await.unwrap();
    }

    let served: Vec<_> = order.lock().iter().map(|(p, _)| *p).collect();
    assert_eq!(
        served,
        vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
    );
}

#[tokio::test(start_paused = true)]
async fn equal_priority_is_fifo() {
    let gate = gate(1);
    let held = gate.acquire(Priority::High).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for tag in 0..5 {
        handles.push(spawn_recorder(&gate, Priority::Normal, &order, tag));
        settle().await;
    }

    drop(held);
    for h in handles {
        h.await.unwrap();
    }

    let tags: Vec<_> = order.lock().iter().map(|(_, t)| *t).collect();
    assert_eq!(tags, vec![0, 1, 2, 3, 4]);
}

// --- Timeouts and cancellation ---

#[tokio::test(start_paused = true)]
async fn timed_out_waiter_leaves_queue_without_a_slot() {
    let gate = gate(1);
    let held = gate.acquire(Priority::Normal).await.unwrap();

    let err = gate.acquire(Priority::Low).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(5)));

    let stats = gate.stats();
    assert_eq!(stats.waiting(), 0);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.timeouts, 1);

    drop(held);
    settle().await;
    assert!(gate.acquire(Priority::Low).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn abandoned_acquire_is_removed_from_queue() {
    let gate = gate(1);
    let held = gate.acquire(Priority::Normal).await.unwrap();

    let g = gate.clone();
    let waiter = tokio::spawn(async move { g.acquire(Priority::Normal).await.map(|_| ()) });
    settle().await;
    assert_eq!(gate.stats().waiting(), 1);

    waiter.abort();
    let _ = waiter.await;
    assert_eq!(gate.stats().waiting(), 0);

    drop(held);
    assert_eq!(gate.stats().active, 0);
}

// --- Breaker integration ---

#[tokio::test(start_paused = true)]
async fn open_breaker_fails_fast_without_touching_slots_or_rate() {
    let gate = gate_with(2, 1, 1);
    let permit = gate.acquire(Priority::Normal).await.unwrap();
    permit.complete(&CallOutcome::Failure(UpstreamFault::Overloaded { retry_after: None }));
    assert_eq!(gate.breaker().state(), CircuitState::Open);

    let requests_before = gate.rate().snapshot().recent_requests;
    let started = Instant::now();
    let err = gate.acquire(Priority::Critical).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert_eq!(started.elapsed(), Duration::ZERO);

    let stats = gate.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.circuit_rejections, 1);
    assert_eq!(gate.rate().snapshot().recent_requests, requests_before);
}

#[tokio::test(start_paused = true)]
async fn complete_reports_outcome_to_rate_and_breaker() {
    let gate = gate_with(1, 50, 5);
    let permit = gate.acquire(Priority::Normal).await.unwrap();
    permit.complete(&CallOutcome::Failure(UpstreamFault::Timeout));

    assert_eq!(gate.rate().next_delay(), Duration::from_millis(100));
    assert_eq!(gate.breaker().status().failure_count, 1);
    assert_eq!(gate.stats().failed, 1);
    assert_eq!(gate.stats().active, 0);
}

// --- Rate spacing ---

#[tokio::test(start_paused = true)]
async fn grants_are_spaced_by_rate_controller() {
    let gate = gate_with(10, 100, 5);
    let started = Instant::now();

    let mut permits = Vec::new();
    for _ in 0..3 {
        permits.push(gate.acquire(Priority::Normal).await.unwrap());
    }

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(gate.stats().active, 3);
}

#[tokio::test(start_paused = true)]
async fn spacing_waiters_do_not_hold_slots() {
    let gate = gate_with(4, 1_000, 5);
    let _first = gate.acquire(Priority::Normal).await.unwrap();

    let g = gate.clone();
    let second = tokio::spawn(async move { g.acquire(Priority::Normal).await.map(|_| ()) });
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Slot still free while the waiter sleeps on spacing.
    let stats = gate.stats();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.waiting(), 1);

    second.await.unwrap().unwrap();
}

// --- Stats ---

#[tokio::test(start_paused = true)]
async fn stats_track_wait_per_priority() {
    let gate = gate(1);
    let held = gate.acquire(Priority::Normal).await.unwrap();

    let g = gate.clone();
    let waiter = tokio::spawn(async move { g.acquire(Priority::High).await.map(|_| ()) });
    tokio::time::sleep(Duration::from_millis(250)).await;
    drop(held);
    waiter.await.unwrap().unwrap();

    let stats = gate.stats();
    assert_eq!(stats.total_requests, 2);
    let high = stats.for_priority(Priority::High).unwrap();
    assert_eq!(high.admitted, 1);
    assert!(high.avg_wait_ms >= 250.0);
    let normal = stats.for_priority(Priority::Normal).unwrap();
    assert_eq!(normal.avg_wait_ms, 0.0);
}
