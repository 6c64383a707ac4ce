//! Composite limiter admission across several buckets.

use gcp_ratelimit::{CompositeLimiter, Limiter, RateLimitError, RateLimiter, RateLimiterConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn bucket(rate: f64, capacity: f64) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimiterConfig::new(rate, capacity)))
}

#[tokio::test(start_paused = true)]
async fn test_short_circuit_refunds_earlier_members() {
    let a = bucket(1000.0, 1000.0);
    let b = bucket(0.0, 0.0);
    let composite = CompositeLimiter::new(vec![a.clone(), b.clone()]);

    assert!(!composite.try_acquire(1.0).await);
    // the rejected admission leaves A untouched
    assert_eq!(a.available_tokens().await, 1000.0);
    assert_eq!(b.available_tokens().await, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_all_members_are_debited_on_success() {
    let a = bucket(0.0, 10.0);
    let b = bucket(0.0, 3.0);
    let composite = CompositeLimiter::new(vec![a.clone(), b.clone()]);

    for _ in 0..3 {
        assert!(composite.try_acquire(1.0).await);
    }
    assert!(!composite.try_acquire(1.0).await);
    assert_eq!(a.available_tokens().await, 7.0);
    assert_eq!(b.available_tokens().await, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_waits_for_slowest_member() {
    let fast = bucket(100.0, 10.0);
    let slow = Arc::new(RateLimiter::new(
        RateLimiterConfig::new(2.0, 1.0).with_initial_tokens(0.0),
    ));
    let composite = CompositeLimiter::new(vec![fast.clone(), slow]);

    let start = tokio::time::Instant::now();
    composite.acquire(1.0).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_rolls_back() {
    let first = bucket(0.0, 2.0);
    let blocked = Arc::new(RateLimiter::new(
        RateLimiterConfig::new(0.0, 2.0).with_initial_tokens(0.0),
    ));
    let composite = CompositeLimiter::new(vec![first.clone(), blocked]);
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            token.cancel();
        })
    };

    let err = composite
        .acquire_with_cancel(1.0, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RateLimitError::Cancelled { .. }));
    assert_eq!(first.available_tokens().await, 2.0);
    canceller.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reset_resets_every_member() {
    let a = bucket(0.0, 4.0);
    let b = bucket(0.0, 8.0);
    let composite: Arc<dyn Limiter> = Arc::new(CompositeLimiter::new(vec![a.clone(), b.clone()]));

    assert!(composite.try_acquire(4.0).await);
    assert_eq!(composite.available_tokens().await, 0.0);
    assert_eq!(composite.fill_ratio().await, 0.0);

    composite.reset().await;
    assert_eq!(a.available_tokens().await, 4.0);
    assert_eq!(b.available_tokens().await, 8.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_try_acquire_never_overspends() {
    let a = bucket(0.0, 25.0);
    let b = bucket(0.0, 10.0);
    let composite = Arc::new(CompositeLimiter::new(vec![a.clone(), b.clone()]));

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let composite = composite.clone();
            tokio::spawn(async move { composite.try_acquire(1.0).await })
        })
        .collect();
    let admitted = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();

    assert_eq!(admitted, 10);
    assert_eq!(b.available_tokens().await, 0.0);
    assert_eq!(a.available_tokens().await, 15.0);
}
