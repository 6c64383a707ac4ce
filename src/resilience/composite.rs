use crate::error::RateLimitError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::limiter::Limiter;
use super::rate_limiter::{RateLimiter, RateLimiterConfig};

/// Enforces several rate ceilings at once (e.g. per second and per minute).
///
/// Members are consulted in order. When a later member rejects, every member
/// admitted earlier in the same call gets its tokens refunded, so a failed
/// composite admission consumes nothing.
///
/// Each member applies its own `max_wait_time` from the moment it is reached;
/// the total wait of a composite `acquire` can therefore exceed any single
/// member's limit.
#[derive(Debug, Clone)]
pub struct CompositeLimiter {
    limiters: Vec<Arc<RateLimiter>>,
}

impl CompositeLimiter {
    pub fn new(limiters: Vec<Arc<RateLimiter>>) -> Self {
        Self { limiters }
    }

    /// A per-second ceiling with one second of burst plus a per-minute ceiling
    /// whose whole budget can be spent at once.
    pub fn per_second_and_minute(rps: f64, rpm: f64) -> Self {
        let per_second = RateLimiterConfig::new(rps, rps.max(1.0));
        let per_minute = RateLimiterConfig::new(rpm / 60.0, rpm.max(1.0));
        Self::new(vec![
            Arc::new(RateLimiter::new(per_second)),
            Arc::new(RateLimiter::new(per_minute)),
        ])
    }

    pub fn add_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiters.push(limiter);
        self
    }

    pub fn members(&self) -> &[Arc<RateLimiter>] {
        &self.limiters
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    // Reject costs no member could ever admit before touching any bucket.
    fn check_cost(&self, cost: f64) -> Result<(), RateLimitError> {
        for limiter in &self.limiters {
            limiter.check_cost(cost)?;
        }
        Ok(())
    }

    async fn rollback(&self, admitted: &[Arc<RateLimiter>], cost: f64) {
        if admitted.is_empty() {
            return;
        }
        warn!(
            cost,
            members = admitted.len(),
            "composite limiter rejected; refunding earlier members"
        );
        for limiter in admitted {
            limiter.refund(cost).await;
        }
    }

    async fn acquire_inner(
        &self,
        cost: f64,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), RateLimitError> {
        self.check_cost(cost)?;
        for (idx, limiter) in self.limiters.iter().enumerate() {
            if let Err(err) = limiter.acquire_inner(cost, cancel).await {
                self.rollback(&self.limiters[..idx], cost).await;
                return Err(err);
            }
        }
        Ok(())
    }

    pub async fn acquire(&self, cost: f64) -> Result<(), RateLimitError> {
        self.acquire_inner(cost, None).await
    }

    pub async fn acquire_with_cancel(
        &self,
        cost: f64,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        self.acquire_inner(cost, Some(cancel)).await
    }

    pub async fn try_acquire(&self, cost: f64) -> bool {
        for (idx, limiter) in self.limiters.iter().enumerate() {
            if !limiter.try_acquire(cost).await {
                self.rollback(&self.limiters[..idx], cost).await;
                return false;
            }
        }
        true
    }

    /// Tokens of the most constrained member.
    pub async fn available_tokens(&self) -> f64 {
        let mut min = f64::INFINITY;
        for limiter in &self.limiters {
            min = min.min(limiter.available_tokens().await);
        }
        min
    }

    /// Fill ratio of the most constrained member; `1.0` when there are no members.
    pub async fn fill_ratio(&self) -> f64 {
        let mut min: f64 = 1.0;
        for limiter in &self.limiters {
            min = min.min(limiter.fill_ratio().await);
        }
        min
    }

    pub async fn reset(&self) {
        for limiter in &self.limiters {
            limiter.reset().await;
        }
    }
}

#[async_trait]
impl Limiter for CompositeLimiter {
    async fn acquire(&self, cost: f64) -> Result<(), RateLimitError> {
        CompositeLimiter::acquire(self, cost).await
    }

    async fn acquire_with_cancel(
        &self,
        cost: f64,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        CompositeLimiter::acquire_with_cancel(self, cost, cancel).await
    }

    async fn try_acquire(&self, cost: f64) -> bool {
        CompositeLimiter::try_acquire(self, cost).await
    }

    async fn available_tokens(&self) -> f64 {
        CompositeLimiter::available_tokens(self).await
    }

    async fn fill_ratio(&self) -> f64 {
        CompositeLimiter::fill_ratio(self).await
    }

    async fn reset(&self) {
        CompositeLimiter::reset(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(rate: f64, capacity: f64) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimiterConfig::new(rate, capacity)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_composite_always_admits() {
        let composite = CompositeLimiter::new(Vec::new());
        assert!(composite.is_empty());
        assert!(composite.try_acquire(5.0).await);
        assert!(composite.acquire(5.0).await.is_ok());
        assert_eq!(composite.fill_ratio().await, 1.0);
        assert_eq!(composite.available_tokens().await, f64::INFINITY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_available_tokens_is_minimum() {
        let composite = CompositeLimiter::new(vec![limiter(0.0, 10.0), limiter(0.0, 4.0)]);
        assert_eq!(composite.available_tokens().await, 4.0);
        assert!((composite.fill_ratio().await - 1.0).abs() < 1e-9);
        assert!(composite.try_acquire(2.0).await);
        assert_eq!(composite.available_tokens().await, 2.0);
        assert!((composite.fill_ratio().await - 0.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_cost_checked_against_every_member() {
        let first = limiter(0.0, 10.0);
        let composite = CompositeLimiter::new(vec![first.clone(), limiter(0.0, 2.0)]);
        let err = composite.acquire(3.0).await.unwrap_err();
        assert_eq!(
            err,
            RateLimitError::InvalidCost {
                requested_tokens: 3.0,
                capacity: 2.0
            }
        );
        assert_eq!(first.available_tokens().await, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_refunds_earlier_members() {
        let first = limiter(0.0, 5.0);
        let second = Arc::new(RateLimiter::new(
            RateLimiterConfig::new(0.0, 5.0)
                .with_initial_tokens(0.0)
                .with_max_wait_time(Duration::from_millis(100)),
        ));
        let composite = CompositeLimiter::new(vec![first.clone(), second]);

        let err = composite.acquire(1.0).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Timeout { .. }));
        assert_eq!(first.available_tokens().await, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_second_and_minute() {
        let composite = CompositeLimiter::per_second_and_minute(10.0, 12.0);
        assert_eq!(composite.len(), 2);
        for _ in 0..10 {
            assert!(composite.try_acquire(1.0).await);
        }
        assert!(!composite.try_acquire(1.0).await);

        // per-second bucket is full again after a second, per-minute bucket has 2.2 left
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(composite.try_acquire(1.0).await);
        assert!(composite.try_acquire(1.0).await);
        assert!(!composite.try_acquire(1.0).await);
    }
}
