use crate::error::RateLimitError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Common surface of [`RateLimiter`](super::rate_limiter::RateLimiter) and
/// [`CompositeLimiter`](super::composite::CompositeLimiter).
///
/// The rate-limited client only talks to this trait, so a single bucket and a
/// stack of buckets are interchangeable.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Wait until `cost` tokens are admitted.
    async fn acquire(&self, cost: f64) -> Result<(), RateLimitError>;

    /// Wait until `cost` tokens are admitted or `cancel` fires.
    async fn acquire_with_cancel(
        &self,
        cost: f64,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError>;

    /// Single non-blocking admission attempt.
    async fn try_acquire(&self, cost: f64) -> bool;

    async fn available_tokens(&self) -> f64;

    async fn fill_ratio(&self) -> f64;

    async fn reset(&self);
}
