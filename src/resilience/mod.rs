//! 限流模块：提供令牌桶限流器与组合限流器。
//!
//! # Rate Limiting Primitives
//!
//! Client-side throttling for calls to rate-limited Google Cloud APIs.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Token bucket limiter with blocking and non-blocking admission |
//! | [`composite`] | Several buckets enforced together (e.g. per second and per minute) |
//! | [`limiter`] | The [`Limiter`] trait both of the above implement |
//!
//! ## Token Bucket
//!
//! A bucket holds up to `capacity` tokens and refills continuously at
//! `refill_rate_per_second`. Each request spends `cost` tokens:
//!
//! ```rust
//! use gcp_ratelimit::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//!
//! # async fn demo() {
//! let config = RateLimiterConfig::new(10.0, 20.0); // 10 tokens/s, burst of 20
//! let limiter = RateLimiter::new(config);
//!
//! if limiter.try_acquire(1.0).await {
//!     // Proceed with request...
//! }
//! # }
//! ```
//!
//! Waiting callers re-check at most once per second and never hold the bucket
//! lock while sleeping, so a cheap `try_acquire` is never stuck behind an
//! expensive `acquire`. There is no FIFO ordering between waiters.
//!
//! ## Composite Limits
//!
//! ```rust
//! use gcp_ratelimit::resilience::composite::CompositeLimiter;
//!
//! # async fn demo() -> Result<(), gcp_ratelimit::error::RateLimitError> {
//! // 10 requests per second, but no more than 300 per minute
//! let limiter = CompositeLimiter::per_second_and_minute(10.0, 300.0);
//! limiter.acquire(1.0).await?;
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod limiter;
pub mod rate_limiter;

pub use composite::CompositeLimiter;
pub use limiter::Limiter;
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterPreset, RateLimiterSnapshot};
