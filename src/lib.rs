//! # gcp-ratelimit
//!
//! 面向 Google Cloud API 客户端的令牌桶限流库，支持单桶、组合限流与限流客户端装饰器。
//!
//! Client-side rate limiting for Google Cloud API clients.
//!
//! ## Overview
//!
//! Google Cloud APIs enforce per-project quotas. This crate keeps a client under
//! those quotas by spending tokens from one or more token buckets before each
//! outbound call:
//!
//! - **Token bucket**: [`RateLimiter`] refills continuously and supports blocking
//!   (with timeout and cancellation) and non-blocking admission
//! - **Composite limits**: [`CompositeLimiter`] enforces several ceilings at once
//! - **Decorator**: [`RateLimitedClient`] wraps any [`ApiClient`] and is itself an
//!   [`ApiClient`], so it drops in wherever the bare client is used
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gcp_ratelimit::{ApiClient, HttpTransport, RateLimitedClientBuilder, RateLimiterPreset};
//!
//! #[tokio::main]
//! async fn main() -> gcp_ratelimit::Result<()> {
//!     let transport = HttpTransport::new("https://compute.googleapis.com/compute/v1/")?
//!         .with_default_credentials();
//!     let client = RateLimitedClientBuilder::new()
//!         .preset(RateLimiterPreset::ComputeEngineApi)
//!         .build(transport)?;
//!
//!     let zones: serde_json::Value = client.get("projects/my-project/zones", &[]).await?;
//!     println!("{}", zones);
//!     println!("{:?}", client.stats().await);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Token bucket, composite limiter, presets |
//! | [`client`] | Rate-limited client decorator and builder |
//! | [`transport`] | Request execution contract and HTTP implementation |
//! | [`config`] | YAML and environment limit settings |
//! | [`error`] | Error types |

pub mod client;
pub mod config;
pub mod error;
pub mod resilience;
pub mod transport;

pub use client::{ClientStats, RateLimitedClient, RateLimitedClientBuilder};
pub use config::{LimitSettings, LimitSpec};
pub use error::{Error, ErrorContext, RateLimitError};
pub use resilience::{
    CompositeLimiter, Limiter, RateLimiter, RateLimiterConfig, RateLimiterPreset,
    RateLimiterSnapshot,
};
pub use transport::{ApiClient, HttpTransport};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
