//! Rate-limited API client.
//!
//! [`RateLimitedClient`] wraps any [`ApiClient`](crate::transport::ApiClient) and
//! spends one token before every call. Implementation details are split into
//! submodules under `src/client/`.

pub mod builder;
pub mod rate_limited;
pub mod stats;

pub use builder::RateLimitedClientBuilder;
pub use rate_limited::RateLimitedClient;
pub use stats::ClientStats;
