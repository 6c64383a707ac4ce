use crate::error::{ErrorContext, RateLimitError};
use crate::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::limiter::Limiter;

/// Shortest sleep between two admission attempts (seconds).
const MIN_WAIT_SECS: f64 = 0.001;
/// Longest sleep between two admission attempts (seconds).
const MAX_WAIT_SECS: f64 = 1.0;

/// Seconds to sleep before the next attempt when `deficit` tokens are missing.
/// A zero rate yields +inf before clamping, which becomes the max interval.
fn wait_step(deficit: f64, refill_rate: f64) -> f64 {
    (deficit / refill_rate).clamp(MIN_WAIT_SECS, MAX_WAIT_SECS)
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub refill_rate_per_second: f64,
    pub capacity: f64,
    pub tokens: f64,
    /// Estimated wait time until one token is available (ms), if currently short.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Tokens added per second.
    pub refill_rate_per_second: f64,
    /// Maximum tokens the bucket holds (burst size).
    pub capacity: f64,
    /// Tokens at construction; defaults to `capacity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_tokens: Option<f64>,
    /// Upper bound on how long `acquire` waits. `None` waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_time: Option<Duration>,
}

impl RateLimiterConfig {
    pub fn new(refill_rate_per_second: f64, capacity: f64) -> Self {
        Self {
            refill_rate_per_second,
            capacity,
            initial_tokens: None,
            max_wait_time: None,
        }
    }

    /// One second worth of burst, at least one token.
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self::new(rps, rps.max(1.0)))
    }

    pub fn from_preset(preset: RateLimiterPreset) -> Self {
        preset.config()
    }

    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.refill_rate_per_second = rate;
        self
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_initial_tokens(mut self, tokens: f64) -> Self {
        self.initial_tokens = Some(tokens);
        self
    }

    pub fn with_max_wait_time(mut self, max_wait: Duration) -> Self {
        self.max_wait_time = Some(max_wait);
        self
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, details: String| {
            Error::configuration_with_context(
                format!("invalid rate limiter {}", field),
                ErrorContext::new()
                    .with_field_path(field)
                    .with_details(details)
                    .with_source("rate_limiter_config"),
            )
        };

        let rate = self.refill_rate_per_second;
        if !rate.is_finite() || rate < 0.0 {
            return Err(invalid(
                "refill_rate_per_second",
                format!("expected a finite value >= 0, got {}", rate),
            ));
        }
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(invalid(
                "capacity",
                format!("expected a finite value > 0, got {}", self.capacity),
            ));
        }
        if let Some(initial) = self.initial_tokens {
            if !(0.0..=self.capacity).contains(&initial) {
                return Err(invalid(
                    "initial_tokens",
                    format!("expected a value in [0, {}], got {}", self.capacity, initial),
                ));
            }
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        RateLimiterPreset::Default.config()
    }
}

/// Named limits for commonly throttled Google Cloud APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateLimiterPreset {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "conservative")]
    Conservative,
    #[serde(rename = "aggressive")]
    Aggressive,
    #[serde(rename = "computeEngineAPI")]
    ComputeEngineApi,
    #[serde(rename = "cloudStorageAPI")]
    CloudStorageApi,
    #[serde(rename = "cloudLoggingAPI")]
    CloudLoggingApi,
}

// (preset, name, refill rate per second, capacity); order follows the enum.
static PRESET_TABLE: [(RateLimiterPreset, &str, f64, f64); 6] = [
    (RateLimiterPreset::Default, "default", 100.0, 100.0),
    (RateLimiterPreset::Conservative, "conservative", 10.0, 20.0),
    (RateLimiterPreset::Aggressive, "aggressive", 500.0, 500.0),
    (RateLimiterPreset::ComputeEngineApi, "computeEngineAPI", 15.0, 30.0),
    (RateLimiterPreset::CloudStorageApi, "cloudStorageAPI", 1000.0, 1000.0),
    (RateLimiterPreset::CloudLoggingApi, "cloudLoggingAPI", 50.0, 100.0),
];

static PRESETS_BY_NAME: Lazy<HashMap<String, RateLimiterPreset>> = Lazy::new(|| {
    PRESET_TABLE
        .iter()
        .map(|(preset, name, _, _)| (normalize_preset_name(name), *preset))
        .collect()
});

fn normalize_preset_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl RateLimiterPreset {
    pub const ALL: [RateLimiterPreset; 6] = [
        RateLimiterPreset::Default,
        RateLimiterPreset::Conservative,
        RateLimiterPreset::Aggressive,
        RateLimiterPreset::ComputeEngineApi,
        RateLimiterPreset::CloudStorageApi,
        RateLimiterPreset::CloudLoggingApi,
    ];

    fn entry(self) -> &'static (RateLimiterPreset, &'static str, f64, f64) {
        &PRESET_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.entry().1
    }

    pub fn config(self) -> RateLimiterConfig {
        let (_, _, rate, capacity) = *self.entry();
        RateLimiterConfig::new(rate, capacity)
    }

    /// Case-insensitive lookup; `computeEngineAPI`, `compute_engine_api` and
    /// `compute-engine-api` all resolve to the same preset.
    pub fn from_name(name: &str) -> Option<Self> {
        PRESETS_BY_NAME.get(&normalize_preset_name(name)).copied()
    }
}

impl fmt::Display for RateLimiterPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RateLimiterPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown rate limiter preset '{}'", s),
                ErrorContext::new()
                    .with_field_path("preset")
                    .with_details(format!(
                        "expected one of: {}",
                        PRESET_TABLE
                            .iter()
                            .map(|(_, name, _, _)| *name)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))
                    .with_source("rate_limiter_preset"),
            )
        })
    }
}

/// Mutable bucket state. Only ever touched while the owning limiter's lock is held.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, rate: f64, capacity: f64, now: Instant) {
        // saturating: a clock that appears to go backwards adds nothing
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    fn try_consume(&mut self, cost: f64) -> bool {
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Token-bucket rate limiter.
///
/// - Continuous refill at `refill_rate_per_second`, bounded by `capacity`
/// - Fractional costs; a request for exactly the available balance succeeds
/// - No FIFO fairness between waiting tasks
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Build a limiter without validation. Non-finite or negative rates and
    /// capacities are treated as zero and `initial_tokens` is clamped into
    /// `[0, capacity]`. Use [`RateLimiter::try_new`] to reject such configs.
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let sanitize = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        let capacity = sanitize(cfg.capacity);
        let rate = sanitize(cfg.refill_rate_per_second);
        let initial = match cfg.initial_tokens {
            Some(t) if t.is_nan() => capacity,
            Some(t) => t.clamp(0.0, capacity),
            None => capacity,
        };
        let cfg = RateLimiterConfig {
            refill_rate_per_second: rate,
            capacity,
            initial_tokens: Some(initial),
            max_wait_time: cfg.max_wait_time,
        };
        Self {
            state: Mutex::new(TokenBucket {
                tokens: initial,
                last_refill: Instant::now(),
            }),
            cfg,
        }
    }

    pub fn try_new(cfg: RateLimiterConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::new(cfg))
    }

    pub fn from_preset(preset: RateLimiterPreset) -> Self {
        Self::new(preset.config())
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    pub fn capacity(&self) -> f64 {
        self.cfg.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.cfg.refill_rate_per_second
    }

    pub(crate) fn check_cost(&self, cost: f64) -> std::result::Result<(), RateLimitError> {
        if !cost.is_finite() || cost < 0.0 || cost > self.cfg.capacity {
            return Err(RateLimitError::InvalidCost {
                requested_tokens: cost,
                capacity: self.cfg.capacity,
            });
        }
        Ok(())
    }

    /// Acquire `cost` tokens, sleeping until they are available.
    ///
    /// Fails immediately with [`RateLimitError::InvalidCost`] when `cost` exceeds
    /// the capacity, and with [`RateLimitError::Timeout`] once `max_wait_time`
    /// has elapsed. Nothing is consumed on failure.
    pub async fn acquire(&self, cost: f64) -> std::result::Result<(), RateLimitError> {
        self.acquire_inner(cost, None).await
    }

    /// Like [`RateLimiter::acquire`], but aborts with [`RateLimitError::Cancelled`]
    /// as soon as `cancel` fires.
    pub async fn acquire_with_cancel(
        &self,
        cost: f64,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), RateLimitError> {
        self.acquire_inner(cost, Some(cancel)).await
    }

    pub(crate) async fn acquire_inner(
        &self,
        cost: f64,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<(), RateLimitError> {
        self.check_cost(cost)?;
        let cfg = &self.cfg;
        let started = Instant::now();

        loop {
            if cancel.map_or(false, |c| c.is_cancelled()) {
                debug!(cost, "rate limiter wait cancelled");
                return Err(RateLimitError::Cancelled {
                    requested_tokens: cost,
                });
            }

            // The lock is released at the end of this block, before any sleep.
            let tokens = {
                let mut bucket = self.state.lock().await;
                bucket.refill(cfg.refill_rate_per_second, cfg.capacity, Instant::now());
                if bucket.try_consume(cost) {
                    trace!(cost, remaining = bucket.tokens, "rate limiter admitted");
                    return Ok(());
                }
                bucket.tokens
            };

            let waited = started.elapsed();
            let mut wait_secs = wait_step(cost - tokens, cfg.refill_rate_per_second);
            if let Some(max_wait) = cfg.max_wait_time {
                if waited >= max_wait {
                    debug!(
                        cost,
                        tokens,
                        waited_ms = waited.as_millis() as u64,
                        "rate limiter wait timed out"
                    );
                    return Err(RateLimitError::Timeout {
                        waited_seconds: waited.as_secs_f64(),
                        requested_tokens: cost,
                    });
                }
                let remaining = (max_wait - waited).as_secs_f64();
                wait_secs = wait_secs.min(remaining.max(MIN_WAIT_SECS));
            }

            debug!(
                cost,
                tokens,
                wait_ms = (wait_secs * 1000.0) as u64,
                "rate limiter waiting for tokens"
            );
            let sleep = tokio::time::sleep(Duration::from_secs_f64(wait_secs));
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(cost, "rate limiter wait cancelled");
                            return Err(RateLimitError::Cancelled { requested_tokens: cost });
                        }
                        _ = sleep => {}
                    }
                }
                None => sleep.await,
            }
        }
    }

    /// Try to acquire `cost` tokens without waiting, returns true if successful.
    pub async fn try_acquire(&self, cost: f64) -> bool {
        if !cost.is_finite() || cost < 0.0 {
            return false;
        }
        let cfg = &self.cfg;
        let mut bucket = self.state.lock().await;
        bucket.refill(cfg.refill_rate_per_second, cfg.capacity, Instant::now());
        bucket.try_consume(cost)
    }

    /// Current balance. Refills first, so reading advances the bucket clock.
    pub async fn available_tokens(&self) -> f64 {
        let cfg = &self.cfg;
        let mut bucket = self.state.lock().await;
        bucket.refill(cfg.refill_rate_per_second, cfg.capacity, Instant::now());
        bucket.tokens
    }

    /// `available_tokens / capacity`, in `[0, 1]`.
    pub async fn fill_ratio(&self) -> f64 {
        if self.cfg.capacity <= 0.0 {
            return 0.0;
        }
        (self.available_tokens().await / self.cfg.capacity).clamp(0.0, 1.0)
    }

    pub async fn reset(&self) {
        let mut bucket = self.state.lock().await;
        bucket.tokens = self.cfg.capacity;
        bucket.last_refill = Instant::now();
    }

    pub async fn drain(&self) {
        let mut bucket = self.state.lock().await;
        bucket.tokens = 0.0;
        bucket.last_refill = Instant::now();
    }

    /// Give back tokens from an admission that was abandoned. Capped at capacity.
    pub async fn refund(&self, cost: f64) {
        if !cost.is_finite() || cost <= 0.0 {
            return;
        }
        let cfg = &self.cfg;
        let mut bucket = self.state.lock().await;
        bucket.refill(cfg.refill_rate_per_second, cfg.capacity, Instant::now());
        bucket.tokens = (bucket.tokens + cost).min(cfg.capacity);
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut bucket = self.state.lock().await;
        bucket.refill(cfg.refill_rate_per_second, cfg.capacity, Instant::now());

        let estimated_wait_ms = if bucket.tokens < 1.0 && cfg.refill_rate_per_second > 0.0 {
            let missing = 1.0 - bucket.tokens;
            Some((missing / cfg.refill_rate_per_second * 1000.0).ceil() as u64)
        } else {
            None
        };

        RateLimiterSnapshot {
            refill_rate_per_second: cfg.refill_rate_per_second,
            capacity: cfg.capacity,
            tokens: bucket.tokens,
            estimated_wait_ms,
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("cfg", &self.cfg).finish()
    }
}

#[async_trait]
impl Limiter for RateLimiter {
    async fn acquire(&self, cost: f64) -> std::result::Result<(), RateLimitError> {
        RateLimiter::acquire(self, cost).await
    }

    async fn acquire_with_cancel(
        &self,
        cost: f64,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), RateLimitError> {
        RateLimiter::acquire_with_cancel(self, cost, cancel).await
    }

    async fn try_acquire(&self, cost: f64) -> bool {
        RateLimiter::try_acquire(self, cost).await
    }

    async fn available_tokens(&self) -> f64 {
        RateLimiter::available_tokens(self).await
    }

    async fn fill_ratio(&self) -> f64 {
        RateLimiter::fill_ratio(self).await
    }

    async fn reset(&self) {
        RateLimiter::reset(self).await
    }
}
