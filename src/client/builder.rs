use crate::client::rate_limited::RateLimitedClient;
use crate::config::LimitSettings;
use crate::resilience::{Limiter, RateLimiter, RateLimiterConfig, RateLimiterPreset};
use crate::transport::ApiClient;
use crate::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builder for [`RateLimitedClient`].
///
/// Without an explicit limiter, `build` falls back to the `GCP_RATELIMIT_*`
/// environment variables and then to the `default` preset.
pub struct RateLimitedClientBuilder {
    limiter: Option<Arc<dyn Limiter>>,
    cancel: Option<CancellationToken>,
}

impl RateLimitedClientBuilder {
    pub fn new() -> Self {
        Self {
            limiter: None,
            cancel: None,
        }
    }

    pub fn preset(self, preset: RateLimiterPreset) -> Self {
        self.config(preset.config())
    }

    pub fn config(mut self, cfg: RateLimiterConfig) -> Self {
        self.limiter = Some(Arc::new(RateLimiter::new(cfg)));
        self
    }

    /// Share an existing limiter (single or composite) between clients.
    pub fn limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn settings(mut self, settings: &LimitSettings) -> Result<Self> {
        self.limiter = Some(settings.build()?);
        Ok(self)
    }

    /// Use `GCP_RATELIMIT_*` if any is set; otherwise leave the builder unchanged.
    pub fn from_env(mut self) -> Result<Self> {
        if let Some(settings) = LimitSettings::from_env()? {
            self.limiter = Some(settings.build()?);
        }
        Ok(self)
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build<C: ApiClient>(self, inner: C) -> Result<RateLimitedClient<C>> {
        self.build_shared(Arc::new(inner))
    }

    pub fn build_shared<C: ApiClient>(self, inner: Arc<C>) -> Result<RateLimitedClient<C>> {
        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => match LimitSettings::from_env()? {
                Some(settings) => settings.build()?,
                None => Arc::new(RateLimiter::from_preset(RateLimiterPreset::Default)),
            },
        };
        let client = RateLimitedClient::new(inner, limiter);
        Ok(match self.cancel {
            Some(token) => client.with_cancellation(token),
            None => client,
        })
    }
}

impl Default for RateLimitedClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
