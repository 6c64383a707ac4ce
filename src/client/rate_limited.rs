use crate::client::stats::ClientStats;
use crate::resilience::{Limiter, RateLimiter, RateLimiterConfig, RateLimiterPreset};
use crate::transport::{ApiClient, Query};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Tokens spent per outbound call.
const REQUEST_COST: f64 = 1.0;

/// Decorator that forces every call through a [`Limiter`] before delegating.
///
/// Limiter failures are returned as [`Error::RateLimit`](crate::Error::RateLimit)
/// and the inner client is not called. Errors from the inner client are
/// returned untouched.
pub struct RateLimitedClient<C> {
    inner: Arc<C>,
    limiter: Arc<dyn Limiter>,
    cancel: Option<CancellationToken>,
}

impl<C> Clone for RateLimitedClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C: ApiClient> RateLimitedClient<C> {
    pub fn new(inner: Arc<C>, limiter: Arc<dyn Limiter>) -> Self {
        Self {
            inner,
            limiter,
            cancel: None,
        }
    }

    pub fn with_config(inner: Arc<C>, cfg: RateLimiterConfig) -> Self {
        Self::new(inner, Arc::new(RateLimiter::new(cfg)))
    }

    pub fn with_preset(inner: Arc<C>, preset: RateLimiterPreset) -> Self {
        Self::with_config(inner, preset.config())
    }

    /// Abort pending limiter waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    pub fn limiter(&self) -> &Arc<dyn Limiter> {
        &self.limiter
    }

    /// Spend the token for one call.
    pub async fn acquire_permit(&self) -> Result<()> {
        match &self.cancel {
            Some(token) => {
                self.limiter
                    .acquire_with_cancel(REQUEST_COST, token)
                    .await?
            }
            None => self.limiter.acquire(REQUEST_COST).await?,
        }
        Ok(())
    }

    pub async fn stats(&self) -> ClientStats {
        ClientStats {
            available_tokens: self.limiter.available_tokens().await,
            fill_ratio: self.limiter.fill_ratio().await,
        }
    }
}

#[async_trait]
impl<C: ApiClient> ApiClient for RateLimitedClient<C> {
    async fn get<T>(&self, path: &str, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        self.acquire_permit().await?;
        trace!(method = "GET", path, "rate limiter admitted request");
        self.inner.get(path, query).await
    }

    async fn post<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized,
    {
        self.acquire_permit().await?;
        trace!(method = "POST", path, "rate limiter admitted request");
        self.inner.post(path, body, query).await
    }

    async fn put<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized,
    {
        self.acquire_permit().await?;
        trace!(method = "PUT", path, "rate limiter admitted request");
        self.inner.put(path, body, query).await
    }

    async fn patch<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized,
    {
        self.acquire_permit().await?;
        trace!(method = "PATCH", path, "rate limiter admitted request");
        self.inner.patch(path, body, query).await
    }

    async fn delete<T>(&self, path: &str, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        self.acquire_permit().await?;
        trace!(method = "DELETE", path, "rate limiter admitted request");
        self.inner.delete(path, query).await
    }

    async fn delete_no_content(&self, path: &str, query: Query<'_>) -> Result<()> {
        self.acquire_permit().await?;
        trace!(method = "DELETE", path, "rate limiter admitted request");
        self.inner.delete_no_content(path, query).await
    }

    async fn get_raw(&self, path: &str, query: Query<'_>) -> Result<Bytes> {
        self.acquire_permit().await?;
        trace!(method = "GET", path, "rate limiter admitted request");
        self.inner.get_raw(path, query).await
    }

    async fn post_raw(
        &self,
        path: &str,
        body: Bytes,
        content_type: &str,
        query: Query<'_>,
    ) -> Result<Bytes> {
        self.acquire_permit().await?;
        trace!(method = "POST", path, content_type, "rate limiter admitted request");
        self.inner.post_raw(path, body, content_type, query).await
    }
}
