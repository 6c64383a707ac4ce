use crate::transport::{ApiClient, Query, TransportError};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use keyring::Entry;
use reqwest::{Method, Proxy, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::env;
use std::time::{Duration, Instant};
use tracing::info;
use url::Url;

/// Keyring service under which an access token may be stored.
const KEYRING_SERVICE: &str = "gcloud";
const KEYRING_USER: &str = "access-token";
const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// JSON-over-HTTP client for a single Google Cloud API root
/// (e.g. `https://compute.googleapis.com/compute/v1/`).
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        // Paths are joined onto the base, which only keeps the last segment with a trailing slash.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)
        } else {
            Url::parse(&format!("{}/", base_url))
        }
        .map_err(|e| Error::Transport(TransportError::InvalidUrl(e)))?;

        // Minimal production-friendly defaults (env-overridable).
        let timeout_secs = env::var("GCP_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(
                env::var("GCP_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("GCP_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            base_url,
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Look up a bearer token in the OS keyring, then in `GOOGLE_OAUTH_ACCESS_TOKEN`.
    pub fn with_default_credentials(mut self) -> Self {
        self.access_token = Self::resolve_access_token();
        self
    }

    fn resolve_access_token() -> Option<String> {
        if let Ok(entry) = Entry::new(KEYRING_SERVICE, KEYRING_USER) {
            if let Ok(token) = entry.get_password() {
                return Some(token);
            }
        }
        env::var(ACCESS_TOKEN_ENV).ok()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Transport(TransportError::InvalidUrl(e)))
    }

    fn request(&self, method: Method, path: &str, query: Query<'_>) -> Result<RequestBuilder> {
        let mut req = self
            .client
            .request(method, self.url(path)?)
            .header("x-request-id", uuid::Uuid::new_v4().to_string());
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }

    async fn send(&self, req: RequestBuilder, method: &Method, path: &str) -> Result<Response> {
        let start = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let status = status.as_u16();
        let message = resp.text().await.unwrap_or_default();
        info!(
            http_status = status,
            method = method.as_str(),
            path,
            duration_ms = start.elapsed().as_millis() as u64,
            "gcp api request failed"
        );
        Err(Error::Remote {
            status,
            message,
            retryable: status == 429 || status >= 500,
        })
    }

    async fn body_bytes(resp: Response) -> Result<Bytes> {
        resp.bytes()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))
    }

    async fn execute_json<T>(&self, req: RequestBuilder, method: Method, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let resp = self.send(req, &method, path).await?;
        let bytes = Self::body_bytes(resp).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn execute_with_body<T, B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        query: Query<'_>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let req = self.request(method.clone(), path, query)?.json(body);
        self.execute_json(req, method, path).await
    }
}

#[async_trait]
impl ApiClient for HttpTransport {
    async fn get<T>(&self, path: &str, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        let req = self.request(Method::GET, path, query)?;
        self.execute_json(req, Method::GET, path).await
    }

    async fn post<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized,
    {
        self.execute_with_body(Method::POST, path, body, query).await
    }

    async fn put<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized,
    {
        self.execute_with_body(Method::PUT, path, body, query).await
    }

    async fn patch<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized,
    {
        self.execute_with_body(Method::PATCH, path, body, query).await
    }

    async fn delete<T>(&self, path: &str, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        let req = self.request(Method::DELETE, path, query)?;
        self.execute_json(req, Method::DELETE, path).await
    }

    async fn delete_no_content(&self, path: &str, query: Query<'_>) -> Result<()> {
        let req = self.request(Method::DELETE, path, query)?;
        self.send(req, &Method::DELETE, path).await?;
        Ok(())
    }

    async fn get_raw(&self, path: &str, query: Query<'_>) -> Result<Bytes> {
        let req = self.request(Method::GET, path, query)?;
        let resp = self.send(req, &Method::GET, path).await?;
        Self::body_bytes(resp).await
    }

    async fn post_raw(
        &self,
        path: &str,
        body: Bytes,
        content_type: &str,
        query: Query<'_>,
    ) -> Result<Bytes> {
        let req = self
            .request(Method::POST, path, query)?
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        let resp = self.send(req, &Method::POST, path).await?;
        Self::body_bytes(resp).await
    }
}
