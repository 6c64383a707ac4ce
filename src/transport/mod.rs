//! Request execution contract and the reqwest-backed implementation.
//!
//! Everything that issues API calls is written against [`ApiClient`]; the
//! rate-limited decorator implements the same trait, so it can stand in for a
//! bare transport anywhere.

pub mod http;

pub use http::HttpTransport;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Query string pairs appended to a request path.
pub type Query<'a> = &'a [(&'a str, &'a str)];

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get<T>(&self, path: &str, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send;

    async fn post<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized;

    async fn put<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized;

    async fn patch<T, B>(&self, path: &str, body: &B, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized;

    async fn delete<T>(&self, path: &str, query: Query<'_>) -> Result<T>
    where
        T: DeserializeOwned + Send;

    /// DELETE where the response body is ignored.
    async fn delete_no_content(&self, path: &str, query: Query<'_>) -> Result<()>;

    async fn get_raw(&self, path: &str, query: Query<'_>) -> Result<Bytes>;

    async fn post_raw(
        &self,
        path: &str,
        body: Bytes,
        content_type: &str,
        query: Query<'_>,
    ) -> Result<Bytes>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Transport error: {0}")]
    Other(String),
}
