//! HTTP transport seam.
//!
//! The fetch coordinator and image loader consume remote bytes through the
//! [`RemoteClient`] trait so tests can substitute a scripted transport.
//! [`HttpRemoteClient`] is the production implementation backed by `reqwest`.

use crate::error::{AnimError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::time::Duration;

/// A streaming response from a remote source.
pub struct RemoteResponse {
    /// HTTP status code.
    pub status: u16,
    /// Declared `Content-Length`, when the server provides one.
    pub content_length: Option<u64>,
    /// Response body as a chunk stream. Each chunk boundary is a
    /// cancellation checkpoint for the consumer.
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl RemoteResponse {
    /// Returns `true` if the status is a 2xx success.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Async transport used to fetch remote assets.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Issue a GET request and return the streaming response.
    async fn get(&self, url: &str, headers: &HashMap<String, String>) -> Result<RemoteResponse>;
}

/// Production transport backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: reqwest::Client,
}

impl HttpRemoteClient {
    /// Create a client with a 30s connect timeout.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Wrap an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn get(&self, url: &str, headers: &HashMap<String, String>) -> Result<RemoteResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AnimError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map_err(|e| AnimError::Network(e.to_string()))
            .boxed();

        Ok(RemoteResponse {
            status,
            content_length,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_status_range() {
        let ok = RemoteResponse {
            status: 200,
            content_length: None,
            body: futures::stream::empty().boxed(),
        };
        assert!(ok.is_success());

        let not_found = RemoteResponse {
            status: 404,
            content_length: None,
            body: futures::stream::empty().boxed(),
        };
        assert!(!not_found.is_success());
    }
}
