//! Comic Source Client
//!
//! Fetches a single comic by id. The pipeline only depends on the `Source` trait, so tests
//! and alternative backends can stand in for the HTTP client.

use super::types::{FetchError, SourceRecord};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

#[async_trait]
pub trait Source: Send + Sync {
    /// Fetches comic `id`. A missing comic maps to `FetchError::NotFound`, anything else
    /// that goes wrong maps to `FetchError::Transient`.
    async fn fetch(&self, id: u64) -> Result<SourceRecord, FetchError>;
}

/// Source backed by the xkcd-style JSON API.
///
/// Holds no mutable state; one instance is shared by every fetch worker.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Uses a preconfigured client (proxies, TLS, timeouts are the caller's).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn comic_url(&self, id: u64) -> String {
        format!("{}/{}/info.0.json", self.base_url, id)
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, id: u64) -> Result<SourceRecord, FetchError> {
        let transient = |reason: String| FetchError::Transient { id, reason };

        let response = self
            .client
            .get(self.comic_url(id))
            .send()
            .await
            .map_err(|err| transient(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound { id });
        }
        if !status.is_success() {
            return Err(transient(format!("received non-200 response status: {}", status)));
        }

        let record: SourceRecord = response
            .json()
            .await
            .map_err(|err| transient(format!("error decoding comic: {}", err)))?;

        if record.num != id {
            return Err(transient(format!("payload carries id {}", record.num)));
        }

        Ok(record)
    }
}
