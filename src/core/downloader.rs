//! Segment fetching over HTTP
//!
//! The orchestrator talks to the network only through [`SegmentFetcher`],
//! so tests and embedders can swap in their own transport.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;

use crate::core::error_handling::FetchError;
use crate::core::models::{AppError, AppResult};

/// Single-attempt fetch primitive; retries and timeouts live in the caller
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// reqwest-backed fetcher
#[derive(Debug, Clone)]
pub struct HttpSegmentFetcher {
    client: Client,
    text_timeout: Duration,
}

impl HttpSegmentFetcher {
    /// `text_timeout` bounds [`fetch_text`](Self::fetch_text) end to end
    pub fn new(client: Client, text_timeout: Duration) -> Self {
        Self {
            client,
            text_timeout,
        }
    }

    /// Fetch playlist text, used when a capture has to be taken by hand
    pub async fn fetch_text(&self, url: &str) -> AppResult<String> {
        tokio::time::timeout(self.text_timeout, self.request_text(url))
            .await
            .map_err(|_| AppError::Timeout(format!("{} after {:?}", url, self.text_timeout)))?
    }

    async fn request_text(&self, url: &str) -> AppResult<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Parse(format!(
                "Failed to fetch playlist {}: {}",
                url,
                response.status()
            )));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SegmentFetcher for HttpSegmentFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Segment request failed: {} - {}", url, status);
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.bytes().await?)
    }
}
