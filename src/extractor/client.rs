//! HTTP client for the external extraction provider.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use super::models::{ExtractedMedia, ExtractorError};
use super::MediaExtractor;

/// HTTP client for communicating with the extraction provider.
pub struct ExtractorClient {
    client: reqwest::Client,
    base_url: String,
}

impl ExtractorClient {
    /// Create a new extractor client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the extraction provider (e.g., "http://localhost:8090")
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: &str, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create extractor HTTP client")?;

        // Ensure base_url doesn't have trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    /// Check if the extraction provider is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to connect to extraction provider")?;

        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!(
                "Extractor health check failed with status: {}",
                response.status()
            )
        }
    }
}

#[async_trait]
impl MediaExtractor for ExtractorClient {
    async fn extract(&self, track_id: &str) -> Result<ExtractedMedia, ExtractorError> {
        let url = format!(
            "{}/extract/{}",
            self.base_url,
            urlencoding::encode(track_id)
        );
        debug!("Asking extractor for {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExtractorError::Unreachable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ExtractorError::NotFound(track_id.to_string())),
            status => {
                return Err(ExtractorError::Unreachable(format!(
                    "extractor returned status {}",
                    status
                )))
            }
        }

        let media: ExtractedMedia = response
            .json()
            .await
            .map_err(|e| ExtractorError::InvalidResponse(e.to_string()))?;
        if media.url.trim().is_empty() {
            return Err(ExtractorError::InvalidResponse(
                "empty media url".to_string(),
            ));
        }
        Ok(media)
    }
}
