//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::Value;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_range(request: reqwest::RequestBuilder, range: Option<&str>) -> reqwest::RequestBuilder {
        match range {
            Some(range) => request.header("Range", range),
            None => request,
        }
    }

    pub async fn home(&self) -> Response {
        self.client
            .get(self.url("/"))
            .send()
            .await
            .expect("Home request failed")
    }

    // ========================================================================
    // Streaming Endpoints
    // ========================================================================

    /// GET /v1/stream/{track_id} - local copy if present, upstream otherwise
    pub async fn stream(&self, track_id: &str, range: Option<&str>) -> Response {
        let request = self
            .client
            .get(self.url(&format!("/v1/stream/{}", track_id)));
        Self::with_range(request, range)
            .send()
            .await
            .expect("Stream request failed")
    }

    /// HEAD /v1/stream/{track_id}
    pub async fn head_stream(&self, track_id: &str, range: Option<&str>) -> Response {
        let request = self
            .client
            .head(self.url(&format!("/v1/stream/{}", track_id)));
        Self::with_range(request, range)
            .send()
            .await
            .expect("Stream HEAD request failed")
    }

    /// GET /v1/stream/{track_id}/remote - always upstream
    pub async fn stream_remote(&self, track_id: &str, range: Option<&str>) -> Response {
        let request = self
            .client
            .get(self.url(&format!("/v1/stream/{}/remote", track_id)));
        Self::with_range(request, range)
            .send()
            .await
            .expect("Remote stream request failed")
    }

    /// GET /v1/proxy?url=...
    pub async fn proxy(&self, upstream_url: &str, range: Option<&str>) -> Response {
        let request = self
            .client
            .get(self.url("/v1/proxy"))
            .query(&[("url", upstream_url)]);
        Self::with_range(request, range)
            .send()
            .await
            .expect("Proxy request failed")
    }

    /// HEAD /v1/proxy?url=...
    pub async fn head_proxy(&self, upstream_url: &str) -> Response {
        self.client
            .head(self.url("/v1/proxy"))
            .query(&[("url", upstream_url)])
            .send()
            .await
            .expect("Proxy HEAD request failed")
    }

    /// GET /v1/playback/{track_id} - where playback would come from
    pub async fn playback_source(&self, track_id: &str) -> Response {
        self.client
            .get(self.url(&format!("/v1/playback/{}", track_id)))
            .send()
            .await
            .expect("Playback source request failed")
    }

    // ========================================================================
    // Library Endpoints
    // ========================================================================

    /// POST /v1/library/ingest
    pub async fn ingest(&self, body: &Value) -> Response {
        self.client
            .post(self.url("/v1/library/ingest"))
            .json(body)
            .send()
            .await
            .expect("Ingest request failed")
    }

    /// GET /v1/library with optional `q`, `mood` and `format` filters
    pub async fn list_library(&self, filters: &[(&str, &str)]) -> Response {
        self.client
            .get(self.url("/v1/library"))
            .query(filters)
            .send()
            .await
            .expect("Library list request failed")
    }

    /// GET /v1/library/stats
    pub async fn library_stats(&self) -> Response {
        self.client
            .get(self.url("/v1/library/stats"))
            .send()
            .await
            .expect("Library stats request failed")
    }

    /// GET /v1/library/{retrieval_id}
    pub async fn get_entry(&self, retrieval_id: &str) -> Response {
        self.client
            .get(self.url(&format!("/v1/library/{}", retrieval_id)))
            .send()
            .await
            .expect("Library entry request failed")
    }

    /// DELETE /v1/library/{retrieval_id}
    pub async fn delete_entry(&self, retrieval_id: &str) -> Response {
        self.client
            .delete(self.url(&format!("/v1/library/{}", retrieval_id)))
            .send()
            .await
            .expect("Library delete request failed")
    }

    /// POST /v1/library/verify
    pub async fn verify(&self) -> Response {
        self.client
            .post(self.url("/v1/library/verify"))
            .send()
            .await
            .expect("Verify request failed")
    }

    /// POST /v1/library/cleanup
    pub async fn cleanup(&self, options: &Value) -> Response {
        self.client
            .post(self.url("/v1/library/cleanup"))
            .json(options)
            .send()
            .await
            .expect("Cleanup request failed")
    }

    /// GET /v1/library/export
    pub async fn export(&self) -> Response {
        self.client
            .get(self.url("/v1/library/export"))
            .send()
            .await
            .expect("Export request failed")
    }

    /// POST /v1/library/import
    pub async fn import(&self, document: &Value) -> Response {
        self.client
            .post(self.url("/v1/library/import"))
            .json(document)
            .send()
            .await
            .expect("Import request failed")
    }

    // ========================================================================
    // Admin Endpoints
    // ========================================================================

    /// GET /v1/admin/jobs
    pub async fn list_jobs(&self) -> Response {
        self.client
            .get(self.url("/v1/admin/jobs"))
            .send()
            .await
            .expect("List jobs request failed")
    }

    /// GET /v1/admin/jobs/{job_id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        self.client
            .get(self.url(&format!("/v1/admin/jobs/{}", job_id)))
            .send()
            .await
            .expect("Get job request failed")
    }

    /// POST /v1/admin/jobs/{job_id}/trigger
    pub async fn trigger_job(&self, job_id: &str) -> Response {
        self.client
            .post(self.url(&format!("/v1/admin/jobs/{}/trigger", job_id)))
            .send()
            .await
            .expect("Trigger job request failed")
    }
}
