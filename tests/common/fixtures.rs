//! Test fixtures: media files on disk, ingest payloads and the mock upstream
//! media host the proxy fetches from.

use super::constants::*;
use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

/// Completion time stamped on ingested fixtures, old enough for any
/// age-based cleanup to consider them.
const FIXTURE_COMPLETED_AT: &str = "2020-01-01T00:00:00Z";

/// Deterministic payload, so tests can compare any slice of it.
pub fn upstream_bytes() -> Vec<u8> {
    patterned_bytes(UPSTREAM_MEDIA_SIZE)
}

fn patterned_bytes(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Writes a patterned media file of `size` bytes under `dir`.
pub fn write_media_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, patterned_bytes(size)).expect("Failed to write media file");
    path
}

/// Body for `POST /v1/library/ingest` describing a completed retrieval of
/// an existing file. The format is left to the file extension.
pub fn ingest_body(retrieval_id: &str, track_id: &str, path: &Path, mood_tags: &[&str]) -> Value {
    let size = std::fs::metadata(path)
        .expect("Media file must exist before ingest")
        .len();
    json!({
        "record": {
            "retrieval_id": retrieval_id,
            "track_id": track_id,
            "status": "completed",
            "file_path": path,
            "file_size_bytes": size,
            "completed_at": FIXTURE_COMPLETED_AT,
        },
        "metadata": {
            "title": format!("Title of {}", retrieval_id),
            "artist": "Test Artist",
            "mood_tags": mood_tags,
        }
    })
}

// ============================================================================
// Mock upstream
// ============================================================================

/// A local HTTP server standing in for the media CDN.
pub struct MockUpstream {
    pub base_url: String,
    _shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl MockUpstream {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let port = listener
            .local_addr()
            .expect("Failed to get mock upstream address")
            .port();

        let app = Router::new()
            .route("/media/{name}", get(serve_media))
            .route("/no-head/{name}", get(serve_media).head(refuse_head))
            .route("/offsite/{name}", get(redirect_offsite));

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Mock upstream failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            _shutdown_tx: shutdown_tx,
        }
    }

    /// URL of a payload, valid for another hour.
    pub fn media_url(&self, name: &str) -> String {
        self.url_with_expiry("media", name, chrono::Utc::now().timestamp() + 3600)
    }

    pub fn expired_media_url(&self, name: &str) -> String {
        self.url_with_expiry("media", name, chrono::Utc::now().timestamp() - 60)
    }

    pub fn no_head_url(&self, name: &str) -> String {
        self.url_with_expiry("no-head", name, chrono::Utc::now().timestamp() + 3600)
    }

    /// URL that redirects to a host outside any allow-list.
    pub fn offsite_redirect_url(&self, name: &str) -> String {
        self.url_with_expiry("offsite", name, chrono::Utc::now().timestamp() + 3600)
    }

    /// URL on the mock host that no route answers.
    pub fn missing_url(&self) -> String {
        self.url_with_expiry("missing", "gone.webm", chrono::Utc::now().timestamp() + 3600)
    }

    fn url_with_expiry(&self, prefix: &str, name: &str, expire: i64) -> String {
        format!("{}/{}/{}?expire={}", self.base_url, prefix, name, expire)
    }
}

/// Parses `bytes=a-b`, `bytes=a-` and `bytes=-n` against `total`.
/// `Err(())` means the range cannot be satisfied.
fn parse_range(value: &str, total: usize) -> Result<Option<(usize, usize)>, ()> {
    let Some(bounds) = value.strip_prefix("bytes=") else {
        return Ok(None);
    };
    let Some((start, end)) = bounds.split_once('-') else {
        return Ok(None);
    };
    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => {
            let n: usize = suffix.parse().map_err(|_| ())?;
            (total.saturating_sub(n), total - 1)
        }
        (start, "") => (start.parse().map_err(|_| ())?, total - 1),
        (start, end) => (
            start.parse().map_err(|_| ())?,
            end.parse::<usize>().map_err(|_| ())?.min(total - 1),
        ),
    };
    if start >= total || start > end {
        return Err(());
    }
    Ok(Some((start, end)))
}

async fn serve_media(headers: HeaderMap) -> Response {
    let bytes = upstream_bytes();
    let total = bytes.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_range(v, total))
        .unwrap_or(Ok(None));

    match range {
        Ok(Some((start, end))) => {
            let body = bytes[start..=end].to_vec();
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, UPSTREAM_CONTENT_TYPE.to_string()),
                    (header::CONTENT_LENGTH, body.len().to_string()),
                    (
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", start, end, total),
                    ),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                Body::from(body),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, UPSTREAM_CONTENT_TYPE.to_string()),
                (header::CONTENT_LENGTH, total.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            Body::from(bytes),
        )
            .into_response(),
        Err(()) => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{}", total))],
        )
            .into_response(),
    }
}

async fn redirect_offsite() -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, "http://media.evil.invalid/stolen.webm")],
    )
        .into_response()
}

async fn refuse_head() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}
