//! Serves a track's bytes from wherever they live.
//!
//! Local copies are streamed from disk; everything else is proxied from the
//! upstream URL the extractor hands out. Both paths answer with the same
//! header set so players never need to know which one they got.

use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::Stream;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, BufReader},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

use super::content_type::{detect_content_type, is_generic_content_type};
use super::range::{parse_content_range, parse_range_request, ByteRange, ResolvedRange};
use super::url_policy::{is_expired, SourceRejection, UrlPolicy};
use crate::content_index::{ContentIndexManager, LocalFile, PlaybackSource, SourceKind};
use crate::extractor::{ExtractorError, MediaExtractor};
use crate::server::metrics;

const STREAM_CHUNK_SIZE: usize = 4096 * 16;
const RETRY_AFTER_SECS: u64 = 5;
const MAX_UPSTREAM_REDIRECTS: usize = 5;

pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (X11; Linux x86_64) moodplay-server/",
    env!("CARGO_PKG_VERSION")
);

/// Per-request progress, logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStage {
    Received,
    Validated,
    LocalServe,
    RemoteProxy,
    FullContent,
    PartialContent,
    Completed,
    Rejected,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid source: {0}")]
    InvalidSource(#[from] SourceRejection),

    #[error("Source URL has expired")]
    Expired,

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream did not respond within {0} seconds")]
    UpstreamTimeout(u64),

    #[error("Upstream responded with status {0}")]
    UpstreamStatus(u16),

    #[error("Extractor returned an invalid response: {0}")]
    BadExtractorResponse(String),
}

impl DeliveryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeliveryError::InvalidSource(_) => StatusCode::BAD_REQUEST,
            DeliveryError::Expired => StatusCode::GONE,
            DeliveryError::TrackNotFound(_) => StatusCode::NOT_FOUND,
            DeliveryError::UpstreamUnreachable(_) | DeliveryError::UpstreamTimeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DeliveryError::UpstreamStatus(_) | DeliveryError::BadExtractorResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Whether the client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::UpstreamUnreachable(_)
                | DeliveryError::UpstreamTimeout(_)
                | DeliveryError::UpstreamStatus(_)
        )
    }

    fn metric_label(&self) -> &'static str {
        match self {
            DeliveryError::InvalidSource(_) => "invalid_source",
            DeliveryError::Expired => "expired",
            DeliveryError::TrackNotFound(_) => "not_found",
            DeliveryError::UpstreamUnreachable(_) => "unreachable",
            DeliveryError::UpstreamTimeout(_) => "timeout",
            DeliveryError::UpstreamStatus(_) => "upstream_status",
            DeliveryError::BadExtractorResponse(_) => "bad_extractor_response",
        }
    }
}

impl From<ExtractorError> for DeliveryError {
    fn from(e: ExtractorError) -> Self {
        match e {
            ExtractorError::NotFound(track_id) => DeliveryError::TrackNotFound(track_id),
            ExtractorError::Unreachable(reason) => DeliveryError::UpstreamUnreachable(reason),
            ExtractorError::InvalidResponse(reason) => DeliveryError::BadExtractorResponse(reason),
        }
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, self.to_string()).into_response();
        apply_common_headers(response.headers_mut());
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Bound on waiting for the upstream's status line and headers. The body
    /// transfer itself is not bounded.
    pub response_timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(15),
        }
    }
}

pub struct StreamDelivery {
    index: Arc<ContentIndexManager>,
    extractor: Arc<dyn MediaExtractor>,
    url_policy: UrlPolicy,
    client: reqwest::Client,
    settings: DeliverySettings,
}

impl StreamDelivery {
    pub fn new(
        index: Arc<ContentIndexManager>,
        extractor: Arc<dyn MediaExtractor>,
        url_policy: UrlPolicy,
        settings: DeliverySettings,
    ) -> anyhow::Result<Self> {
        // Redirects must stay on allow-listed hosts too.
        let redirect_policy = url_policy.clone();
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .redirect(reqwest::redirect::Policy::custom(move |attempt| {
                if attempt.previous().len() >= MAX_UPSTREAM_REDIRECTS {
                    return attempt.stop();
                }
                match redirect_policy.validate_source_url(attempt.url().as_str()) {
                    Ok(_) => attempt.follow(),
                    Err(rejection) => attempt.error(rejection),
                }
            }))
            .build()?;

        Ok(Self {
            index,
            extractor,
            url_policy,
            client,
            settings,
        })
    }

    pub fn url_policy(&self) -> &UrlPolicy {
        &self.url_policy
    }

    /// Hybrid playback: a verified local copy if there is one, the upstream
    /// otherwise.
    pub async fn deliver_track(
        &self,
        track_id: &str,
        range_header: Option<&str>,
        head_only: bool,
    ) -> Result<Response, DeliveryError> {
        log_stage(track_id, DeliveryStage::Received);
        let source = self.index.resolve_playback_source(track_id);
        self.deliver_resolved(track_id, &source, range_header, head_only)
            .await
    }

    /// Serves an already resolved source. A local copy vanishing between
    /// resolution and open is absorbed by falling back to the upstream.
    async fn deliver_resolved(
        &self,
        track_id: &str,
        source: &PlaybackSource,
        range_header: Option<&str>,
        head_only: bool,
    ) -> Result<Response, DeliveryError> {
        if source.kind == SourceKind::Local {
            if let Some(reference) = source.local_reference() {
                match self.index.local_file(&reference) {
                    Some(local) => {
                        log_stage(track_id, DeliveryStage::Validated);
                        match self.serve_local(&local, range_header, head_only).await {
                            Ok(response) => return Ok(response),
                            Err(e) => {
                                warn!(
                                    "Failed to open local copy {} of track {} ({}), falling back to remote",
                                    local.retrieval_id, track_id, e
                                );
                                self.index.mark_unavailable(&reference);
                            }
                        }
                    }
                    None => warn!(
                        "Local copy {} of track {} disappeared, falling back to remote",
                        reference.as_str(),
                        track_id
                    ),
                }
            }
            metrics::record_local_fallback();
        }

        self.deliver_remote_track(track_id, range_header, head_only)
            .await
    }

    /// Metadata-only probe for a track: same headers as playback, no body.
    pub async fn head_metadata(
        &self,
        track_id: &str,
        range_header: Option<&str>,
    ) -> Result<Response, DeliveryError> {
        self.deliver_track(track_id, range_header, true).await
    }

    /// Always goes upstream, asking the extractor for a fresh URL.
    pub async fn deliver_remote_track(
        &self,
        track_id: &str,
        range_header: Option<&str>,
        head_only: bool,
    ) -> Result<Response, DeliveryError> {
        let media = match self.extractor.extract(track_id).await {
            Ok(media) => media,
            Err(e) => return Err(reject(track_id, e.into())),
        };
        debug!("Extractor resolved track {} to {}", track_id, media.url);
        self.deliver_url_with_hint(
            &media.url,
            range_header,
            head_only,
            media.content_type.as_deref(),
        )
        .await
    }

    /// Proxies an explicit upstream URL, after validating it.
    pub async fn deliver_url(
        &self,
        raw_url: &str,
        range_header: Option<&str>,
        head_only: bool,
    ) -> Result<Response, DeliveryError> {
        log_stage(raw_url, DeliveryStage::Received);
        self.deliver_url_with_hint(raw_url, range_header, head_only, None)
            .await
    }

    async fn deliver_url_with_hint(
        &self,
        raw_url: &str,
        range_header: Option<&str>,
        head_only: bool,
        content_type_hint: Option<&str>,
    ) -> Result<Response, DeliveryError> {
        let url = self
            .validate_source(raw_url)
            .map_err(|e| reject(raw_url, e))?;
        log_stage(url.as_str(), DeliveryStage::Validated);

        let result = if head_only {
            self.head_remote(&url, range_header, content_type_hint).await
        } else {
            self.proxy_remote(&url, range_header, content_type_hint).await
        };
        result.map_err(|e| reject(url.as_str(), e))
    }

    /// Allow-list and expiry checks, in that order.
    pub fn validate_source(&self, raw_url: &str) -> Result<Url, DeliveryError> {
        let url = self.url_policy.validate_source_url(raw_url)?;
        if is_expired(&url, Utc::now()) {
            return Err(DeliveryError::Expired);
        }
        Ok(url)
    }

    /// Streams a local file, honoring a single byte range. Fails only when
    /// the file cannot be opened or read, which callers treat as "gone".
    pub async fn serve_local(
        &self,
        local: &LocalFile,
        range_header: Option<&str>,
        head_only: bool,
    ) -> std::io::Result<Response> {
        let subject = local.retrieval_id.as_str();
        log_stage(subject, DeliveryStage::LocalServe);

        let mut file = File::open(&local.path).await?;
        let total = file.metadata().await?.len();
        if total == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "local copy is empty",
            ));
        }

        let range = parse_range_request(range_header, total);
        let (start, length) = match range {
            Some(r) => (r.start, r.length),
            None => (0, total),
        };

        let body = if head_only {
            Body::empty()
        } else {
            if start > 0 {
                file.seek(SeekFrom::Start(start)).await?;
            }
            let reader = BufReader::with_capacity(STREAM_CHUNK_SIZE, file).take(length);
            metrics::record_streamed_bytes("local", length);
            Body::from_stream(ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE))
        };

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        apply_common_headers(headers);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(local.format.content_type()),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        let status = match range {
            Some(r) => {
                insert_content_range(headers, &r, total);
                log_stage(subject, DeliveryStage::PartialContent);
                StatusCode::PARTIAL_CONTENT
            }
            None => {
                log_stage(subject, DeliveryStage::FullContent);
                StatusCode::OK
            }
        };
        *response.status_mut() = status;

        log_stage(subject, DeliveryStage::Completed);
        Ok(response)
    }

    /// Relays the upstream's bytes. A syntactically valid client range is
    /// forwarded; if the upstream refuses it, the full resource is fetched
    /// instead. Dropping the returned body aborts the upstream transfer.
    pub async fn proxy_remote(
        &self,
        url: &Url,
        range_header: Option<&str>,
        content_type_hint: Option<&str>,
    ) -> Result<Response, DeliveryError> {
        let subject = url.host_str().unwrap_or("upstream");
        log_stage(subject, DeliveryStage::RemoteProxy);

        let forwarded = range_header.and_then(ByteRange::parse);
        let mut upstream = self
            .send_upstream(self.upstream_request(reqwest::Method::GET, url, forwarded))
            .await?;
        if upstream.status() == StatusCode::RANGE_NOT_SATISFIABLE && forwarded.is_some() {
            debug!("Upstream refused range {:?}, fetching full resource", forwarded);
            upstream = self
                .send_upstream(self.upstream_request(reqwest::Method::GET, url, None))
                .await?;
        }

        let status = upstream.status();
        if !status.is_success() {
            return Err(DeliveryError::UpstreamStatus(status.as_u16()));
        }
        let status = if status == StatusCode::PARTIAL_CONTENT {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        };

        let mut headers = HeaderMap::new();
        apply_common_headers(&mut headers);
        copy_length_headers(upstream.headers(), &mut headers, status);
        headers.insert(
            header::CONTENT_TYPE,
            content_type_value(upstream.headers(), content_type_hint, url),
        );

        log_stage(
            subject,
            if status == StatusCode::PARTIAL_CONTENT {
                DeliveryStage::PartialContent
            } else {
                DeliveryStage::FullContent
            },
        );

        let body = Body::from_stream(UpstreamBody::new(
            Box::pin(upstream.bytes_stream()),
            subject.to_string(),
        ));
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        log_stage(subject, DeliveryStage::Completed);
        Ok(response)
    }

    /// Answers a HEAD probe without downloading the payload. Upstreams that
    /// refuse HEAD are probed with a one-byte ranged GET instead.
    pub async fn head_remote(
        &self,
        url: &Url,
        range_header: Option<&str>,
        content_type_hint: Option<&str>,
    ) -> Result<Response, DeliveryError> {
        let subject = url.host_str().unwrap_or("upstream");
        log_stage(subject, DeliveryStage::RemoteProxy);

        let forwarded = range_header.and_then(ByteRange::parse);
        let upstream = self
            .send_upstream(self.upstream_request(reqwest::Method::HEAD, url, forwarded))
            .await?;

        let mut headers = HeaderMap::new();
        apply_common_headers(&mut headers);

        let status = if upstream.status().is_success() {
            let status = if upstream.status() == StatusCode::PARTIAL_CONTENT {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };
            copy_length_headers(upstream.headers(), &mut headers, status);
            headers.insert(
                header::CONTENT_TYPE,
                content_type_value(upstream.headers(), content_type_hint, url),
            );
            status
        } else {
            debug!(
                "Upstream refused HEAD with {}, probing with a ranged GET",
                upstream.status()
            );
            let probe = self
                .send_upstream(self.upstream_request(
                    reqwest::Method::GET,
                    url,
                    Some(ByteRange::new(Some(0), Some(0))),
                ))
                .await?;
            if !probe.status().is_success() {
                return Err(DeliveryError::UpstreamStatus(probe.status().as_u16()));
            }
            let total = probe
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range)
                .and_then(|(_, _, total)| total)
                .or_else(|| {
                    // Upstream ignored the range and started the full body.
                    (probe.status() == StatusCode::OK)
                        .then(|| probe.content_length())
                        .flatten()
                });
            headers.insert(
                header::CONTENT_TYPE,
                content_type_value(probe.headers(), content_type_hint, url),
            );
            // Dropping the probe closes its connection before any payload.
            drop(probe);

            match total {
                Some(total) => match parse_range_request(range_header, total) {
                    Some(range) => {
                        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.length));
                        insert_content_range(&mut headers, &range, total);
                        StatusCode::PARTIAL_CONTENT
                    }
                    None => {
                        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(total));
                        StatusCode::OK
                    }
                },
                None => StatusCode::OK,
            }
        };

        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        log_stage(subject, DeliveryStage::Completed);
        Ok(response)
    }

    fn upstream_request(
        &self,
        method: reqwest::Method,
        url: &Url,
        range: Option<ByteRange>,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url.clone())
            .header(header::USER_AGENT, self.settings.user_agent.as_str());
        if let Some(value) = range.and_then(|r| r.header_value()) {
            request = request.header(header::RANGE, value);
        }
        request
    }

    /// Sends with a bound on the time to the response head only.
    async fn send_upstream(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DeliveryError> {
        match tokio::time::timeout(self.settings.response_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(upstream_error(e)),
            Err(_) => Err(DeliveryError::UpstreamTimeout(
                self.settings.response_timeout.as_secs(),
            )),
        }
    }
}

/// Maps a failed upstream request. A redirect refused by the URL policy is
/// a bad source, not an outage. Other failures keep the signed URL out of
/// the client-visible reason.
fn upstream_error(error: reqwest::Error) -> DeliveryError {
    if error.is_redirect() {
        if let Some(rejection) = find_source_rejection(&error) {
            return DeliveryError::InvalidSource(rejection.clone());
        }
    }
    warn!("Upstream request failed: {}", error);
    let reason = if error.is_connect() {
        "connection failed"
    } else if error.is_timeout() {
        "request timed out"
    } else {
        "request failed"
    };
    DeliveryError::UpstreamUnreachable(reason.to_string())
}

fn find_source_rejection<'a>(
    error: &'a (dyn std::error::Error + 'static),
) -> Option<&'a SourceRejection> {
    let mut cause = error.source();
    while let Some(current) = cause {
        if let Some(rejection) = current.downcast_ref::<SourceRejection>() {
            return Some(rejection);
        }
        cause = current.source();
    }
    None
}

fn log_stage(subject: &str, stage: DeliveryStage) {
    debug!("Delivery {}: {:?}", subject, stage);
}

fn reject(subject: &str, error: DeliveryError) -> DeliveryError {
    log_stage(subject, DeliveryStage::Rejected);
    metrics::record_delivery_failure(error.metric_label());
    if error.is_retryable() {
        warn!("Delivery of {} failed: {}", subject, error);
    } else {
        info!("Delivery of {} rejected: {}", subject, error);
    }
    error
}

/// Permissive CORS plus range support, identical for local and remote.
fn apply_common_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Range, Accept-Ranges, Content-Type"),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
}

fn insert_content_range(headers: &mut HeaderMap, range: &ResolvedRange, total: u64) {
    if let Ok(value) = HeaderValue::from_str(&range.content_range(total)) {
        headers.insert(header::CONTENT_RANGE, value);
    }
}

/// Copies `Content-Length` and, for partial responses, `Content-Range`,
/// computing the length from the range when the upstream left it out.
fn copy_length_headers(upstream: &HeaderMap, headers: &mut HeaderMap, status: StatusCode) {
    if let Some(length) = upstream.get(header::CONTENT_LENGTH) {
        headers.insert(header::CONTENT_LENGTH, length.clone());
    }
    if status != StatusCode::PARTIAL_CONTENT {
        return;
    }
    if let Some(content_range) = upstream.get(header::CONTENT_RANGE) {
        headers.insert(header::CONTENT_RANGE, content_range.clone());
        if !headers.contains_key(header::CONTENT_LENGTH) {
            if let Some((start, end, _)) = content_range.to_str().ok().and_then(parse_content_range) {
                headers.insert(
                    header::CONTENT_LENGTH,
                    HeaderValue::from(end.saturating_sub(start) + 1),
                );
            }
        }
    }
}

fn content_type_value(upstream: &HeaderMap, hint: Option<&str>, url: &Url) -> HeaderValue {
    let declared = upstream
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| !is_generic_content_type(ct))
        .or(hint);
    let detected = detect_content_type(declared, url);
    HeaderValue::from_str(&detected)
        .unwrap_or_else(|_| HeaderValue::from_static(super::content_type::FALLBACK_CONTENT_TYPE))
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Upstream body relayed to the client. Dropping it (client gone) drops the
/// upstream response, which aborts that connection.
struct UpstreamBody {
    inner: ByteStream,
    host: String,
    bytes: u64,
    finished: bool,
}

impl UpstreamBody {
    fn new(inner: ByteStream, host: String) -> Self {
        Self {
            inner,
            host,
            bytes: 0,
            finished: false,
        }
    }
}

impl Stream for UpstreamBody {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => self.bytes += chunk.len() as u64,
            Poll::Ready(Some(Err(e))) => {
                warn!("Upstream transfer from {} failed: {}", self.host, e);
                self.finished = true;
            }
            Poll::Ready(None) => self.finished = true,
            Poll::Pending => {}
        }
        polled
    }
}

impl Drop for UpstreamBody {
    fn drop(&mut self) {
        metrics::record_streamed_bytes("remote", self.bytes);
        if !self.finished {
            debug!(
                "Client went away after {} bytes, aborting upstream transfer from {}",
                self.bytes, self.host
            );
        }
    }
}
