//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own storage root, index file
//! and mock upstream.

use super::constants::*;
use super::fixtures::MockUpstream;
use moodplay_server::background_jobs::jobs::{IntegrityVerificationJob, RetentionCleanupJob};
use moodplay_server::background_jobs::{create_scheduler, JobContext};
use moodplay_server::content_index::{
    CleanupOptions, ContentIndexManager, EmptyRetrievalHistory, FavoritesSet,
    IndexManagerOptions, JsonFileIndexStore, StoragePolicy, DEFAULT_REMOTE_STREAM_BASE,
};
use moodplay_server::extractor::{ExtractedMedia, StaticExtractor};
use moodplay_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use moodplay_server::streaming::{DeliverySettings, StreamDelivery, UrlPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with isolated storage
///
/// When dropped, the server and its scheduler shut down and temp resources
/// are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Direct access to the index for assertions
    pub index: Arc<ContentIndexManager>,

    /// The mock media host the extractor points at
    pub upstream: MockUpstream,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    storage_root: PathBuf,
    scheduler_token: CancellationToken,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Starts a mock upstream media host
    /// 2. Seeds a static extractor with URLs on that host
    /// 3. Opens an empty, file-backed content index
    /// 4. Starts the job scheduler with both maintenance jobs
    /// 5. Binds to a random port (127.0.0.1:0) and serves the app
    ///
    /// # Panics
    ///
    /// Panics if any of the above fails or the server doesn't become ready
    /// within the timeout.
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let storage_root = temp_dir.path().join("media");
        std::fs::create_dir(&storage_root).expect("Failed to create storage root");

        let upstream = MockUpstream::spawn().await;
        let extractor = StaticExtractor::new()
            .with_track(REMOTE_TRACK_ID, media(upstream.media_url("remote.webm")))
            .with_track(FAVORITE_TRACK_ID, media(upstream.media_url("fav.webm")))
            .with_track(
                EXPIRED_TRACK_ID,
                media(upstream.expired_media_url("expired.webm")),
            )
            .with_track(BROKEN_TRACK_ID, media(upstream.missing_url()))
            .with_track(NO_HEAD_TRACK_ID, media(upstream.no_head_url("nohead.webm")));

        let index = Arc::new(ContentIndexManager::open(IndexManagerOptions {
            store: Arc::new(JsonFileIndexStore::new(
                temp_dir.path().join("content_index.json"),
            )),
            policy: StoragePolicy::new(&storage_root),
            favorites: Arc::new(FavoritesSet::new([FAVORITE_TRACK_ID])),
            history: Arc::new(EmptyRetrievalHistory),
            remote_stream_base: DEFAULT_REMOTE_STREAM_BASE.to_string(),
        }));

        let delivery = Arc::new(
            StreamDelivery::new(
                index.clone(),
                Arc::new(extractor),
                UrlPolicy::new(["127.0.0.1"], true),
                DeliverySettings {
                    connect_timeout: Duration::from_secs(2),
                    response_timeout: Duration::from_secs(5),
                    ..Default::default()
                },
            )
            .expect("Failed to build stream delivery"),
        );

        // Intervals far in the future: jobs only run on startup or on demand.
        let scheduler_token = CancellationToken::new();
        let job_context = JobContext::new(
            scheduler_token.child_token(),
            index.clone(),
            CleanupOptions::default(),
        );
        let (mut scheduler, scheduler_handle) =
            create_scheduler(scheduler_token.clone(), job_context);
        scheduler
            .register_job(Arc::new(IntegrityVerificationJob::new(Duration::from_secs(
                86_400,
            ))))
            .await;
        scheduler
            .register_job(Arc::new(RetentionCleanupJob::new(
                Duration::from_secs(86_400),
                false,
            )))
            .await;
        tokio::spawn(async move {
            scheduler.run().await;
        });

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port: 0,
        };
        let app = make_app(config, index.clone(), delivery, Some(scheduler_handle));

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            index,
            upstream,
            _temp_dir: temp_dir,
            storage_root,
            scheduler_token,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Directory the index accepts media files from.
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        while start.elapsed() < timeout {
            if let Ok(response) = client.get(format!("{}/", self.base_url)).send().await {
                if response.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        panic!(
            "Server did not become ready within {}ms",
            SERVER_READY_TIMEOUT_MS
        );
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.scheduler_token.cancel();
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn media(url: String) -> ExtractedMedia {
    ExtractedMedia {
        url,
        format: None,
        quality: None,
        content_type: None,
    }
}
