use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use moodplay_server::background_jobs::jobs::{IntegrityVerificationJob, RetentionCleanupJob};
use moodplay_server::background_jobs::{create_scheduler, JobContext};
use moodplay_server::config::{self, AppConfig, FileConfig};
use moodplay_server::content_index::{
    ContentIndexManager, EmptyRetrievalHistory, FavoritesFile, FavoritesProvider,
    IndexManagerOptions, JsonFileIndexStore, JsonFileRetrievalHistory, NoFavorites,
    RetrievalHistory, StoragePolicy,
};
use moodplay_server::extractor::{ExtractorClient, MediaExtractor, StaticExtractor};
use moodplay_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use moodplay_server::streaming::StreamDelivery;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding retrieved media files. Nothing outside it is ever served.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub storage_root: Option<PathBuf>,

    /// Where the content index is persisted. Defaults to content_index.json in the storage root.
    #[clap(long, value_parser = parse_path)]
    pub index_path: Option<PathBuf>,

    /// JSON file with the retrieval history, used to rebuild a missing or corrupt index.
    #[clap(long, value_parser = parse_path)]
    pub retrieval_history_path: Option<PathBuf>,

    /// JSON array of favorite track ids protected from cleanup.
    #[clap(long, value_parser = parse_path)]
    pub favorites_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// URL of the extraction service resolving track ids to upstream media URLs.
    #[clap(long)]
    pub extractor_url: Option<String>,

    /// Timeout in seconds for extractor requests.
    #[clap(long, default_value_t = 30)]
    pub extractor_timeout_sec: u64,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            storage_root: args.storage_root.clone(),
            index_path: args.index_path.clone(),
            retrieval_history_path: args.retrieval_history_path.clone(),
            favorites_path: args.favorites_path.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            extractor_url: args.extractor_url.clone(),
            extractor_timeout_sec: args.extractor_timeout_sec,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&config::CliConfig::from(&cli_args), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let favorites: Arc<dyn FavoritesProvider> = match &app_config.favorites_path {
        Some(path) => {
            let favorites = FavoritesFile::new(path);
            if favorites.is_empty() {
                warn!("No favorites loaded from {:?} yet", path);
            }
            Arc::new(favorites)
        }
        None => Arc::new(NoFavorites),
    };
    let history: Arc<dyn RetrievalHistory> = match &app_config.retrieval_history_path {
        Some(path) => Arc::new(JsonFileRetrievalHistory::new(path)),
        None => Arc::new(EmptyRetrievalHistory),
    };

    info!("Opening content index at {:?}...", app_config.index_path);
    let index = Arc::new(ContentIndexManager::open(IndexManagerOptions {
        store: Arc::new(JsonFileIndexStore::new(&app_config.index_path)),
        policy: StoragePolicy::new(&app_config.storage_root),
        favorites,
        history,
        remote_stream_base: app_config.streaming.remote_stream_base.clone(),
    }));
    let stats = index.stats();
    info!(
        "Content index ready: {} entries ({} available)",
        stats.entries, stats.available
    );

    let extractor: Arc<dyn MediaExtractor> = match &app_config.extractor_url {
        Some(url) => {
            info!("Extractor service configured at {}", url);
            let client = ExtractorClient::new(url, app_config.extractor_timeout_sec)?;
            if let Err(e) = client.health_check().await {
                warn!("Extractor health check failed, continuing anyway: {:#}", e);
            }
            Arc::new(client)
        }
        None => {
            warn!("No extractor configured, remote playback will be unavailable");
            Arc::new(StaticExtractor::new())
        }
    };

    let delivery = Arc::new(StreamDelivery::new(
        index.clone(),
        extractor,
        app_config.url_policy(),
        app_config.delivery_settings(),
    )?);

    // Set up background job scheduler
    let shutdown_token = CancellationToken::new();
    let job_context = JobContext::new(
        shutdown_token.child_token(),
        index.clone(),
        app_config.cleanup_options(),
    );
    let (mut scheduler, scheduler_handle) = create_scheduler(shutdown_token.clone(), job_context);

    scheduler
        .register_job(Arc::new(IntegrityVerificationJob::new(
            app_config.integrity_interval(),
        )))
        .await;
    if app_config.retention.enabled {
        scheduler
            .register_job(Arc::new(RetentionCleanupJob::new(
                app_config.retention_interval(),
                app_config.retention.run_after_ingest,
            )))
            .await;
    } else {
        info!("Retention cleanup disabled");
    }

    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count().await
    );

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            metrics::update_memory_usage();
        }
    });

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
    };

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    tokio::select! {
        result = run_server(server_config, index, delivery, Some(scheduler_handle)) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result
        },
        _ = scheduler.run() => {
            info!("Scheduler stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
