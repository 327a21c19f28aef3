mod file_config;

pub use file_config::{FileConfig, IntegrityConfig, RetentionConfig, StreamingConfig};

use crate::content_index::{CleanupOptions, DEFAULT_REMOTE_STREAM_BASE};
use crate::server::RequestsLoggingLevel;
use crate::streaming::{DeliverySettings, UrlPolicy, DEFAULT_ALLOWED_HOSTS, DEFAULT_USER_AGENT};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

const INDEX_FILE_NAME: &str = "content_index.json";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub storage_root: Option<PathBuf>,
    pub index_path: Option<PathBuf>,
    pub retrieval_history_path: Option<PathBuf>,
    pub favorites_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub extractor_url: Option<String>,
    pub extractor_timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub storage_root: PathBuf,
    pub index_path: PathBuf,
    pub retrieval_history_path: Option<PathBuf>,
    pub favorites_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub extractor_url: Option<String>,
    pub extractor_timeout_sec: u64,

    // Feature configs (with defaults)
    pub streaming: StreamingSettings,
    pub retention: RetentionSettings,
    pub integrity: IntegritySettings,
}

#[derive(Debug, Clone)]
pub struct StreamingSettings {
    pub allowed_hosts: Vec<String>,
    pub allow_insecure_upstream: bool,
    pub upstream_connect_timeout_secs: u64,
    pub upstream_response_timeout_secs: u64,
    pub user_agent: String,
    pub remote_stream_base: String,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
            allow_insecure_upstream: false,
            upstream_connect_timeout_secs: 10,
            upstream_response_timeout_secs: 15,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            remote_stream_base: DEFAULT_REMOTE_STREAM_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionSettings {
    /// Whether the scheduled cleanup job is registered at all.
    pub enabled: bool,
    pub older_than_days: u32,
    pub max_total_size_bytes: u64,
    pub keep_favorites: bool,
    pub interval_hours: u64,
    /// Also sweep right after every successful ingest.
    pub run_after_ingest: bool,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        let options = CleanupOptions::default();
        Self {
            enabled: true,
            older_than_days: options.older_than_days,
            max_total_size_bytes: options.max_total_size_bytes,
            keep_favorites: options.keep_favorites,
            interval_hours: 24,
            run_after_ingest: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegritySettings {
    pub interval_hours: u64,
}

impl Default for IntegritySettings {
    fn default() -> Self {
        Self { interval_hours: 6 }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let storage_root = file
            .storage_root
            .map(PathBuf::from)
            .or_else(|| cli.storage_root.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "storage_root must be specified via --storage-root or in config file"
                )
            })?;

        if !storage_root.exists() {
            bail!("Storage root does not exist: {:?}", storage_root);
        }
        if !storage_root.is_dir() {
            bail!("storage_root is not a directory: {:?}", storage_root);
        }

        let index_path = file
            .index_path
            .map(PathBuf::from)
            .or_else(|| cli.index_path.clone())
            .unwrap_or_else(|| storage_root.join(INDEX_FILE_NAME));
        let retrieval_history_path = file
            .retrieval_history_path
            .map(PathBuf::from)
            .or_else(|| cli.retrieval_history_path.clone());
        let favorites_path = file
            .favorites_path
            .map(PathBuf::from)
            .or_else(|| cli.favorites_path.clone());

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let extractor_url = file.extractor_url.or_else(|| cli.extractor_url.clone());
        let extractor_timeout_sec = file
            .extractor_timeout_sec
            .unwrap_or(cli.extractor_timeout_sec);

        let streaming_file = file.streaming.unwrap_or_default();
        let streaming_defaults = StreamingSettings::default();
        let allowed_hosts = streaming_file
            .allowed_hosts
            .unwrap_or(streaming_defaults.allowed_hosts);
        if allowed_hosts.iter().all(|h| h.trim().is_empty()) {
            bail!("[streaming] allowed_hosts must list at least one host");
        }
        let streaming = StreamingSettings {
            allowed_hosts,
            allow_insecure_upstream: streaming_file
                .allow_insecure_upstream
                .unwrap_or(streaming_defaults.allow_insecure_upstream),
            upstream_connect_timeout_secs: streaming_file
                .upstream_connect_timeout_secs
                .unwrap_or(streaming_defaults.upstream_connect_timeout_secs),
            upstream_response_timeout_secs: streaming_file
                .upstream_response_timeout_secs
                .unwrap_or(streaming_defaults.upstream_response_timeout_secs),
            user_agent: streaming_file
                .user_agent
                .unwrap_or(streaming_defaults.user_agent),
            remote_stream_base: streaming_file
                .remote_stream_base
                .unwrap_or(streaming_defaults.remote_stream_base),
        };

        let retention_file = file.retention.unwrap_or_default();
        let retention_defaults = RetentionSettings::default();
        let retention = RetentionSettings {
            enabled: retention_file.enabled.unwrap_or(retention_defaults.enabled),
            older_than_days: retention_file
                .older_than_days
                .unwrap_or(retention_defaults.older_than_days),
            max_total_size_bytes: retention_file
                .max_total_size_bytes
                .unwrap_or(retention_defaults.max_total_size_bytes),
            keep_favorites: retention_file
                .keep_favorites
                .unwrap_or(retention_defaults.keep_favorites),
            interval_hours: retention_file
                .interval_hours
                .unwrap_or(retention_defaults.interval_hours),
            run_after_ingest: retention_file
                .run_after_ingest
                .unwrap_or(retention_defaults.run_after_ingest),
        };
        if retention.interval_hours == 0 {
            bail!("[retention] interval_hours must be greater than 0");
        }

        let integrity = IntegritySettings {
            interval_hours: file
                .integrity
                .and_then(|i| i.interval_hours)
                .unwrap_or(IntegritySettings::default().interval_hours),
        };
        if integrity.interval_hours == 0 {
            bail!("[integrity] interval_hours must be greater than 0");
        }

        Ok(Self {
            storage_root,
            index_path,
            retrieval_history_path,
            favorites_path,
            port,
            metrics_port,
            logging_level,
            extractor_url,
            extractor_timeout_sec,
            streaming,
            retention,
            integrity,
        })
    }

    pub fn url_policy(&self) -> UrlPolicy {
        UrlPolicy::new(
            &self.streaming.allowed_hosts,
            self.streaming.allow_insecure_upstream,
        )
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            user_agent: self.streaming.user_agent.clone(),
            connect_timeout: Duration::from_secs(self.streaming.upstream_connect_timeout_secs),
            response_timeout: Duration::from_secs(self.streaming.upstream_response_timeout_secs),
        }
    }

    /// Options the scheduled retention job runs with. Never a dry run.
    pub fn cleanup_options(&self) -> CleanupOptions {
        CleanupOptions {
            older_than_days: self.retention.older_than_days,
            max_total_size_bytes: self.retention.max_total_size_bytes,
            keep_favorites: self.retention.keep_favorites,
            dry_run: false,
        }
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention.interval_hours * 60 * 60)
    }

    pub fn integrity_interval(&self) -> Duration {
        Duration::from_secs(self.integrity.interval_hours * 60 * 60)
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
