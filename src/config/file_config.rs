use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub storage_root: Option<String>,
    pub index_path: Option<String>,
    pub retrieval_history_path: Option<String>,
    pub favorites_path: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub extractor_url: Option<String>,
    pub extractor_timeout_sec: Option<u64>,

    // Feature configs
    pub streaming: Option<StreamingConfig>,
    pub retention: Option<RetentionConfig>,
    pub integrity: Option<IntegrityConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StreamingConfig {
    /// Upstream hosts the proxy may fetch from; subdomains are included.
    pub allowed_hosts: Option<Vec<String>>,
    /// Accept plain http upstreams. Only meant for local testing.
    pub allow_insecure_upstream: Option<bool>,
    pub upstream_connect_timeout_secs: Option<u64>,
    pub upstream_response_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub remote_stream_base: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: Option<bool>,
    pub older_than_days: Option<u32>,
    pub max_total_size_bytes: Option<u64>,
    pub keep_favorites: Option<bool>,
    pub interval_hours: Option<u64>,
    pub run_after_ingest: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IntegrityConfig {
    pub interval_hours: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
