//! Read-only view of the retrieval subsystem's history, used to rebuild
//! the index when the persisted blob is unusable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::models::{RetrievalRecord, TrackMetadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHistoryEntry {
    pub record: RetrievalRecord,
    pub metadata: TrackMetadata,
}

pub trait RetrievalHistory: Send + Sync {
    /// Every retrieval the subsystem remembers, terminal or not, oldest first.
    fn entries(&self) -> Result<Vec<RetrievalHistoryEntry>>;
}

/// History kept by the retrieval subsystem as a JSON array on disk.
pub struct JsonFileRetrievalHistory {
    path: PathBuf,
}

impl JsonFileRetrievalHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RetrievalHistory for JsonFileRetrievalHistory {
    fn entries(&self) -> Result<Vec<RetrievalHistoryEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read retrieval history: {:?}", self.path))
            }
        };
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse retrieval history: {:?}", self.path))
    }
}

#[derive(Default)]
pub struct EmptyRetrievalHistory;

impl RetrievalHistory for EmptyRetrievalHistory {
    fn entries(&self) -> Result<Vec<RetrievalHistoryEntry>> {
        Ok(Vec::new())
    }
}

/// In-memory history, handy when the caller already holds the records.
#[derive(Default)]
pub struct StaticRetrievalHistory {
    entries: Vec<RetrievalHistoryEntry>,
}

impl StaticRetrievalHistory {
    pub fn new(entries: Vec<RetrievalHistoryEntry>) -> Self {
        Self { entries }
    }
}

impl RetrievalHistory for StaticRetrievalHistory {
    fn entries(&self) -> Result<Vec<RetrievalHistoryEntry>> {
        Ok(self.entries.clone())
    }
}
