//! Persistence for the content index blob.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;
use thiserror::Error;

use super::models::{ContentIndex, INDEX_SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum IndexStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt index: {0}")]
    Corrupt(String),

    #[error("Incompatible index schema version {found} (expected {expected})")]
    IncompatibleSchema { found: u64, expected: u32 },

    #[error("Failed to encode index: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable storage for the whole index, written as a single blob.
pub trait IndexStore: Send + Sync {
    /// Returns `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<ContentIndex>, IndexStoreError>;

    fn save(&self, index: &ContentIndex) -> Result<(), IndexStoreError>;
}

/// Decodes a persisted blob, checking the schema version before the layout.
pub fn decode_index(raw: &str) -> Result<ContentIndex, IndexStoreError> {
    let value: JsonValue =
        serde_json::from_str(raw).map_err(|e| IndexStoreError::Corrupt(e.to_string()))?;
    let version = value
        .get("schema_version")
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| IndexStoreError::Corrupt("missing schema_version".to_string()))?;
    if version != INDEX_SCHEMA_VERSION as u64 {
        return Err(IndexStoreError::IncompatibleSchema {
            found: version,
            expected: INDEX_SCHEMA_VERSION,
        });
    }
    serde_json::from_value(value).map_err(|e| IndexStoreError::Corrupt(e.to_string()))
}

/// Stores the index as pretty-printed JSON, replacing the file atomically.
pub struct JsonFileIndexStore {
    path: PathBuf,
}

impl JsonFileIndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IndexStore for JsonFileIndexStore {
    fn load(&self) -> Result<Option<ContentIndex>, IndexStoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_index(&raw).map(Some)
    }

    fn save(&self, index: &ContentIndex) -> Result<(), IndexStoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let encoded = serde_json::to_vec_pretty(index)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Keeps the encoded blob in memory. Saves can be made to fail on demand.
#[derive(Default)]
pub struct InMemoryIndexStore {
    raw: Mutex<Option<String>>,
    fail_saves: AtomicBool,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an arbitrary, possibly corrupt, persisted blob.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self) -> Option<String> {
        self.raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl IndexStore for InMemoryIndexStore {
    fn load(&self) -> Result<Option<ContentIndex>, IndexStoreError> {
        match self.raw() {
            Some(raw) => decode_index(&raw).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, index: &ContentIndex) -> Result<(), IndexStoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(IndexStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "saves disabled",
            )));
        }
        let encoded = serde_json::to_string(index)?;
        *self.raw.lock().unwrap_or_else(PoisonError::into_inner) = Some(encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileIndexStore::new(dir.path().join("nested/index.json"));
        assert!(store.load().unwrap().is_none());

        let index = ContentIndex::empty();
        store.save(&index).unwrap();

        assert_eq!(store.load().unwrap(), Some(index));
    }

    #[test]
    fn rejects_unparseable_blob() {
        let store = InMemoryIndexStore::with_raw("{not json");
        assert!(matches!(store.load(), Err(IndexStoreError::Corrupt(_))));
    }

    #[test]
    fn rejects_other_schema_versions() {
        let store = InMemoryIndexStore::with_raw(
            r#"{"schema_version": 7, "tracks": [], "total_size_bytes": 0}"#,
        );
        assert!(matches!(
            store.load(),
            Err(IndexStoreError::IncompatibleSchema { found: 7, .. })
        ));
    }

    #[test]
    fn failing_saves_keep_previous_blob() {
        let store = InMemoryIndexStore::new();
        store.save(&ContentIndex::empty()).unwrap();
        let before = store.raw();

        store.set_fail_saves(true);
        let mut changed = ContentIndex::empty();
        changed.total_size_bytes = 42;
        assert!(store.save(&changed).is_err());
        assert_eq!(store.raw(), before);
    }
}
