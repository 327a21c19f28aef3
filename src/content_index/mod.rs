//! Index of locally retained tracks.
//!
//! Decides, per track, whether playback can be served from a local copy or
//! must go to the remote stream, and keeps the persisted index honest with
//! respect to what is actually on disk.

mod events;
mod favorites;
mod history;
mod manager;
mod models;
mod retention;
mod storage_policy;
mod store;

use thiserror::Error;

pub use events::{IndexEvent, IndexNotifier};
pub use favorites::{FavoritesFile, FavoritesProvider, FavoritesSet, NoFavorites};
pub use history::{
    EmptyRetrievalHistory, JsonFileRetrievalHistory, RetrievalHistory, RetrievalHistoryEntry,
    StaticRetrievalHistory,
};
pub use manager::{ContentIndexManager, IndexManagerOptions, DEFAULT_REMOTE_STREAM_BASE};
pub use models::*;
pub use retention::{plan_eviction, EvictionCandidate, EvictionPlan};
pub use storage_policy::{PathViolation, StoragePolicy};
pub use store::{decode_index, IndexStore, IndexStoreError, InMemoryIndexStore, JsonFileIndexStore};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Failed to persist content index: {0}")]
    Persistence(#[from] IndexStoreError),

    #[error("Invalid index import: {0}")]
    InvalidImport(String),

    #[error("Incompatible index schema version {found} (expected {expected})")]
    IncompatibleSchema { found: u64, expected: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
