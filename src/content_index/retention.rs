//! Eviction planning for the retention cleanup sweep.
//!
//! Planning is a pure function of the index, the options, the favorites and
//! the current time, so a dry run and a real run over the same state select
//! exactly the same entries.

use chrono::{DateTime, Duration, Utc};

use super::favorites::FavoritesProvider;
use super::models::{CleanupOptions, ContentIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub retrieval_id: String,
    pub track_id: String,
    pub title: String,
    pub file_size_bytes: u64,
    pub retained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Every entry eligible for eviction, oldest first.
    pub candidates: Vec<EvictionCandidate>,
    /// The prefix of `candidates` that brings the total under the ceiling.
    pub evictions: Vec<EvictionCandidate>,
    pub total_before: u64,
    pub projected_total_after: u64,
}

impl EvictionPlan {
    pub fn bytes_to_free(&self) -> u64 {
        self.evictions.iter().map(|c| c.file_size_bytes).sum()
    }
}

pub fn plan_eviction(
    index: &ContentIndex,
    options: &CleanupOptions,
    favorites: &dyn FavoritesProvider,
    now: DateTime<Utc>,
) -> EvictionPlan {
    let cutoff = now - Duration::days(i64::from(options.older_than_days));

    let mut candidates: Vec<EvictionCandidate> = index
        .tracks
        .iter()
        .filter(|t| t.retained_at < cutoff)
        .filter(|t| !(options.keep_favorites && favorites.is_favorite(&t.track_id)))
        .map(|t| EvictionCandidate {
            retrieval_id: t.retrieval_id.clone(),
            track_id: t.track_id.clone(),
            title: t.title.clone(),
            file_size_bytes: t.file_size_bytes,
            retained_at: t.retained_at,
        })
        .collect();

    // Identical timestamps fall back to retrieval id order.
    candidates.sort_by(|a, b| {
        a.retained_at
            .cmp(&b.retained_at)
            .then_with(|| a.retrieval_id.cmp(&b.retrieval_id))
    });

    let total_before = index.computed_total_size();
    let mut remaining = total_before;
    let mut evictions = Vec::new();
    for candidate in &candidates {
        if remaining <= options.max_total_size_bytes {
            break;
        }
        remaining = remaining.saturating_sub(candidate.file_size_bytes);
        evictions.push(candidate.clone());
    }

    EvictionPlan {
        candidates,
        evictions,
        total_before,
        projected_total_after: remaining,
    }
}
