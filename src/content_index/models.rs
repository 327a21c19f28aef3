//! Types owned by the content index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;

/// Version of the persisted index layout. Blobs carrying any other version
/// are discarded rather than migrated.
pub const INDEX_SCHEMA_VERSION: u32 = 1;

const LOCAL_REFERENCE_PREFIX: &str = "local:";

/// Container formats a retained copy can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Mp3,
    M4a,
    Webm,
    Opus,
    Ogg,
    Mp4,
}

impl MediaFormat {
    pub const ALL: [MediaFormat; 6] = [
        MediaFormat::Mp3,
        MediaFormat::M4a,
        MediaFormat::Webm,
        MediaFormat::Opus,
        MediaFormat::Ogg,
        MediaFormat::Mp4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Mp3 => "mp3",
            MediaFormat::M4a => "m4a",
            MediaFormat::Webm => "webm",
            MediaFormat::Opus => "opus",
            MediaFormat::Ogg => "ogg",
            MediaFormat::Mp4 => "mp4",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaFormat::Mp3 => "audio/mpeg",
            MediaFormat::M4a => "audio/mp4",
            MediaFormat::Webm => "audio/webm",
            MediaFormat::Opus => "audio/ogg",
            MediaFormat::Ogg => "audio/ogg",
            MediaFormat::Mp4 => "video/mp4",
        }
    }

    pub fn from_extension(ext: &str) -> Option<MediaFormat> {
        MediaFormat::from_str(ext).ok()
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        MediaFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == lowered)
            .ok_or_else(|| format!("Unknown media format: {}", s))
    }
}

/// Opaque handle the delivery layer uses to open a retained file.
///
/// Only the index manager can map it back to a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalStreamReference(String);

impl LocalStreamReference {
    pub fn for_retrieval(retrieval_id: &str) -> Self {
        Self(format!("{}{}", LOCAL_REFERENCE_PREFIX, retrieval_id))
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.strip_prefix(LOCAL_REFERENCE_PREFIX)
            .filter(|id| !id.is_empty())
            .map(|_| Self(s.to_string()))
    }

    pub fn retrieval_id(&self) -> &str {
        self.0
            .strip_prefix(LOCAL_REFERENCE_PREFIX)
            .unwrap_or(self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A locally retained copy of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedTrack {
    pub track_id: String,
    pub retrieval_id: String,
    pub title: String,
    pub artist: String,
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    pub media_format: MediaFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    pub retained_at: DateTime<Utc>,
    #[serde(default)]
    pub mood_tags: BTreeSet<String>,
    /// Cached result of the last existence check. Authoritative only right
    /// after `resolve_playback_source` or `verify_integrity` looked at disk.
    pub is_available: bool,
    pub local_stream_reference: LocalStreamReference,
}

impl DownloadedTrack {
    pub fn view(&self) -> TrackView {
        TrackView {
            track_id: self.track_id.clone(),
            retrieval_id: self.retrieval_id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            file_size_bytes: self.file_size_bytes,
            media_format: self.media_format,
            quality: self.quality.clone(),
            retained_at: self.retained_at,
            mood_tags: self.mood_tags.iter().cloned().collect(),
            is_available: self.is_available,
            local_stream_reference: self.local_stream_reference.clone(),
        }
    }

    /// Case-insensitive substring match over title, artist and mood tags.
    /// `needle` must already be lowercase.
    pub(crate) fn matches_query(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.artist.to_lowercase().contains(needle)
            || self
                .mood_tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(needle))
    }

    pub(crate) fn has_mood(&self, mood: &str) -> bool {
        self.mood_tags.iter().any(|tag| tag.eq_ignore_ascii_case(mood))
    }
}

/// Public projection of a [`DownloadedTrack`], without the file path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackView {
    pub track_id: String,
    pub retrieval_id: String,
    pub title: String,
    pub artist: String,
    pub file_size_bytes: u64,
    pub media_format: MediaFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    pub retained_at: DateTime<Utc>,
    pub mood_tags: Vec<String>,
    pub is_available: bool,
    pub local_stream_reference: LocalStreamReference,
}

/// The persisted index blob. Export and import use the same layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentIndex {
    pub schema_version: u32,
    pub tracks: Vec<DownloadedTrack>,
    pub total_size_bytes: u64,
    pub last_updated: DateTime<Utc>,
}

impl ContentIndex {
    pub fn empty() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            tracks: Vec::new(),
            total_size_bytes: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn position(&self, retrieval_id: &str) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.retrieval_id == retrieval_id)
    }

    pub fn get(&self, retrieval_id: &str) -> Option<&DownloadedTrack> {
        self.tracks.iter().find(|t| t.retrieval_id == retrieval_id)
    }

    pub fn computed_total_size(&self) -> u64 {
        self.tracks.iter().map(|t| t.file_size_bytes).sum()
    }

    /// Inserts or replaces in place by retrieval id, adjusting the cached
    /// aggregate. Returns the replaced entry, if any.
    pub fn upsert(&mut self, track: DownloadedTrack) -> Option<DownloadedTrack> {
        self.total_size_bytes = self.total_size_bytes.saturating_add(track.file_size_bytes);
        match self.position(&track.retrieval_id) {
            Some(pos) => {
                let previous = std::mem::replace(&mut self.tracks[pos], track);
                self.total_size_bytes = self
                    .total_size_bytes
                    .saturating_sub(previous.file_size_bytes);
                Some(previous)
            }
            None => {
                self.tracks.push(track);
                None
            }
        }
    }

    pub fn remove(&mut self, retrieval_id: &str) -> Option<DownloadedTrack> {
        let pos = self.position(retrieval_id)?;
        let removed = self.tracks.remove(pos);
        self.total_size_bytes = self
            .total_size_bytes
            .saturating_sub(removed.file_size_bytes);
        Some(removed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Remote,
}

/// Where the bytes for a track should come from. Computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSource {
    pub kind: SourceKind,
    /// A local stream reference for `Local`, a stream endpoint for `Remote`.
    pub locator: String,
    /// Unknown for remote sources until the extractor has been asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<MediaFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl PlaybackSource {
    pub fn local_reference(&self) -> Option<LocalStreamReference> {
        match self.kind {
            SourceKind::Local => LocalStreamReference::parse(&self.locator),
            SourceKind::Remote => None,
        }
    }
}

/// What the delivery layer needs to serve a retained copy.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub retrieval_id: String,
    pub path: PathBuf,
    pub format: MediaFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RetrievalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetrievalStatus::Completed | RetrievalStatus::Failed | RetrievalStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RetrievalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RetrievalStatus::Pending => "pending",
            RetrievalStatus::InProgress => "in_progress",
            RetrievalStatus::Completed => "completed",
            RetrievalStatus::Failed => "failed",
            RetrievalStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Terminal record handed over by the retrieval subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRecord {
    pub retrieval_id: String,
    pub track_id: String,
    pub status: RetrievalStatus,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub file_size_bytes: u64,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub format: Option<MediaFormat>,
    #[serde(default)]
    pub quality: Option<String>,
}

/// Catalog metadata for the track a retrieval produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub mood_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Added,
    Updated,
    Ignored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed {
        title: String,
        bytes_freed: u64,
        /// Set when the index entry went away but the file could not be deleted.
        file_error: Option<String>,
    },
    NotFound,
}

impl RemoveOutcome {
    pub fn was_removed(&self) -> bool {
        matches!(self, RemoveOutcome::Removed { .. })
    }
}

/// A problem with a single entry, collected instead of aborting a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_id: Option<String>,
    pub message: String,
}

impl EntryError {
    pub fn for_entry(retrieval_id: &str, message: impl Into<String>) -> Self {
        Self {
            retrieval_id: Some(retrieval_id.to_string()),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            retrieval_id: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub checked: usize,
    pub valid: usize,
    /// Path-safety violations and zero-length files.
    pub corrupt: usize,
    pub missing: usize,
    /// Media files under the storage root that no entry references.
    pub orphaned: usize,
    pub orphaned_files: Vec<String>,
    pub fixes: Vec<String>,
    pub errors: Vec<EntryError>,
    pub total_size_bytes: u64,
    pub scan_duration_ms: i64,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt == 0 && self.missing == 0 && self.fixes.is_empty() && self.errors.is_empty()
    }
}

fn default_older_than_days() -> u32 {
    30
}

fn default_max_total_size_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_keep_favorites() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOptions {
    #[serde(default = "default_older_than_days")]
    pub older_than_days: u32,
    #[serde(default = "default_max_total_size_bytes")]
    pub max_total_size_bytes: u64,
    #[serde(default = "default_keep_favorites")]
    pub keep_favorites: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            older_than_days: default_older_than_days(),
            max_total_size_bytes: default_max_total_size_bytes(),
            keep_favorites: default_keep_favorites(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub dry_run: bool,
    /// Retrieval ids selected for eviction, in eviction order.
    pub selected: Vec<String>,
    pub candidates_considered: usize,
    pub files_removed: usize,
    pub bytes_freed: u64,
    pub removed_titles: Vec<String>,
    pub errors: Vec<EntryError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub duplicates_merged: usize,
    pub skipped: usize,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub available: usize,
    pub unavailable: usize,
    pub total_size_bytes: u64,
    pub last_updated: DateTime<Utc>,
}
