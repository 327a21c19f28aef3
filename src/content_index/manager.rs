//! The content index manager: single owner of "what do we have locally".

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::events::{IndexEvent, IndexNotifier};
use super::favorites::FavoritesProvider;
use super::history::RetrievalHistory;
use super::models::*;
use super::retention::plan_eviction;
use super::storage_policy::StoragePolicy;
use super::store::{IndexStore, IndexStoreError};
use super::IndexError;
use crate::server::metrics;

pub const DEFAULT_REMOTE_STREAM_BASE: &str = "/v1/stream";

/// Everything the manager needs at construction.
pub struct IndexManagerOptions {
    pub store: Arc<dyn IndexStore>,
    pub policy: StoragePolicy,
    pub favorites: Arc<dyn FavoritesProvider>,
    pub history: Arc<dyn RetrievalHistory>,
    /// Base of the endpoint remote sources point at; the track id and
    /// `/remote` are appended.
    pub remote_stream_base: String,
}

/// Owns the in-memory index and its persisted copy.
///
/// Mutations are serialized by `writer` and follow copy, mutate, persist,
/// swap: readers only ever see a fully consistent snapshot, and a failed
/// save leaves memory untouched. Readers clone the current `Arc` and never
/// wait on disk I/O.
///
/// `is_available` flags go stale as soon as something outside this process
/// touches the storage root. They are refreshed by every
/// `resolve_playback_source` call for the entries it looks at and by every
/// `verify_integrity` sweep; between those, the delivery layer reports a
/// failed open back through `mark_unavailable`.
pub struct ContentIndexManager {
    state: RwLock<Arc<ContentIndex>>,
    writer: Mutex<()>,
    store: Arc<dyn IndexStore>,
    policy: StoragePolicy,
    favorites: Arc<dyn FavoritesProvider>,
    remote_stream_base: String,
    notifier: IndexNotifier,
}

enum Correction {
    Drop { reason: String },
    Update { available: bool, size: Option<u64> },
}

struct EntryCorrection {
    retrieval_id: String,
    file_path: PathBuf,
    correction: Correction,
}

impl ContentIndexManager {
    /// Loads the persisted index, rebuilding it from the retrieval history
    /// when it is missing, unreadable or from another schema version.
    pub fn open(options: IndexManagerOptions) -> Self {
        let IndexManagerOptions {
            store,
            policy,
            favorites,
            history,
            remote_stream_base,
        } = options;

        let loaded = match store.load() {
            Ok(Some(index)) => {
                info!(
                    "Loaded content index: {} entries, {} bytes",
                    index.tracks.len(),
                    index.total_size_bytes
                );
                Some(index)
            }
            Ok(None) => {
                info!("No persisted content index found, building from retrieval history");
                None
            }
            Err(IndexStoreError::IncompatibleSchema { found, expected }) => {
                warn!(
                    "Discarding content index with schema version {} (expected {}), rebuilding",
                    found, expected
                );
                None
            }
            Err(e) => {
                warn!("Persisted content index is unusable ({}), rebuilding", e);
                None
            }
        };

        let index = match loaded {
            Some(index) => index,
            None => {
                let rebuilt = rebuild_from_history(&policy, history.as_ref());
                if let Err(e) = store.save(&rebuilt) {
                    error!("Failed to persist rebuilt content index: {}", e);
                }
                rebuilt
            }
        };

        Self {
            state: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
            store,
            policy,
            favorites,
            remote_stream_base: remote_stream_base.trim_end_matches('/').to_string(),
            notifier: IndexNotifier::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.notifier.subscribe()
    }

    pub fn storage_root(&self) -> &Path {
        self.policy.root()
    }

    fn snapshot(&self) -> Arc<ContentIndex> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `mutate` to a copy of the index, persists it and swaps it in.
    /// Returning `None` from `mutate` means nothing changed: no save, no swap.
    fn commit<T, F>(&self, mutate: F) -> Result<Option<T>, IndexError>
    where
        F: FnOnce(&mut ContentIndex) -> Option<T>,
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.snapshot()).clone();
        let Some(out) = mutate(&mut next) else {
            return Ok(None);
        };
        next.last_updated = Utc::now();
        self.store.save(&next)?;
        metrics::set_index_totals(next.tracks.len(), next.total_size_bytes);
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(Some(out))
    }

    // ---------------------------------------------------------------------
    // Ingest & removal
    // ---------------------------------------------------------------------

    /// Records a finished retrieval. Anything but a completed retrieval with
    /// a safe, non-empty path and a positive size is ignored with a warning.
    pub fn ingest(
        &self,
        record: &RetrievalRecord,
        metadata: &TrackMetadata,
    ) -> Result<IngestOutcome, IndexError> {
        let track = match build_entry(&self.policy, record, metadata) {
            Ok(track) => track,
            Err(reason) => {
                warn!("Ignoring retrieval {}: {}", record.retrieval_id, reason);
                return Ok(IngestOutcome::Ignored { reason });
            }
        };

        let retrieval_id = track.retrieval_id.clone();
        let track_id = track.track_id.clone();
        let replaced = self
            .commit(|index| Some(index.upsert(track).is_some()))?
            .unwrap_or(false);

        if replaced {
            info!("Updated local copy {} of track {}", retrieval_id, track_id);
            self.notifier.publish(IndexEvent::TrackUpdated {
                retrieval_id,
                track_id,
            });
            Ok(IngestOutcome::Updated)
        } else {
            info!("Indexed local copy {} of track {}", retrieval_id, track_id);
            self.notifier.publish(IndexEvent::TrackAdded {
                retrieval_id,
                track_id,
            });
            Ok(IngestOutcome::Added)
        }
    }

    /// Drops an entry, then deletes its file. A failed deletion is reported
    /// in the outcome but does not bring the entry back.
    pub fn remove(&self, retrieval_id: &str) -> Result<RemoveOutcome, IndexError> {
        let Some(removed) = self.commit(|index| index.remove(retrieval_id))? else {
            debug!("Remove requested for unknown retrieval {}", retrieval_id);
            return Ok(RemoveOutcome::NotFound);
        };

        let file_error = self.delete_file(&removed);
        info!(
            "Removed local copy {} of track {} ({} bytes)",
            removed.retrieval_id, removed.track_id, removed.file_size_bytes
        );
        self.notifier.publish(IndexEvent::TrackRemoved {
            retrieval_id: removed.retrieval_id.clone(),
            track_id: removed.track_id.clone(),
        });

        Ok(RemoveOutcome::Removed {
            title: removed.title,
            bytes_freed: removed.file_size_bytes,
            file_error,
        })
    }

    fn delete_file(&self, track: &DownloadedTrack) -> Option<String> {
        let path = match self.policy.check(&track.file_path) {
            Ok(path) => path,
            Err(violation) => {
                warn!(
                    "Not deleting file of {} outside storage policy: {}",
                    track.retrieval_id, violation
                );
                return Some(format!("refusing to delete file: {}", violation));
            }
        };
        match std::fs::remove_file(&path) {
            Ok(()) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to delete file of {}: {}", track.retrieval_id, e);
                Some(format!("failed to delete file: {}", e))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Playback resolution
    // ---------------------------------------------------------------------

    /// Decides where the bytes of `track_id` should come from. Never fails:
    /// anything short of a verified local file resolves to the remote
    /// stream endpoint.
    pub fn resolve_playback_source(&self, track_id: &str) -> PlaybackSource {
        let snapshot = self.snapshot();
        let mut entries: Vec<&DownloadedTrack> = snapshot
            .tracks
            .iter()
            .filter(|t| t.track_id == track_id)
            .collect();
        entries.sort_by(|a, b| b.retained_at.cmp(&a.retained_at));

        for entry in entries {
            let present = self.policy.is_file_present(&entry.file_path);
            if present != entry.is_available {
                self.set_availability(&entry.retrieval_id, &entry.file_path, present);
            }
            if present {
                metrics::record_playback_resolution("local");
                return PlaybackSource {
                    kind: SourceKind::Local,
                    locator: entry.local_stream_reference.as_str().to_string(),
                    format: Some(entry.media_format),
                    quality: entry.quality.clone(),
                };
            }
            warn!(
                "Local copy {} of track {} is missing, falling back to remote",
                entry.retrieval_id, track_id
            );
        }

        metrics::record_playback_resolution("remote");
        self.remote_source(track_id)
    }

    pub fn remote_source(&self, track_id: &str) -> PlaybackSource {
        PlaybackSource {
            kind: SourceKind::Remote,
            locator: format!(
                "{}/{}/remote",
                self.remote_stream_base,
                urlencoding::encode(track_id)
            ),
            format: None,
            quality: None,
        }
    }

    /// Maps a local stream reference back to the file it stands for.
    pub fn local_file(&self, reference: &LocalStreamReference) -> Option<LocalFile> {
        let snapshot = self.snapshot();
        let entry = snapshot.get(reference.retrieval_id())?;
        let path = self.policy.check(&entry.file_path).ok()?;
        Some(LocalFile {
            retrieval_id: entry.retrieval_id.clone(),
            path,
            format: entry.media_format,
        })
    }

    /// Called when opening a file that was just resolved as local fails.
    pub fn mark_unavailable(&self, reference: &LocalStreamReference) {
        let snapshot = self.snapshot();
        if let Some(entry) = snapshot.get(reference.retrieval_id()) {
            if entry.is_available {
                self.set_availability(&entry.retrieval_id, &entry.file_path, false);
            }
        }
    }

    fn set_availability(&self, retrieval_id: &str, file_path: &Path, available: bool) {
        let result = self.commit(|index| {
            let pos = index.position(retrieval_id)?;
            let entry = &mut index.tracks[pos];
            if entry.file_path != file_path || entry.is_available == available {
                return None;
            }
            entry.is_available = available;
            Some(entry.track_id.clone())
        });

        match result {
            Ok(Some(track_id)) => {
                info!(
                    "Local copy {} of track {} is now {}",
                    retrieval_id,
                    track_id,
                    if available { "available" } else { "unavailable" }
                );
                self.notifier.publish(IndexEvent::AvailabilityChanged {
                    retrieval_id: retrieval_id.to_string(),
                    track_id,
                    is_available: available,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(
                "Failed to persist availability of {}: {}",
                retrieval_id, e
            ),
        }
    }

    // ---------------------------------------------------------------------
    // Integrity verification
    // ---------------------------------------------------------------------

    /// Re-checks every entry against the filesystem and corrects the index.
    ///
    /// Filesystem checks run against a snapshot without any lock held; the
    /// corrections are then applied in one short commit, each one only if
    /// its entry has not changed in the meantime. Safe to run repeatedly.
    pub fn verify_integrity(&self) -> IntegrityReport {
        let start = Instant::now();
        let snapshot = self.snapshot();
        let mut report = IntegrityReport::default();
        let mut corrections = Vec::new();
        let mut referenced: HashSet<PathBuf> = HashSet::new();

        for entry in &snapshot.tracks {
            report.checked += 1;

            let path = match self.policy.check(&entry.file_path) {
                Ok(path) => path,
                Err(violation) => {
                    report.corrupt += 1;
                    corrections.push(EntryCorrection {
                        retrieval_id: entry.retrieval_id.clone(),
                        file_path: entry.file_path.clone(),
                        correction: Correction::Drop {
                            reason: violation.to_string(),
                        },
                    });
                    continue;
                }
            };
            referenced.insert(path.clone());

            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() && meta.len() == 0 => {
                    report.corrupt += 1;
                    if entry.is_available {
                        corrections.push(EntryCorrection {
                            retrieval_id: entry.retrieval_id.clone(),
                            file_path: entry.file_path.clone(),
                            correction: Correction::Update {
                                available: false,
                                size: None,
                            },
                        });
                    }
                }
                Ok(meta) if meta.is_file() => {
                    report.valid += 1;
                    let size = (meta.len() != entry.file_size_bytes).then_some(meta.len());
                    if size.is_some() || !entry.is_available {
                        corrections.push(EntryCorrection {
                            retrieval_id: entry.retrieval_id.clone(),
                            file_path: entry.file_path.clone(),
                            correction: Correction::Update {
                                available: true,
                                size,
                            },
                        });
                    }
                }
                Ok(_) => {
                    report.missing += 1;
                    report.errors.push(EntryError::for_entry(
                        &entry.retrieval_id,
                        "path is not a regular file",
                    ));
                    if entry.is_available {
                        corrections.push(EntryCorrection {
                            retrieval_id: entry.retrieval_id.clone(),
                            file_path: entry.file_path.clone(),
                            correction: Correction::Update {
                                available: false,
                                size: None,
                            },
                        });
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.missing += 1;
                    if entry.is_available {
                        corrections.push(EntryCorrection {
                            retrieval_id: entry.retrieval_id.clone(),
                            file_path: entry.file_path.clone(),
                            correction: Correction::Update {
                                available: false,
                                size: None,
                            },
                        });
                    }
                }
                Err(e) => {
                    report
                        .errors
                        .push(EntryError::for_entry(&entry.retrieval_id, e.to_string()));
                }
            }
        }

        self.scan_orphans(&referenced, &mut report);

        let aggregate_drift = snapshot.total_size_bytes != snapshot.computed_total_size();
        if !corrections.is_empty() || aggregate_drift {
            let result = self.commit(|index| {
                let mut fixes = Vec::new();
                for c in corrections {
                    apply_correction(index, c, &mut fixes);
                }
                let computed = index.computed_total_size();
                if computed != index.total_size_bytes {
                    fixes.push(format!(
                        "total_size_bytes corrected from {} to {}",
                        index.total_size_bytes, computed
                    ));
                    index.total_size_bytes = computed;
                }
                if fixes.is_empty() {
                    None
                } else {
                    Some(fixes)
                }
            });
            match result {
                Ok(Some(fixes)) => report.fixes = fixes,
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to persist integrity corrections: {}", e);
                    report.errors.push(EntryError::general(format!(
                        "corrections not persisted: {}",
                        e
                    )));
                }
            }
        }

        report.total_size_bytes = self.snapshot().total_size_bytes;
        report.scan_duration_ms = start.elapsed().as_millis() as i64;

        info!(
            "Integrity sweep: {} checked, {} valid, {} corrupt, {} missing, {} orphaned, {} fixes",
            report.checked,
            report.valid,
            report.corrupt,
            report.missing,
            report.orphaned,
            report.fixes.len()
        );
        self.notifier.publish(IndexEvent::IntegrityVerified {
            valid: report.valid,
            corrupt: report.corrupt,
            missing: report.missing,
            orphaned: report.orphaned,
            fixes: report.fixes.len(),
        });
        report
    }

    fn scan_orphans(&self, referenced: &HashSet<PathBuf>, report: &mut IntegrityReport) {
        let root = self.policy.root();
        if !root.is_dir() {
            return;
        }
        for item in WalkDir::new(root).follow_links(false) {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    report.errors.push(EntryError::general(e.to_string()));
                    continue;
                }
            };
            if !item.file_type().is_file() {
                continue;
            }
            let is_media = item
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(MediaFormat::from_extension)
                .is_some();
            if is_media && !referenced.contains(item.path()) {
                report.orphaned += 1;
                let relative = item.path().strip_prefix(root).unwrap_or(item.path());
                report
                    .orphaned_files
                    .push(relative.to_string_lossy().to_string());
            }
        }
    }

    // ---------------------------------------------------------------------
    // Retention cleanup
    // ---------------------------------------------------------------------

    pub fn cleanup(&self, options: &CleanupOptions) -> CleanupResult {
        self.cleanup_at(options, Utc::now())
    }

    /// Runs the cleanup sweep as of `now`. A dry run reports exactly what a
    /// real run over the same state would evict, and changes nothing.
    pub fn cleanup_at(&self, options: &CleanupOptions, now: DateTime<Utc>) -> CleanupResult {
        let snapshot = self.snapshot();
        let plan = plan_eviction(&snapshot, options, self.favorites.as_ref(), now);
        drop(snapshot);

        let mut result = CleanupResult {
            dry_run: options.dry_run,
            selected: plan
                .evictions
                .iter()
                .map(|c| c.retrieval_id.clone())
                .collect(),
            candidates_considered: plan.candidates.len(),
            ..Default::default()
        };

        if options.dry_run {
            result.files_removed = plan.evictions.len();
            result.bytes_freed = plan.bytes_to_free();
            result.removed_titles = plan.evictions.iter().map(|c| c.title.clone()).collect();
            info!(
                "Cleanup dry run: would remove {} of {} candidates, freeing {} bytes",
                result.files_removed, result.candidates_considered, result.bytes_freed
            );
        } else {
            for candidate in &plan.evictions {
                let evicted = self.commit(|index| {
                    let pos = index.position(&candidate.retrieval_id)?;
                    if index.tracks[pos].retained_at != candidate.retained_at {
                        return None;
                    }
                    index.remove(&candidate.retrieval_id)
                });
                match evicted {
                    Ok(Some(removed)) => {
                        if let Some(file_error) = self.delete_file(&removed) {
                            result
                                .errors
                                .push(EntryError::for_entry(&removed.retrieval_id, file_error));
                        }
                        info!(
                            "Evicted local copy {} ({}, {} bytes)",
                            removed.retrieval_id, removed.title, removed.file_size_bytes
                        );
                        result.files_removed += 1;
                        result.bytes_freed += removed.file_size_bytes;
                        result.removed_titles.push(removed.title.clone());
                        self.notifier.publish(IndexEvent::TrackRemoved {
                            retrieval_id: removed.retrieval_id,
                            track_id: removed.track_id,
                        });
                    }
                    Ok(None) => result.errors.push(EntryError::for_entry(
                        &candidate.retrieval_id,
                        "entry changed or disappeared before eviction",
                    )),
                    Err(e) => result
                        .errors
                        .push(EntryError::for_entry(&candidate.retrieval_id, e.to_string())),
                }
            }
            info!(
                "Cleanup removed {} files, freed {} bytes, {} errors",
                result.files_removed,
                result.bytes_freed,
                result.errors.len()
            );
        }

        self.notifier.publish(IndexEvent::CleanupCompleted {
            dry_run: result.dry_run,
            files_removed: result.files_removed,
            bytes_freed: result.bytes_freed,
        });
        result
    }

    // ---------------------------------------------------------------------
    // Read-side projections
    // ---------------------------------------------------------------------

    pub fn list(&self) -> Vec<TrackView> {
        self.snapshot().tracks.iter().map(|t| t.view()).collect()
    }

    pub fn get(&self, retrieval_id: &str) -> Option<TrackView> {
        self.snapshot().get(retrieval_id).map(|t| t.view())
    }

    pub fn search(&self, query: &str) -> Vec<TrackView> {
        let needle = query.trim().to_lowercase();
        self.snapshot()
            .tracks
            .iter()
            .filter(|t| needle.is_empty() || t.matches_query(&needle))
            .map(|t| t.view())
            .collect()
    }

    pub fn filter_by_mood(&self, mood: &str) -> Vec<TrackView> {
        let mood = mood.trim();
        self.snapshot()
            .tracks
            .iter()
            .filter(|t| t.has_mood(mood))
            .map(|t| t.view())
            .collect()
    }

    pub fn filter_by_format(&self, format: MediaFormat) -> Vec<TrackView> {
        self.snapshot()
            .tracks
            .iter()
            .filter(|t| t.media_format == format)
            .map(|t| t.view())
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        let snapshot = self.snapshot();
        let available = snapshot.tracks.iter().filter(|t| t.is_available).count();
        IndexStats {
            entries: snapshot.tracks.len(),
            available,
            unavailable: snapshot.tracks.len() - available,
            total_size_bytes: snapshot.total_size_bytes,
            last_updated: snapshot.last_updated,
        }
    }

    // ---------------------------------------------------------------------
    // Export / import
    // ---------------------------------------------------------------------

    pub fn export_index(&self) -> Result<JsonValue, IndexError> {
        Ok(serde_json::to_value(&*self.snapshot())?)
    }

    /// Replaces the whole index with `blob`. The blob is fully validated
    /// before anything is touched; on error the current index is unchanged.
    pub fn import_index(&self, blob: JsonValue) -> Result<ImportSummary, IndexError> {
        let (index, summary) = parse_import(&self.policy, blob)?;
        let entries = index.tracks.len();
        self.commit(move |current| {
            *current = index;
            Some(())
        })?;

        info!(
            "Imported content index: {} entries, {} merged duplicates, {} skipped",
            summary.imported, summary.duplicates_merged, summary.skipped
        );
        self.notifier.publish(IndexEvent::IndexImported { entries });
        Ok(summary)
    }
}

fn apply_correction(index: &mut ContentIndex, c: EntryCorrection, fixes: &mut Vec<String>) {
    let Some(pos) = index.position(&c.retrieval_id) else {
        return;
    };
    if index.tracks[pos].file_path != c.file_path {
        return;
    }
    match c.correction {
        Correction::Drop { reason } => {
            index.remove(&c.retrieval_id);
            fixes.push(format!("dropped {}: {}", c.retrieval_id, reason));
        }
        Correction::Update { available, size } => {
            let entry = &mut index.tracks[pos];
            if let Some(size) = size {
                fixes.push(format!(
                    "{}: file_size_bytes corrected from {} to {}",
                    c.retrieval_id, entry.file_size_bytes, size
                ));
                entry.file_size_bytes = size;
            }
            if entry.is_available != available {
                fixes.push(format!(
                    "{}: marked {}",
                    c.retrieval_id,
                    if available { "available" } else { "unavailable" }
                ));
                entry.is_available = available;
            }
        }
    }
}

/// Builds an index entry from a retrieval, or explains why it cannot.
fn build_entry(
    policy: &StoragePolicy,
    record: &RetrievalRecord,
    metadata: &TrackMetadata,
) -> Result<DownloadedTrack, String> {
    if record.status != RetrievalStatus::Completed {
        return Err(format!("retrieval is not completed (status: {})", record.status));
    }
    if record.retrieval_id.trim().is_empty() {
        return Err("empty retrieval id".to_string());
    }
    if record.track_id.trim().is_empty() {
        return Err("empty track id".to_string());
    }
    let raw_path = record
        .file_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| "retrieval has no file path".to_string())?;
    if record.file_size_bytes == 0 {
        return Err("retrieval has no content (size 0)".to_string());
    }
    let file_path = policy.check(raw_path).map_err(|v| v.to_string())?;
    let media_format = record
        .format
        .or_else(|| {
            file_path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(MediaFormat::from_extension)
        })
        .ok_or_else(|| "unknown media format".to_string())?;

    let is_available = policy.is_file_present(&file_path);
    Ok(DownloadedTrack {
        track_id: record.track_id.clone(),
        retrieval_id: record.retrieval_id.clone(),
        title: metadata.title.clone(),
        artist: metadata.artist.clone(),
        file_path,
        file_size_bytes: record.file_size_bytes,
        media_format,
        quality: record.quality.clone(),
        retained_at: record.completed_at.unwrap_or_else(Utc::now),
        mood_tags: metadata
            .mood_tags
            .iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
        is_available,
        local_stream_reference: LocalStreamReference::for_retrieval(&record.retrieval_id),
    })
}

fn rebuild_from_history(policy: &StoragePolicy, history: &dyn RetrievalHistory) -> ContentIndex {
    let mut index = ContentIndex::empty();
    let entries = match history.entries() {
        Ok(entries) => entries,
        Err(e) => {
            error!("Failed to read retrieval history, starting empty: {:#}", e);
            return index;
        }
    };
    let total = entries.len();
    for entry in entries {
        match build_entry(policy, &entry.record, &entry.metadata) {
            Ok(track) => {
                index.upsert(track);
            }
            Err(reason) => debug!(
                "Skipping retrieval {} during rebuild: {}",
                entry.record.retrieval_id, reason
            ),
        }
    }
    info!(
        "Rebuilt content index from {} retrievals: {} entries, {} bytes",
        total,
        index.tracks.len(),
        index.total_size_bytes
    );
    index
}

fn parse_import(
    policy: &StoragePolicy,
    blob: JsonValue,
) -> Result<(ContentIndex, ImportSummary), IndexError> {
    let object = blob
        .as_object()
        .ok_or_else(|| IndexError::InvalidImport("expected a JSON object".to_string()))?;
    let tracks = object
        .get("tracks")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| IndexError::InvalidImport("missing 'tracks' collection".to_string()))?;
    object
        .get("total_size_bytes")
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| IndexError::InvalidImport("missing 'total_size_bytes' field".to_string()))?;
    if let Some(version) = object.get("schema_version") {
        let found = version.as_u64().ok_or_else(|| {
            IndexError::InvalidImport("'schema_version' is not a number".to_string())
        })?;
        if found != INDEX_SCHEMA_VERSION as u64 {
            return Err(IndexError::IncompatibleSchema {
                found,
                expected: INDEX_SCHEMA_VERSION,
            });
        }
    }

    let mut index = ContentIndex::empty();
    let mut duplicates_merged = 0;
    let mut skipped = 0;
    for (i, raw) in tracks.iter().enumerate() {
        let mut track: DownloadedTrack = serde_json::from_value(raw.clone())
            .map_err(|e| IndexError::InvalidImport(format!("track #{}: {}", i, e)))?;
        if track.file_size_bytes == 0 || track.retrieval_id.is_empty() {
            skipped += 1;
            continue;
        }
        match policy.check(&track.file_path) {
            Ok(path) => track.file_path = path,
            Err(violation) => {
                warn!("Skipping imported entry {}: {}", track.retrieval_id, violation);
                skipped += 1;
                continue;
            }
        }
        track.is_available = policy.is_file_present(&track.file_path);
        track.local_stream_reference = LocalStreamReference::for_retrieval(&track.retrieval_id);
        if index.upsert(track).is_some() {
            duplicates_merged += 1;
        }
    }

    let summary = ImportSummary {
        imported: index.tracks.len(),
        duplicates_merged,
        skipped,
        total_size_bytes: index.total_size_bytes,
    };
    Ok((index, summary))
}
