//! Access to the user's favorites, which retention cleanup can protect.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub trait FavoritesProvider: Send + Sync {
    fn is_favorite(&self, track_id: &str) -> bool;
}

#[derive(Default)]
pub struct NoFavorites;

impl FavoritesProvider for NoFavorites {
    fn is_favorite(&self, _track_id: &str) -> bool {
        false
    }
}

/// A fixed set of favorite track ids.
#[derive(Default)]
pub struct FavoritesSet {
    track_ids: HashSet<String>,
}

impl FavoritesSet {
    pub fn new<I, S>(track_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            track_ids: track_ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl FavoritesProvider for FavoritesSet {
    fn is_favorite(&self, track_id: &str) -> bool {
        self.track_ids.contains(track_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Default)]
struct CachedFavorites {
    stamp: Option<FileStamp>,
    track_ids: HashSet<String>,
}

/// Favorites exported as a JSON array of track ids by the preference store,
/// which rewrites the file as the user favorites tracks.
///
/// Every lookup checks the file's modification time and size and re-reads it
/// when either changed. If the file becomes unreadable the last good set
/// stays in effect.
pub struct FavoritesFile {
    path: PathBuf,
    cache: RwLock<CachedFavorites>,
}

impl FavoritesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let favorites = Self {
            path: path.into(),
            cache: RwLock::new(CachedFavorites::default()),
        };
        favorites.refresh();
        favorites
    }

    pub fn len(&self) -> usize {
        self.refresh();
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .track_ids
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn refresh(&self) {
        let stamp = match std::fs::metadata(&self.path) {
            Ok(meta) => FileStamp {
                modified: meta.modified().ok(),
                len: meta.len(),
            },
            Err(e) => {
                debug!("Favorites file {:?} unavailable: {}", self.path, e);
                return;
            }
        };
        if self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .stamp
            == Some(stamp)
        {
            return;
        }

        match read_track_ids(&self.path) {
            Ok(track_ids) => {
                info!(
                    "Loaded {} favorites from {:?}",
                    track_ids.len(),
                    self.path
                );
                *self.cache.write().unwrap_or_else(PoisonError::into_inner) = CachedFavorites {
                    stamp: Some(stamp),
                    track_ids,
                };
            }
            Err(e) => {
                warn!("Keeping previous favorites: {:#}", e);
                self.cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .stamp = Some(stamp);
            }
        }
    }
}

impl FavoritesProvider for FavoritesFile {
    fn is_favorite(&self, track_id: &str) -> bool {
        self.refresh();
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .track_ids
            .contains(track_id)
    }
}

fn read_track_ids(path: &Path) -> Result<HashSet<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read favorites file: {:?}", path))?;
    let ids: Vec<String> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse favorites file: {:?}", path))?;
    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn favorites_set_membership() {
        let favorites = FavoritesSet::new(["t1"]);
        assert!(favorites.is_favorite("t1"));
        assert!(!favorites.is_favorite("t2"));
        assert!(!NoFavorites.is_favorite("t1"));
    }

    #[test]
    fn favorites_file_follows_rewrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("favorites.json");
        std::fs::write(&path, r#"["a"]"#).unwrap();

        let favorites = FavoritesFile::new(&path);
        assert!(favorites.is_favorite("a"));
        assert!(!favorites.is_favorite("b"));

        std::fs::write(&path, r#"["a", "b"]"#).unwrap();
        assert!(favorites.is_favorite("b"));
        assert_eq!(favorites.len(), 2);
    }

    #[test]
    fn favorites_file_keeps_last_good_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("favorites.json");
        std::fs::write(&path, r#"["a"]"#).unwrap();
        let favorites = FavoritesFile::new(&path);

        std::fs::write(&path, "[not json").unwrap();
        assert!(favorites.is_favorite("a"));

        std::fs::remove_file(&path).unwrap();
        assert!(favorites.is_favorite("a"));
    }

    #[test]
    fn favorites_file_appearing_after_startup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("favorites.json");

        let favorites = FavoritesFile::new(&path);
        assert!(favorites.is_empty());

        std::fs::write(&path, r#"["late"]"#).unwrap();
        assert!(favorites.is_favorite("late"));
    }
}
