//! Path-safety policy for files managed by the content index.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathViolation {
    #[error("Empty file path")]
    Empty,

    #[error("File path contains a NUL byte")]
    NulByte,

    #[error("File path contains a parent directory component: {0}")]
    ParentTraversal(String),

    #[error("File path is outside the storage root: {0}")]
    OutsideRoot(String),
}

/// Confines indexed files to a single storage root.
///
/// Symlinks are resolved before the containment check, so a link inside the
/// root pointing elsewhere is rejected too.
#[derive(Debug, Clone)]
pub struct StoragePolicy {
    root: PathBuf,
}

impl StoragePolicy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates `path` and returns its resolved form. Relative paths are
    /// taken relative to the storage root.
    pub fn check(&self, path: &Path) -> Result<PathBuf, PathViolation> {
        if path.as_os_str().is_empty() {
            return Err(PathViolation::Empty);
        }
        let display = path.to_string_lossy();
        if display.contains('\0') {
            return Err(PathViolation::NulByte);
        }
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(PathViolation::ParentTraversal(display.to_string()));
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = resolve(&absolute);

        if !resolved.starts_with(&self.root) {
            return Err(PathViolation::OutsideRoot(display.to_string()));
        }
        Ok(resolved)
    }

    /// True when `path` passes the policy and names a non-empty regular
    /// file. An empty file counts as absent, the same as for integrity
    /// verification and local serving.
    pub fn is_file_present(&self, path: &Path) -> bool {
        let Ok(resolved) = self.check(path) else {
            return false;
        };
        std::fs::metadata(resolved)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }
}

// Canonicalizes what exists; for a missing file, canonicalizes the parent.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
