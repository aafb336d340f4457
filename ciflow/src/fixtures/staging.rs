//! Run-scoped storage for fetched fixtures.

use crate::errors::FetchError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Directory owning the fixtures of exactly one pipeline run.
///
/// The area is removed when dropped unless [`StagingArea::keep`] was called.
/// It is not `Clone`: a run holds the only handle.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    temp: Option<TempDir>,
    keep: bool,
}

impl StagingArea {
    /// Creates a fresh directory under the system temp dir.
    pub fn ephemeral() -> Result<Self, FetchError> {
        let temp = tempfile::Builder::new()
            .prefix("ciflow-staging-")
            .tempdir()
            .map_err(|e| FetchError::Staging(format!("failed to create temp dir: {e}")))?;
        Ok(Self {
            root: temp.path().to_path_buf(),
            temp: Some(temp),
            keep: false,
        })
    }

    /// Uses `path` as the staging root, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or already has contents.
    pub fn at(path: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let root = path.into();
        fs::create_dir_all(&root).map_err(|e| {
            FetchError::Staging(format!("failed to create {}: {e}", root.display()))
        })?;

        let has_entries = fs::read_dir(&root)
            .map_err(|e| FetchError::Staging(format!("failed to read {}: {e}", root.display())))?
            .next()
            .is_some();
        if has_entries {
            return Err(FetchError::Staging(format!(
                "staging directory {} is not empty",
                root.display()
            )));
        }

        Ok(Self {
            root,
            temp: None,
            keep: false,
        })
    }

    /// Returns the staging root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a manifest destination inside the staging root.
    #[must_use]
    pub fn path_for(&self, local: &str) -> PathBuf {
        if local.is_empty() || local == "." {
            self.root.clone()
        } else {
            self.root.join(local)
        }
    }

    /// Returns true if the root has no entries.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(fs::read_dir(&self.root)?.next().is_none())
    }

    /// Keeps the directory on disk after the run.
    pub fn keep(&mut self) {
        self.keep = true;
    }

    /// Marks every staged file read-only. Returns the number of files sealed.
    pub fn seal(&self) -> io::Result<usize> {
        let mut sealed = 0;
        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let mut permissions = entry.metadata()?.permissions();
            permissions.set_readonly(true);
            fs::set_permissions(entry.path(), permissions)?;
            sealed += 1;
        }
        debug!(root = %self.root.display(), files = sealed, "Staging area sealed");
        Ok(sealed)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.keep {
            if let Some(temp) = self.temp.take() {
                #[allow(deprecated)]
                let path = temp.into_path();
                info!(root = %path.display(), "Keeping staging area");
            }
            return;
        }
        if self.temp.is_none() {
            if let Err(e) = fs::remove_dir_all(&self.root) {
                warn!(root = %self.root.display(), error = %e, "Failed to remove staging area");
            }
        }
        // A TempDir removes itself.
    }
}
