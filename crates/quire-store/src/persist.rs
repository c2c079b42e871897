//! Loading and saving the store as a JSON state file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;

use quire_core::StoreError;

use crate::store::LocalStore;

impl LocalStore {
    /// Load state from `path`. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no state file, starting empty");
                return Ok(Self::default());
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let mut store: Self =
            serde_json::from_str(&text).map_err(|source| StoreError::Serialization {
                path: path.to_path_buf(),
                source,
            })?;
        store.normalize_bookmarks();
        store.clear_stale_open_note();
        Ok(store)
    }

    /// Write state to `path` atomically: a temp file in the same directory is
    /// written, flushed and renamed over the target.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let json = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Serialization {
            path: path.to_path_buf(),
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(&json).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;

        tracing::trace!(path = %path.display(), "saved state");
        Ok(())
    }
}

/// Exclusive advisory lock guarding a state file's load-modify-save cycle.
///
/// The lock lives in a sibling `.lock` file and is released on drop.
/// Processes that save the state file must hold it; readers need not.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Block until the lock for `state_path` is held.
    pub fn acquire(state_path: &Path) -> Result<Self, StoreError> {
        let (file, path) = open_lock_file(state_path)?;
        file.lock_exclusive().map_err(|e| StoreError::io(&path, e))?;
        tracing::trace!(path = %path.display(), "state lock acquired");
        Ok(Self { file, path })
    }

    /// Take the lock if nobody else holds it.
    pub fn try_acquire(state_path: &Path) -> Result<Option<Self>, StoreError> {
        let (file, path) = open_lock_file(state_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), "failed to release state lock: {e}");
        }
    }
}

fn open_lock_file(state_path: &Path) -> Result<(File, PathBuf), StoreError> {
    let path = state_path.with_extension("lock");
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|e| StoreError::io(&path, e))?;
    Ok((file, path))
}
