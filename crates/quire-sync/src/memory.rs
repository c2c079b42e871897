//! In-process remote store for tests and offline runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RemoteError;
use crate::remote::{DeleteOutcome, MoveOutcome, RemoteEntry, RemoteStore};

#[derive(Debug, Clone)]
struct MemoryFile {
    content: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, MemoryFile>,
    folders: BTreeSet<String>,
    accepted_token: Option<String>,
    offline: bool,
    last_modified: Option<DateTime<Utc>>,
    calls: Vec<String>,
}

impl MemoryState {
    fn check(&mut self, token: &str, call: String) -> Result<(), RemoteError> {
        self.calls.push(call);
        if self.offline {
            return Err(RemoteError::Unavailable {
                message: "memory store is offline".to_string(),
            });
        }
        if self
            .accepted_token
            .as_deref()
            .is_some_and(|accepted| accepted != token)
        {
            return Err(RemoteError::Unauthorized);
        }
        Ok(())
    }

    /// Strictly increasing server clock.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_modified {
            Some(last) if last >= now => last + chrono::Duration::milliseconds(1),
            _ => now,
        };
        self.last_modified = Some(next);
        next
    }

    fn add_parents(&mut self, path: &str) {
        let mut parent = path;
        while let Some((head, _)) = parent.rsplit_once('/') {
            self.folders.insert(head.to_string());
            parent = head;
        }
    }

    fn is_folder(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.folders.contains(path)
            || self.files.keys().any(|k| k.starts_with(&prefix))
    }

    fn remove_tree(&mut self, path: &str) -> bool {
        let prefix = format!("{path}/");
        let before = self.files.len() + self.folders.len();
        self.files.retain(|k, _| k != path && !k.starts_with(&prefix));
        self.folders.retain(|k| k != path && !k.starts_with(&prefix));
        before != self.files.len() + self.folders.len()
    }
}

/// A remote store held entirely in memory.
///
/// Behaves like the Dropbox client: moves replace the destination, missing
/// sources and deletion targets are reported rather than failing, and every
/// write gets a strictly later modification time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a file as if another device had uploaded it.
    pub fn put_file(&self, path: &str, content: &str, modified: DateTime<Utc>) {
        let mut state = self.lock();
        state.add_parents(path);
        state.files.insert(
            path.to_string(),
            MemoryFile {
                content: content.to_string(),
                modified,
            },
        );
    }

    /// Seed an empty folder.
    pub fn put_folder(&self, path: &str) {
        let mut state = self.lock();
        state.add_parents(path);
        state.folders.insert(path.to_string());
    }

    /// Contents of a file, if present.
    pub fn file(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).map(|f| f.content.clone())
    }

    /// Modification time of a file, if present.
    pub fn modified(&self, path: &str) -> Option<DateTime<Utc>> {
        self.lock().files.get(path).map(|f| f.modified)
    }

    /// Every file path, sorted.
    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.lock().is_folder(path)
    }

    /// Reject every token except `token` with `Unauthorized`.
    pub fn accept_only(&self, token: impl Into<String>) {
        self.lock().accepted_token = Some(token.into());
    }

    /// Fail every call with a transient error while set.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Calls received so far, as `"<op> <path>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_all(&self, token: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut state = self.lock();
        state.check(token, "list".to_string())?;

        let mut folders = state.folders.clone();
        for path in state.files.keys() {
            let mut parent = path.as_str();
            while let Some((head, _)) = parent.rsplit_once('/') {
                folders.insert(head.to_string());
                parent = head;
            }
        }

        let mut entries: Vec<RemoteEntry> = folders.into_iter().map(RemoteEntry::folder).collect();
        entries.extend(
            state
                .files
                .iter()
                .map(|(path, file)| RemoteEntry::file(path.clone(), file.modified)),
        );
        Ok(entries)
    }

    async fn read(&self, token: &str, path: &str) -> Result<String, RemoteError> {
        let mut state = self.lock();
        state.check(token, format!("read {path}"))?;
        state
            .files
            .get(path)
            .map(|f| f.content.clone())
            .ok_or_else(|| RemoteError::NotFound {
                path: path.to_string(),
            })
    }

    async fn write(
        &self,
        token: &str,
        path: &str,
        content: &str,
    ) -> Result<DateTime<Utc>, RemoteError> {
        let mut state = self.lock();
        state.check(token, format!("write {path}"))?;

        let modified = state.tick();
        state.add_parents(path);
        state.files.insert(
            path.to_string(),
            MemoryFile {
                content: content.to_string(),
                modified,
            },
        );
        Ok(modified)
    }

    async fn move_path(
        &self,
        token: &str,
        from: &str,
        to: &str,
    ) -> Result<MoveOutcome, RemoteError> {
        let mut state = self.lock();
        state.check(token, format!("move {from} -> {to}"))?;

        let source_is_file = state.files.contains_key(from);
        if !source_is_file && !state.is_folder(from) {
            return Ok(MoveOutcome::SourceMissing);
        }

        let replaced = state.remove_tree(to);
        state.add_parents(to);

        if source_is_file {
            if let Some(file) = state.files.remove(from) {
                state.files.insert(to.to_string(), file);
            }
        } else {
            let prefix = format!("{from}/");
            let moved_files: Vec<String> = state
                .files
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            for old in moved_files {
                if let Some(file) = state.files.remove(&old) {
                    state.files.insert(format!("{to}/{}", &old[prefix.len()..]), file);
                }
            }
            let moved_folders: Vec<String> = state
                .folders
                .iter()
                .filter(|k| k.as_str() == from || k.starts_with(&prefix))
                .cloned()
                .collect();
            for old in moved_folders {
                state.folders.remove(&old);
                let new = if old == from {
                    to.to_string()
                } else {
                    format!("{to}/{}", &old[prefix.len()..])
                };
                state.folders.insert(new);
            }
            state.folders.insert(to.to_string());
        }

        Ok(if replaced {
            MoveOutcome::Replaced
        } else {
            MoveOutcome::Moved
        })
    }

    async fn delete(&self, token: &str, path: &str) -> Result<DeleteOutcome, RemoteError> {
        let mut state = self.lock();
        state.check(token, format!("delete {path}"))?;

        Ok(if state.remove_tree(path) {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::Missing
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parents_and_ticks() {
        let store = MemoryStore::new();
        let first = store.write("t", "Work/2024/Foo.md", "a").await.unwrap();
        let second = store.write("t", "Work/2024/Foo.md", "b").await.unwrap();

        assert!(second > first);
        assert!(store.has_folder("Work"));
        assert!(store.has_folder("Work/2024"));
        assert_eq!(store.file("Work/2024/Foo.md").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_move_folder_moves_contents() {
        let store = MemoryStore::new();
        store.write("t", "Work/a.md", "a").await.unwrap();
        store.write("t", "Work/sub/b.md", "b").await.unwrap();

        let outcome = store.move_path("t", "Work", "Projects").await.unwrap();

        assert_eq!(outcome, MoveOutcome::Moved);
        assert_eq!(store.file_paths(), vec!["Projects/a.md", "Projects/sub/b.md"]);
        assert!(!store.has_folder("Work"));
    }

    #[tokio::test]
    async fn test_move_missing_source_and_replace() {
        let store = MemoryStore::new();
        assert_eq!(
            store.move_path("t", "nope.md", "x.md").await.unwrap(),
            MoveOutcome::SourceMissing
        );

        store.write("t", "a.md", "a").await.unwrap();
        store.write("t", "b.md", "b").await.unwrap();
        assert_eq!(
            store.move_path("t", "a.md", "b.md").await.unwrap(),
            MoveOutcome::Replaced
        );
        assert_eq!(store.file("b.md").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.write("t", "Work/a.md", "a").await.unwrap();

        assert_eq!(store.delete("t", "Work").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete("t", "Work").await.unwrap(), DeleteOutcome::Missing);
        assert!(store.file_paths().is_empty());
    }

    #[tokio::test]
    async fn test_token_and_offline_checks() {
        let store = MemoryStore::new();
        store.accept_only("good");
        assert!(matches!(
            store.list_all("bad").await,
            Err(RemoteError::Unauthorized)
        ));
        assert!(store.list_all("good").await.is_ok());

        store.set_offline(true);
        assert!(matches!(
            store.list_all("good").await,
            Err(RemoteError::Unavailable { .. })
        ));
    }
}
