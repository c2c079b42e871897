//! One sync round: push local changes, then pull the remote tree.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quire_core::{
    Folder, FolderId, Note, NoteId, PathResolver, sanitize_segment, split_note_path,
};
use quire_store::{RenameOperation, SyncSnapshot};

use crate::auth::TokenSource;
use crate::error::{RemoteError, SyncError};
use crate::log::{SyncAction, SyncLog};
use crate::remote::{DeleteOutcome, MoveOutcome, RemoteEntry, RemoteStore};

/// Merged tables and the log of a successful round, ready for
/// [`quire_store::LocalStore::commit_sync`].
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub notes: Vec<Note>,
    pub folders: Vec<Folder>,
    pub log: SyncLog,
}

impl SyncOutcome {
    pub fn summary(&self) -> String {
        self.log.summary()
    }
}

/// Runs sync rounds against one remote store.
///
/// The engine never touches the local store: it works on a snapshot and
/// returns the merged result, so a failed round leaves local state and
/// queues exactly as they were.
#[derive(Clone)]
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// The remote store this engine talks to.
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Run one round: renames, deletions, uploads, then the pull.
    pub async fn sync(
        &self,
        tokens: &dyn TokenSource,
        snapshot: &SyncSnapshot,
    ) -> Result<SyncOutcome, SyncError> {
        let token = tokens.access_token().await?;
        let mut round = Round {
            remote: self.remote.as_ref(),
            tokens,
            token,
            log: SyncLog::new(),
        };

        let mut notes = snapshot.notes.clone();
        let mut folders = snapshot.folders.clone();

        tracing::info!(
            renames = snapshot.renames.len(),
            deletes = snapshot.deleted_paths.len(),
            uploads = snapshot.unsynced.len(),
            "sync round started"
        );

        round.apply_renames(&snapshot.renames).await?;
        round.apply_deletes(&snapshot.deleted_paths).await?;
        round.push(&mut notes, &folders, &snapshot.unsynced).await?;
        round.pull(&mut notes, &mut folders, &snapshot.unsynced).await?;

        tracing::info!("sync round finished: {}", round.log.summary());
        Ok(SyncOutcome {
            notes,
            folders,
            log: round.log,
        })
    }
}

struct Round<'a> {
    remote: &'a dyn RemoteStore,
    tokens: &'a dyn TokenSource,
    token: String,
    log: SyncLog,
}

impl Round<'_> {
    /// Run a remote call, refreshing the token and retrying once on 401.
    async fn call<T, F, Fut>(&mut self, op: F) -> Result<T, SyncError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        match op(self.token.clone()).await {
            Err(RemoteError::Unauthorized) => {
                tracing::warn!("access token rejected, refreshing and retrying once");
                self.tokens.invalidate().await;
                self.token = self.tokens.access_token().await?;
                op(self.token.clone()).await.map_err(SyncError::from)
            }
            other => other.map_err(SyncError::from),
        }
    }

    async fn apply_renames(&mut self, renames: &[RenameOperation]) -> Result<(), SyncError> {
        let remote = self.remote;
        for op in renames {
            let (from, to) = (op.from.as_str(), op.to.as_str());
            let outcome = self
                .call(move |t| async move { remote.move_path(&t, from, to).await })
                .await?;

            let detail = format!("from {from}");
            match outcome {
                MoveOutcome::Moved => self.log.record(SyncAction::Rename, to, Some(detail)),
                MoveOutcome::Replaced => self.log.record(
                    SyncAction::Rename,
                    to,
                    Some(format!("{detail}, replaced existing")),
                ),
                MoveOutcome::SourceMissing => self.log.record(
                    SyncAction::RenameSkipped,
                    to,
                    Some(format!("{detail}, source missing")),
                ),
            }
        }
        Ok(())
    }

    async fn apply_deletes(&mut self, paths: &[String]) -> Result<(), SyncError> {
        let remote = self.remote;
        for path in paths {
            let path = path.as_str();
            let outcome = self
                .call(move |t| async move { remote.delete(&t, path).await })
                .await?;

            match outcome {
                DeleteOutcome::Deleted => self.log.record(SyncAction::Delete, path, None),
                DeleteOutcome::Missing => self.log.record(
                    SyncAction::DeleteSkipped,
                    path,
                    Some("already gone".to_string()),
                ),
            }
        }
        Ok(())
    }

    /// Upload every live pending note to its resolved path.
    async fn push(
        &mut self,
        notes: &mut [Note],
        folders: &[Folder],
        pending: &BTreeSet<NoteId>,
    ) -> Result<(), SyncError> {
        let remote = self.remote;
        let resolver = PathResolver::new(folders);

        let mut sharing: HashMap<String, usize> = HashMap::new();
        for note in notes.iter().filter(|n| !n.is_deleted()) {
            let path = resolver.note_path(&note.title, note.folder_id.as_ref());
            *sharing.entry(path.to_lowercase()).or_default() += 1;
        }

        for note in notes.iter_mut() {
            if note.is_deleted() || !pending.contains(&note.id) {
                continue;
            }
            let path = resolver.note_path(&note.title, note.folder_id.as_ref());
            let others = sharing.get(&path.to_lowercase()).copied().unwrap_or(1) - 1;
            if others > 0 {
                self.log.record(
                    SyncAction::Collision,
                    &path,
                    Some(format!("{others} other note(s) resolve here, last write wins")),
                );
            }

            let (target, content) = (path.as_str(), note.content.as_str());
            let modified = self
                .call(move |t| async move { remote.write(&t, target, content).await })
                .await?;
            note.synced_at = Some(modified);
            self.log.record(SyncAction::Upload, &path, None);
        }
        Ok(())
    }

    /// Reconcile local tables with the remote tree.
    async fn pull(
        &mut self,
        notes: &mut Vec<Note>,
        folders: &mut Vec<Folder>,
        pending: &BTreeSet<NoteId>,
    ) -> Result<(), SyncError> {
        let remote = self.remote;
        let mut listing = self
            .call(move |t| async move { remote.list_all(&t).await })
            .await?;
        listing.sort_by_key(RemoteEntry::depth);
        let now = Utc::now();

        let mut index = index_folders(folders);
        for entry in listing.iter().filter(|e| e.is_folder()) {
            let segments: Vec<String> = entry.path.split('/').map(str::to_string).collect();
            if !is_canonical(&segments) {
                tracing::debug!(path = %entry.path, "skipping remote folder with unsupported name");
                continue;
            }
            if index.under_trash(&segments) {
                tracing::trace!(path = %entry.path, "remote folder is trashed locally");
                continue;
            }
            ensure_folder(&segments, folders, &mut index, &mut self.log, now);
        }

        let mut note_at = index_notes(notes, folders);
        let mut remote_files: HashSet<String> = HashSet::new();
        for entry in listing.iter().filter(|e| !e.is_folder()) {
            let Some((dirs, stem)) = split_note_path(&entry.path) else {
                tracing::trace!(path = %entry.path, "ignoring non-note file");
                continue;
            };
            if !is_canonical(&dirs) || sanitize_segment(&stem) != stem {
                tracing::debug!(path = %entry.path, "skipping remote note with unsupported name");
                continue;
            }

            let key = entry.path.to_lowercase();
            remote_files.insert(key.clone());
            let modified = entry.modified.unwrap_or(now);

            match note_at.get(&key).copied() {
                None => {
                    let content = self.read(&entry.path).await?;
                    let folder_id = ensure_folder(&dirs, folders, &mut index, &mut self.log, now);
                    let mut note = Note::new(stem, folder_id, modified).with_content(content);
                    note.synced_at = Some(modified);

                    self.log.record(
                        SyncAction::Download,
                        &entry.path,
                        Some("new remote note".to_string()),
                    );
                    note_at.insert(key, notes.len());
                    notes.push(note);
                }
                Some(index) => {
                    let note = &notes[index];
                    // Trashed notes are counterparts but never overwritten.
                    if note.is_deleted() || pending.contains(&note.id) {
                        continue;
                    }
                    if modified <= note.last_known_change() {
                        continue;
                    }

                    let content = self.read(&entry.path).await?;
                    let note = &mut notes[index];
                    note.content = content;
                    note.updated_at = modified;
                    note.synced_at = Some(modified);
                    self.log.record(
                        SyncAction::Update,
                        &entry.path,
                        Some("remote newer".to_string()),
                    );
                }
            }
        }

        let resolver = PathResolver::new(folders);
        let mut removed = Vec::new();
        notes.retain(|note| {
            if note.is_deleted() || pending.contains(&note.id) {
                return true;
            }
            let path = resolver.note_path(&note.title, note.folder_id.as_ref());
            if remote_files.contains(&path.to_lowercase()) {
                true
            } else {
                removed.push(path);
                false
            }
        });
        for path in removed {
            self.log.record(
                SyncAction::RemoveLocal,
                path,
                Some("missing remotely".to_string()),
            );
        }
        Ok(())
    }

    async fn read(&mut self, path: &str) -> Result<String, SyncError> {
        let remote = self.remote;
        self.call(move |t| async move { remote.read(&t, path).await })
            .await
    }
}

/// Whether names survive sanitization unchanged, so a local entity created
/// from them resolves back to the same remote path.
fn is_canonical(segments: &[String]) -> bool {
    segments.iter().all(|s| sanitize_segment(s) == *s)
}

/// Lower-cased folder paths of the local table.
///
/// Only live folders receive pulled notes; trashed paths are remembered so
/// the pull neither resurrects them nor files new notes into the trash.
struct FolderIndex {
    live: HashMap<String, FolderId>,
    trashed: HashSet<String>,
}

impl FolderIndex {
    /// Whether `segments`, or one of its ancestors, exists locally only in the trash.
    fn under_trash(&self, segments: &[String]) -> bool {
        let mut path = String::new();
        for segment in segments {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&segment.to_lowercase());
            if !self.live.contains_key(&path) && self.trashed.contains(&path) {
                return true;
            }
        }
        false
    }
}

fn index_folders(folders: &[Folder]) -> FolderIndex {
    let resolver = PathResolver::new(folders);
    let mut index = FolderIndex {
        live: HashMap::new(),
        trashed: HashSet::new(),
    };
    for folder in folders {
        let key = resolver.folder_path(Some(&folder.id)).to_lowercase();
        if folder.is_deleted() {
            index.trashed.insert(key);
        } else {
            index.live.entry(key).or_insert_with(|| folder.id.clone());
        }
    }
    index
}

/// Lower-cased note path to index in `notes`; live notes win ties.
fn index_notes(notes: &[Note], folders: &[Folder]) -> HashMap<String, usize> {
    let resolver = PathResolver::new(folders);
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, note) in notes.iter().enumerate() {
        let key = resolver
            .note_path(&note.title, note.folder_id.as_ref())
            .to_lowercase();
        match index.get(&key) {
            Some(&existing) if !notes[existing].is_deleted() => {}
            Some(_) if note.is_deleted() => {}
            _ => {
                index.insert(key, i);
            }
        }
    }
    index
}

/// Find or create the live folder chain for `segments`, returning the
/// innermost id. A path that only exists in the trash gets a fresh folder.
fn ensure_folder(
    segments: &[String],
    folders: &mut Vec<Folder>,
    index: &mut FolderIndex,
    log: &mut SyncLog,
    now: DateTime<Utc>,
) -> Option<FolderId> {
    let mut parent: Option<FolderId> = None;
    let mut path = String::new();
    for segment in segments {
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(segment);

        let key = path.to_lowercase();
        let id = match index.live.get(&key) {
            Some(id) => id.clone(),
            None => {
                let folder = Folder::new(segment.clone(), parent.clone(), now);
                let id = folder.id.clone();
                folders.push(folder);
                let detail = index
                    .trashed
                    .contains(&key)
                    .then(|| "trashed copy left in trash".to_string());
                index.live.insert(key, id.clone());
                log.record(SyncAction::FolderCreated, &path, detail);
                id
            }
        };
        parent = Some(id);
    }
    parent
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use quire_store::LocalStore;
    use std::sync::Mutex;

    use crate::error::AuthError;
    use crate::memory::MemoryStore;

    /// Hands out `stale` until invalidated, then `fresh`.
    struct RotatingToken {
        current: Mutex<String>,
        fresh: String,
    }

    impl RotatingToken {
        fn new(stale: &str, fresh: &str) -> Self {
            Self {
                current: Mutex::new(stale.to_string()),
                fresh: fresh.to_string(),
            }
        }
    }

    #[async_trait]
    impl TokenSource for RotatingToken {
        async fn access_token(&self) -> Result<String, AuthError> {
            Ok(self.current.lock().unwrap().clone())
        }

        async fn invalidate(&self) {
            *self.current.lock().unwrap() = self.fresh.clone();
        }
    }

    struct Disconnected;

    #[async_trait]
    impl TokenSource for Disconnected {
        async fn access_token(&self) -> Result<String, AuthError> {
            Err(AuthError::NotConnected)
        }

        async fn invalidate(&self) {}
    }

    fn engine(remote: &Arc<MemoryStore>) -> SyncEngine {
        SyncEngine::new(remote.clone())
    }

    fn token() -> RotatingToken {
        RotatingToken::new("t", "t")
    }

    /// A snapshot whose notes went up in an earlier round.
    fn already_uploaded(mut snapshot: SyncSnapshot) -> SyncSnapshot {
        snapshot.unsynced.clear();
        snapshot
    }

    #[tokio::test]
    async fn test_upload_records_server_time() {
        let remote = Arc::new(MemoryStore::new());
        let mut store = LocalStore::new();
        let work = store.create_folder("Work", None).unwrap();
        let id = store.create_note("Foo", Some(work)).unwrap();
        store.update_note_content(&id, "hello").unwrap();

        let outcome = engine(&remote).sync(&token(), &store.snapshot()).await.unwrap();

        assert_eq!(remote.file("Work/Foo.md").as_deref(), Some("hello"));
        let synced = outcome.notes.iter().find(|n| n.id == id).unwrap();
        assert_eq!(synced.synced_at, remote.modified("Work/Foo.md"));
        assert_eq!(outcome.log.count(SyncAction::Upload), 1);
    }

    #[tokio::test]
    async fn test_renames_replay_before_uploads() {
        let remote = Arc::new(MemoryStore::new());
        remote.put_file("Old.md", "body", Utc::now());

        let mut store = LocalStore::new();
        let id = store.create_note("Old", None).unwrap();
        store.update_note_content(&id, "body").unwrap();
        store.rename_note(&id, "New").unwrap();
        let snapshot = already_uploaded(store.snapshot());

        let outcome = engine(&remote).sync(&token(), &snapshot).await.unwrap();

        assert_eq!(remote.file_paths(), vec!["New.md"]);
        assert_eq!(outcome.log.entries()[0].action, SyncAction::Rename);
        assert!(outcome.notes.iter().any(|n| n.id == id));
    }

    #[tokio::test]
    async fn test_missing_rename_source_is_skipped() {
        let remote = Arc::new(MemoryStore::new());
        let mut store = LocalStore::new();
        let id = store.create_note("A", None).unwrap();
        store.rename_note(&id, "B").unwrap();

        let outcome = engine(&remote).sync(&token(), &store.snapshot()).await.unwrap();

        assert_eq!(outcome.log.count(SyncAction::RenameSkipped), 1);
        // The pending upload still lands at the new path.
        assert_eq!(remote.file_paths(), vec!["B.md"]);
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let remote = Arc::new(MemoryStore::new());
        remote.put_file("Gone.md", "x", Utc::now());
        let mut store = LocalStore::new();
        let id = store.create_note("Gone", None).unwrap();
        store.permanently_delete_note(&id).unwrap();
        let snapshot = store.snapshot();

        let first = engine(&remote).sync(&token(), &snapshot).await.unwrap();
        let second = engine(&remote).sync(&token(), &snapshot).await.unwrap();

        assert_eq!(first.log.count(SyncAction::Delete), 1);
        assert_eq!(second.log.count(SyncAction::DeleteSkipped), 1);
        assert!(remote.file_paths().is_empty());
    }

    #[tokio::test]
    async fn test_pull_creates_folders_and_notes() {
        let remote = Arc::new(MemoryStore::new());
        remote.put_file("Work/2024/Plan.md", "remote plan", Utc::now());
        remote.put_folder("Empty");
        remote.put_file("image.png", "binary", Utc::now());

        let store = LocalStore::new();
        let outcome = engine(&remote).sync(&token(), &store.snapshot()).await.unwrap();

        let names: Vec<_> = outcome.folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"Work") && names.contains(&"2024") && names.contains(&"Empty"));

        assert_eq!(outcome.notes.len(), 1);
        let note = &outcome.notes[0];
        assert_eq!(note.title, "Plan");
        assert_eq!(note.content, "remote plan");
        let path = PathResolver::new(&outcome.folders).note_path(&note.title, note.folder_id.as_ref());
        assert_eq!(path, "Work/2024/Plan.md");
    }

    #[tokio::test]
    async fn test_new_note_under_trashed_folder_gets_live_folder() {
        let remote = Arc::new(MemoryStore::new());
        remote.put_file("Work/New.md", "from elsewhere", Utc::now());

        let mut store = LocalStore::new();
        let trashed = store.create_folder("Work", None).unwrap();
        store.soft_delete_folder(&trashed).unwrap();
        let snapshot = store.snapshot();

        let outcome = engine(&remote).sync(&token(), &snapshot).await.unwrap();

        let note = outcome.notes.iter().find(|n| n.title == "New").unwrap();
        assert!(!note.is_deleted());
        let folder_id = note.folder_id.clone().unwrap();
        assert_ne!(folder_id, trashed);
        let folder = outcome.folders.iter().find(|f| f.id == folder_id).unwrap();
        assert_eq!(folder.name, "Work");
        assert!(!folder.is_deleted());
        assert_eq!(outcome.log.count(SyncAction::FolderCreated), 1);
        assert!(outcome.folders.iter().any(|f| f.id == trashed && f.is_deleted()));
    }

    #[tokio::test]
    async fn test_trashed_folder_is_not_resurrected() {
        let remote = Arc::new(MemoryStore::new());
        remote.put_folder("Work/2024");

        let mut store = LocalStore::new();
        let work = store.create_folder("Work", None).unwrap();
        store.create_folder("2024", Some(work.clone())).unwrap();
        store.soft_delete_folder(&work).unwrap();

        let outcome = engine(&remote).sync(&token(), &store.snapshot()).await.unwrap();

        assert_eq!(outcome.folders.len(), 2);
        assert!(outcome.folders.iter().all(|f| f.is_deleted()));
        assert_eq!(outcome.log.count(SyncAction::FolderCreated), 0);
    }

    #[tokio::test]
    async fn test_remote_newer_overwrites_unpending_note() {
        let remote = Arc::new(MemoryStore::new());
        let mut store = LocalStore::new();
        let id = store.create_note("Foo", None).unwrap();
        store.update_note_content(&id, "local").unwrap();
        let snapshot = already_uploaded(store.snapshot());

        remote.put_file("Foo.md", "remote", Utc::now() + chrono::Duration::seconds(10));

        let outcome = engine(&remote).sync(&token(), &snapshot).await.unwrap();

        let note = outcome.notes.iter().find(|n| n.id == id).unwrap();
        assert_eq!(note.content, "remote");
        assert_eq!(outcome.log.count(SyncAction::Update), 1);
    }

    #[tokio::test]
    async fn test_older_remote_does_not_overwrite() {
        let remote = Arc::new(MemoryStore::new());
        let mut store = LocalStore::new();
        let id = store.create_note("Foo", None).unwrap();
        store.update_note_content(&id, "local").unwrap();
        let snapshot = already_uploaded(store.snapshot());

        remote.put_file("Foo.md", "stale", Utc::now() - chrono::Duration::hours(1));

        let outcome = engine(&remote).sync(&token(), &snapshot).await.unwrap();

        let note = outcome.notes.iter().find(|n| n.id == id).unwrap();
        assert_eq!(note.content, "local");
        assert_eq!(outcome.log.count(SyncAction::Update), 0);
    }

    #[tokio::test]
    async fn test_pending_note_wins_over_remote() {
        let remote = Arc::new(MemoryStore::new());
        remote.put_file("Foo.md", "remote", Utc::now() + chrono::Duration::hours(1));

        let mut store = LocalStore::new();
        let id = store.create_note("Foo", None).unwrap();
        store.update_note_content(&id, "local").unwrap();

        let outcome = engine(&remote).sync(&token(), &store.snapshot()).await.unwrap();

        assert_eq!(remote.file("Foo.md").as_deref(), Some("local"));
        let note = outcome.notes.iter().find(|n| n.id == id).unwrap();
        assert_eq!(note.content, "local");
    }

    #[tokio::test]
    async fn test_notes_missing_remotely_are_removed_but_not_trashed_ones() {
        let remote = Arc::new(MemoryStore::new());
        let mut store = LocalStore::new();
        let live = store.create_note("Live", None).unwrap();
        let trashed = store.create_note("Trashed", None).unwrap();
        store.soft_delete_note(&trashed).unwrap();
        let snapshot = already_uploaded(store.snapshot());

        let outcome = engine(&remote).sync(&token(), &snapshot).await.unwrap();

        assert!(outcome.notes.iter().all(|n| n.id != live));
        assert!(outcome.notes.iter().any(|n| n.id == trashed));
        assert_eq!(outcome.log.count(SyncAction::RemoveLocal), 1);
    }

    #[tokio::test]
    async fn test_trashed_counterpart_is_not_redownloaded() {
        let remote = Arc::new(MemoryStore::new());
        remote.put_file("Foo.md", "remote", Utc::now() + chrono::Duration::hours(1));

        let mut store = LocalStore::new();
        let id = store.create_note("Foo", None).unwrap();
        store.soft_delete_note(&id).unwrap();
        let snapshot = already_uploaded(store.snapshot());

        let outcome = engine(&remote).sync(&token(), &snapshot).await.unwrap();

        assert_eq!(outcome.notes.len(), 1);
        assert!(outcome.notes[0].is_deleted());
        assert_eq!(outcome.log.count(SyncAction::Download), 0);
    }

    #[tokio::test]
    async fn test_path_collision_is_logged() {
        let remote = Arc::new(MemoryStore::new());
        let mut store = LocalStore::new();
        store.create_note("what?", None).unwrap();
        store.create_note("what*", None).unwrap();

        let outcome = engine(&remote).sync(&token(), &store.snapshot()).await.unwrap();

        assert_eq!(outcome.log.count(SyncAction::Collision), 2);
        assert_eq!(remote.file_paths(), vec!["what_.md"]);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once() {
        let remote = Arc::new(MemoryStore::new());
        remote.accept_only("fresh");
        let mut store = LocalStore::new();
        store.create_note("Foo", None).unwrap();

        let tokens = RotatingToken::new("stale", "fresh");
        let outcome = engine(&remote).sync(&tokens, &store.snapshot()).await.unwrap();

        assert_eq!(outcome.log.count(SyncAction::Upload), 1);
        assert_eq!(remote.file_paths(), vec!["Foo.md"]);
    }

    #[tokio::test]
    async fn test_persistent_unauthorized_is_auth_error() {
        let remote = Arc::new(MemoryStore::new());
        remote.accept_only("other");
        let store = LocalStore::new();

        let err = engine(&remote)
            .sync(&RotatingToken::new("a", "b"), &store.snapshot())
            .await
            .unwrap_err();
        assert!(err.needs_reconnect());
    }

    #[tokio::test]
    async fn test_disconnected_fails_before_any_call() {
        let remote = Arc::new(MemoryStore::new());
        let store = LocalStore::new();

        let err = engine(&remote)
            .sync(&Disconnected, &store.snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::NotConnected)));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_is_retryable() {
        let remote = Arc::new(MemoryStore::new());
        remote.set_offline(true);
        let store = LocalStore::new();

        let err = engine(&remote).sync(&token(), &store.snapshot()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
