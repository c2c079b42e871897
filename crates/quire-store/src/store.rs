//! The local note and folder tables.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quire_core::{Folder, FolderId, Note, NoteId, PathResolver, StoreError};

use crate::deletion::DeletedPaths;
use crate::renames::RenameQueue;

/// Notes changed locally since the last successful push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnsyncedIds(BTreeSet<NoteId>);

impl UnsyncedIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NoteId) -> bool {
        self.0.insert(id)
    }

    pub fn remove(&mut self, id: &NoteId) -> bool {
        self.0.remove(id)
    }

    pub fn contains(&self, id: &NoteId) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NoteId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn to_set(&self) -> BTreeSet<NoteId> {
        self.0.clone()
    }
}

impl FromIterator<NoteId> for UnsyncedIds {
    fn from_iter<I: IntoIterator<Item = NoteId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Notes, folders and the ledgers of work pending against the remote store.
///
/// Every mutation that changes a resolved remote path (title, containing
/// folder, folder name, folder parent) enqueues a move; every permanent
/// removal enqueues a remote deletion; every content change marks the note
/// unsynced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStore {
    #[serde(default)]
    pub(crate) notes: Vec<Note>,
    #[serde(default)]
    pub(crate) folders: Vec<Folder>,
    #[serde(default)]
    pub(crate) renames: RenameQueue,
    #[serde(default)]
    pub(crate) deleted_paths: DeletedPaths,
    #[serde(default)]
    pub(crate) unsynced: UnsyncedIds,
    /// Note currently shown by the editor, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) open_note: Option<NoteId>,
}

impl LocalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub fn renames(&self) -> &RenameQueue {
        &self.renames
    }

    pub fn deleted_paths(&self) -> &DeletedPaths {
        &self.deleted_paths
    }

    pub fn unsynced(&self) -> &UnsyncedIds {
        &self.unsynced
    }

    pub fn note(&self, id: &NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| &n.id == id)
    }

    pub fn folder(&self, id: &FolderId) -> Option<&Folder> {
        self.folders.iter().find(|f| &f.id == id)
    }

    /// Notes not in the trash.
    pub fn live_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| !n.is_deleted())
    }

    /// Notes and folders in the trash.
    pub fn trashed(&self) -> (Vec<&Note>, Vec<&Folder>) {
        (
            self.notes.iter().filter(|n| n.is_deleted()).collect(),
            self.folders.iter().filter(|f| f.is_deleted()).collect(),
        )
    }

    /// Bookmarked notes in rank order.
    pub fn bookmarks(&self) -> Vec<&Note> {
        let mut marked: Vec<&Note> = self.notes.iter().filter(|n| n.is_bookmarked).collect();
        marked.sort_by_key(|n| n.bookmark_order.unwrap_or(u32::MAX));
        marked
    }

    /// The note the editor has open.
    pub fn open_note(&self) -> Option<&Note> {
        self.open_note.as_ref().and_then(|id| self.note(id))
    }

    /// A resolver over the current folder table.
    pub fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.folders)
    }

    /// Current remote path of a note.
    pub fn note_path(&self, id: &NoteId) -> Result<String, StoreError> {
        let note = self.note(id).ok_or_else(|| StoreError::note_not_found(id))?;
        Ok(self.resolver().note_path(&note.title, note.folder_id.as_ref()))
    }

    /// Current remote path of a folder.
    pub fn folder_path(&self, id: &FolderId) -> Result<String, StoreError> {
        self.folder(id).ok_or_else(|| StoreError::folder_not_found(id))?;
        Ok(self.resolver().folder_path(Some(id)))
    }

    /// Find a live folder by its resolved path.
    pub fn find_folder_by_path(&self, path: &str) -> Option<&FolderId> {
        let wanted = path.trim_matches('/');
        let resolver = self.resolver();
        self.folders
            .iter()
            .filter(|f| !f.is_deleted())
            .find(|f| resolver.folder_path(Some(&f.id)) == wanted)
            .map(|f| &f.id)
    }

    // ---- notes ----

    /// Create an empty note and open it.
    pub fn create_note(
        &mut self,
        title: impl Into<String>,
        folder_id: Option<FolderId>,
    ) -> Result<NoteId, StoreError> {
        self.ensure_live_folder(folder_id.as_ref())?;

        let note = Note::new(title, folder_id, Utc::now());
        let id = note.id.clone();
        tracing::debug!(note = %id, title = %note.title, "created note");

        self.notes.push(note);
        self.unsynced.insert(id.clone());
        self.open_note = Some(id.clone());
        Ok(id)
    }

    /// Replace a note's body.
    pub fn update_note_content(
        &mut self,
        id: &NoteId,
        content: impl Into<String>,
    ) -> Result<(), StoreError> {
        let content = content.into();
        let index = self.live_note_index(id)?;
        let note = &mut self.notes[index];
        if note.content == content {
            return Ok(());
        }

        note.content = content;
        note.updated_at = Utc::now();
        self.unsynced.insert(id.clone());
        Ok(())
    }

    /// Change a note's title, queueing a remote move when its path changes.
    pub fn rename_note(&mut self, id: &NoteId, title: impl Into<String>) -> Result<(), StoreError> {
        let title = title.into();
        self.relocate_note(id, |note| note.title = title)
    }

    /// Move a note to another folder (`None` for the root).
    pub fn move_note(&mut self, id: &NoteId, folder_id: Option<FolderId>) -> Result<(), StoreError> {
        self.ensure_live_folder(folder_id.as_ref())?;
        self.relocate_note(id, |note| note.folder_id = folder_id)
    }

    /// Put a note in the trash.
    pub fn soft_delete_note(&mut self, id: &NoteId) -> Result<(), StoreError> {
        self.soft_delete_note_at(id, Utc::now())
    }

    /// Put a note in the trash with an explicit deletion time.
    pub fn soft_delete_note_at(
        &mut self,
        id: &NoteId,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let index = self.note_index(id)?;
        self.notes[index].deleted_at = Some(when);
        if self.open_note.as_ref() == Some(id) {
            self.open_note = None;
        }
        Ok(())
    }

    /// Take a note out of the trash.
    ///
    /// A note whose folder is itself trashed or gone is restored to the root.
    pub fn restore_note(&mut self, id: &NoteId) -> Result<(), StoreError> {
        let index = self.note_index(id)?;
        if !self.notes[index].is_deleted() {
            return Ok(());
        }

        let folder_is_live = match &self.notes[index].folder_id {
            Some(folder_id) => self.folder(folder_id).is_some_and(|f| !f.is_deleted()),
            None => true,
        };
        self.notes[index].deleted_at = None;
        if !folder_is_live {
            self.relocate_note(id, |note| note.folder_id = None)?;
        }

        self.unsynced.insert(id.clone());
        Ok(())
    }

    /// Remove a note for good, queueing its remote path for deletion.
    ///
    /// Returns the remote path that was queued.
    pub fn permanently_delete_note(&mut self, id: &NoteId) -> Result<String, StoreError> {
        let path = self.note_path(id)?;

        self.notes.retain(|n| &n.id != id);
        self.unsynced.remove(id);
        if self.open_note.as_ref() == Some(id) {
            self.open_note = None;
        }
        self.normalize_bookmarks();
        self.queue_remote_delete(&path);
        Ok(path)
    }

    /// Add or remove a note from the bookmarks; new bookmarks rank last.
    pub fn set_bookmarked(&mut self, id: &NoteId, bookmarked: bool) -> Result<(), StoreError> {
        let index = self.note_index(id)?;
        let note = &mut self.notes[index];
        if note.is_bookmarked == bookmarked {
            return Ok(());
        }

        note.is_bookmarked = bookmarked;
        note.bookmark_order = bookmarked.then_some(u32::MAX);
        self.normalize_bookmarks();
        Ok(())
    }

    /// Reorder bookmarks; `order` lists ids from first to last.
    ///
    /// Bookmarked notes missing from `order` keep their relative order after
    /// the listed ones. Ids that are not bookmarked are ignored.
    pub fn reorder_bookmarks(&mut self, order: &[NoteId]) {
        let offset = order.len() as u32;
        for note in self.notes.iter_mut().filter(|n| n.is_bookmarked) {
            let previous = note.bookmark_order.unwrap_or(0);
            note.bookmark_order = Some(match order.iter().position(|id| id == &note.id) {
                Some(position) => position as u32,
                None => offset.saturating_add(previous),
            });
        }
        self.normalize_bookmarks();
    }

    /// Follow a `[[link]]`: open the live note with this title, creating it
    /// in the root when none exists.
    pub fn open_or_create_linked_note(&mut self, title: &str) -> Result<NoteId, StoreError> {
        let wanted = title.trim();
        let existing = self
            .live_notes()
            .find(|n| n.title == wanted)
            .or_else(|| {
                let lowered = wanted.to_lowercase();
                self.live_notes().find(|n| n.title.to_lowercase() == lowered)
            })
            .map(|n| n.id.clone());

        match existing {
            Some(id) => {
                self.open_note = Some(id.clone());
                Ok(id)
            }
            None => self.create_note(wanted, None),
        }
    }

    /// Show a note in the editor.
    pub fn open_note_id(&mut self, id: &NoteId) -> Result<(), StoreError> {
        self.note_index(id)?;
        self.open_note = Some(id.clone());
        Ok(())
    }

    pub fn close_note(&mut self) {
        self.open_note = None;
    }

    // ---- folders ----

    /// Create a folder under `parent_id` (`None` for top level).
    pub fn create_folder(
        &mut self,
        name: impl Into<String>,
        parent_id: Option<FolderId>,
    ) -> Result<FolderId, StoreError> {
        self.ensure_live_folder(parent_id.as_ref())?;

        let folder = Folder::new(name, parent_id, Utc::now());
        let id = folder.id.clone();
        tracing::debug!(folder = %id, name = %folder.name, "created folder");
        self.folders.push(folder);
        Ok(id)
    }

    /// Rename a folder; every nested note's path changes with it.
    pub fn rename_folder(&mut self, id: &FolderId, name: impl Into<String>) -> Result<(), StoreError> {
        let name = name.into();
        self.relocate_folder(id, |folder| folder.name = name)
    }

    /// Re-parent a folder (`None` for top level). Moving a folder into its
    /// own subtree is rejected.
    pub fn move_folder(
        &mut self,
        id: &FolderId,
        parent_id: Option<FolderId>,
    ) -> Result<(), StoreError> {
        self.ensure_live_folder(parent_id.as_ref())?;
        if let Some(parent) = &parent_id
            && self.subtree(id).contains(parent)
        {
            return Err(StoreError::FolderCycle { id: id.clone() });
        }
        self.relocate_folder(id, |folder| folder.parent_id = parent_id)
    }

    /// Remove a folder, its descendants and their notes for good.
    ///
    /// Only the folder's own path is queued: deleting it remotely takes its
    /// contents along.
    pub fn permanently_delete_folder(&mut self, id: &FolderId) -> Result<String, StoreError> {
        let path = self.folder_path(id)?;

        let doomed = self.subtree(id);
        self.remove_folders_and_contents(&doomed);
        self.queue_remote_delete(&path);
        Ok(path)
    }

    // ---- helpers ----

    pub(crate) fn note_index(&self, id: &NoteId) -> Result<usize, StoreError> {
        self.notes
            .iter()
            .position(|n| &n.id == id)
            .ok_or_else(|| StoreError::note_not_found(id))
    }

    pub(crate) fn folder_index(&self, id: &FolderId) -> Result<usize, StoreError> {
        self.folders
            .iter()
            .position(|f| &f.id == id)
            .ok_or_else(|| StoreError::folder_not_found(id))
    }

    fn live_note_index(&self, id: &NoteId) -> Result<usize, StoreError> {
        let index = self.note_index(id)?;
        if self.notes[index].is_deleted() {
            return Err(StoreError::Trashed {
                what: format!("Note '{}'", self.notes[index].title),
            });
        }
        Ok(index)
    }

    fn ensure_live_folder(&self, id: Option<&FolderId>) -> Result<(), StoreError> {
        let Some(id) = id else {
            return Ok(());
        };
        let folder = self.folder(id).ok_or_else(|| StoreError::folder_not_found(id))?;
        if folder.is_deleted() {
            return Err(StoreError::Trashed {
                what: format!("Folder '{}'", folder.name),
            });
        }
        Ok(())
    }

    /// Apply a path-affecting change to a note and queue the resulting move.
    pub(crate) fn relocate_note(
        &mut self,
        id: &NoteId,
        change: impl FnOnce(&mut Note),
    ) -> Result<(), StoreError> {
        let index = self.live_note_index(id)?;
        let resolver = PathResolver::new(&self.folders);

        let note = &mut self.notes[index];
        let from = resolver.note_path(&note.title, note.folder_id.as_ref());
        change(note);
        let to = resolver.note_path(&note.title, note.folder_id.as_ref());
        note.updated_at = Utc::now();

        if from != to {
            tracing::debug!(%from, %to, "queued note move");
            self.renames.queue_rename(from, to);
        }
        Ok(())
    }

    /// Apply a path-affecting change to a folder and queue the resulting move.
    ///
    /// The new path is resolved against a copy of the folder table carrying
    /// the change, so nothing is committed if resolution fails.
    pub(crate) fn relocate_folder(
        &mut self,
        id: &FolderId,
        change: impl FnOnce(&mut Folder),
    ) -> Result<(), StoreError> {
        let index = self.folder_index(id)?;
        if self.folders[index].is_deleted() {
            return Err(StoreError::Trashed {
                what: format!("Folder '{}'", self.folders[index].name),
            });
        }

        let from = PathResolver::new(&self.folders).folder_path(Some(id));
        let mut proposed = self.folders.clone();
        change(&mut proposed[index]);
        proposed[index].updated_at = Utc::now();
        let to = PathResolver::new(&proposed).folder_path(Some(id));

        self.folders = proposed;
        if from != to {
            tracing::debug!(%from, %to, "queued folder move");
            self.renames.queue_rename(from, to);
        }
        Ok(())
    }

    /// Queue `path` for remote deletion.
    ///
    /// Live notes that resolve to `path` or below it are marked unsynced, so
    /// the upload phase puts them back after the delete phase ran.
    pub(crate) fn queue_remote_delete(&mut self, path: &str) {
        self.deleted_paths.push(path);

        let doomed = path.to_lowercase();
        let below = format!("{doomed}/");
        let resolver = PathResolver::new(&self.folders);
        let occupants: Vec<NoteId> = self
            .live_notes()
            .filter(|n| {
                let path = resolver.note_path(&n.title, n.folder_id.as_ref()).to_lowercase();
                path == doomed || path.starts_with(&below)
            })
            .map(|n| n.id.clone())
            .collect();

        for id in occupants {
            tracing::debug!(note = %id, %path, "re-uploading note under deleted path");
            self.unsynced.insert(id);
        }
    }

    /// Keep bookmark ranks dense: 0..n in current order.
    pub(crate) fn normalize_bookmarks(&mut self) {
        let mut ranked: Vec<usize> = (0..self.notes.len())
            .filter(|&i| self.notes[i].is_bookmarked)
            .collect();
        ranked.sort_by_key(|&i| (self.notes[i].bookmark_order.unwrap_or(u32::MAX), i));

        for (rank, index) in ranked.into_iter().enumerate() {
            self.notes[index].bookmark_order = Some(rank as u32);
        }
        for note in self.notes.iter_mut().filter(|n| !n.is_bookmarked) {
            note.bookmark_order = None;
        }
    }
}
