//! Soft deletion, restore and the trash reaper.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use quire_core::{FolderId, NoteId, PathResolver, StoreError};

use crate::store::LocalStore;

/// What a reaper pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub notes: Vec<NoteId>,
    pub folders: Vec<FolderId>,
    /// Remote paths queued for deletion.
    pub paths: Vec<String>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.folders.is_empty()
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} notes and {} folders removed, {} remote paths queued",
            self.notes.len(),
            self.folders.len(),
            self.paths.len()
        )
    }
}

impl LocalStore {
    /// Trash a folder together with every descendant folder and note.
    pub fn soft_delete_folder(&mut self, id: &FolderId) -> Result<(), StoreError> {
        self.soft_delete_folder_at(id, Utc::now())
    }

    /// Trash a folder subtree with an explicit deletion time.
    pub fn soft_delete_folder_at(
        &mut self,
        id: &FolderId,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.folder_index(id)?;
        let subtree: HashSet<FolderId> = self.subtree(id).into_iter().collect();

        // Items already in the trash keep their own timestamp.
        for folder in self.folders.iter_mut().filter(|f| subtree.contains(&f.id)) {
            folder.deleted_at.get_or_insert(when);
        }
        for note in self.notes.iter_mut() {
            if note.folder_id.as_ref().is_some_and(|f| subtree.contains(f)) {
                note.deleted_at.get_or_insert(when);
            }
        }
        self.clear_stale_open_note();

        tracing::debug!(folder = %id, folders = subtree.len(), "trashed folder subtree");
        Ok(())
    }

    /// Take a folder subtree out of the trash.
    ///
    /// Only descendants trashed in the same cascade (same timestamp) come
    /// back; items trashed individually before stay in the trash. A folder
    /// whose parent is still trashed is reattached at the top level.
    pub fn restore_folder(&mut self, id: &FolderId) -> Result<(), StoreError> {
        let index = self.folder_index(id)?;
        let Some(stamp) = self.folders[index].deleted_at else {
            return Ok(());
        };

        let subtree: HashSet<FolderId> = self.subtree(id).into_iter().collect();
        for folder in self.folders.iter_mut().filter(|f| subtree.contains(&f.id)) {
            if folder.deleted_at == Some(stamp) {
                folder.deleted_at = None;
            }
        }
        for note in self.notes.iter_mut() {
            if note.folder_id.as_ref().is_some_and(|f| subtree.contains(f))
                && note.deleted_at == Some(stamp)
            {
                note.deleted_at = None;
                self.unsynced.insert(note.id.clone());
            }
        }

        let parent_is_live = match &self.folders[index].parent_id {
            Some(parent) => self.folder(parent).is_some_and(|p| !p.is_deleted()),
            None => true,
        };
        if !parent_is_live {
            self.relocate_folder(id, |folder| folder.parent_id = None)?;
        }
        Ok(())
    }

    /// Permanently remove trash older than `retention`.
    ///
    /// Remote deletion paths are resolved before anything is removed, since
    /// a removed folder can no longer contribute its name to a path.
    pub fn reap_expired(&mut self, now: DateTime<Utc>, retention: Duration) -> ReapReport {
        let cutoff = now - retention;
        let report = self.purge(|deleted_at| deleted_at < cutoff);
        if !report.is_empty() {
            tracing::info!("trash reaper: {}", report.summary());
        }
        report
    }

    /// Permanently remove everything in the trash.
    pub fn empty_trash(&mut self) -> ReapReport {
        self.purge(|_| true)
    }

    fn purge(&mut self, expired: impl Fn(DateTime<Utc>) -> bool) -> ReapReport {
        let is_expired = |at: Option<DateTime<Utc>>| at.is_some_and(&expired);
        let expired_folders: HashSet<FolderId> = self
            .folders
            .iter()
            .filter(|f| is_expired(f.deleted_at))
            .map(|f| f.id.clone())
            .collect();

        let mut report = ReapReport::default();
        let mut doomed_folders: HashSet<FolderId> = HashSet::new();
        let mut doomed_notes: HashSet<NoteId> = HashSet::new();
        {
            let resolver = PathResolver::new(&self.folders);

            for folder in &self.folders {
                if !expired_folders.contains(&folder.id) {
                    continue;
                }
                // Deleting the top-most expired folder remotely removes the rest.
                if !self.has_ancestor_in(&folder.id, &expired_folders) {
                    report.paths.push(resolver.folder_path(Some(&folder.id)));
                }
                doomed_folders.extend(self.subtree(&folder.id));
            }

            for note in &self.notes {
                let inside_doomed = note
                    .folder_id
                    .as_ref()
                    .is_some_and(|f| doomed_folders.contains(f));
                if inside_doomed {
                    doomed_notes.insert(note.id.clone());
                } else if is_expired(note.deleted_at) {
                    report
                        .paths
                        .push(resolver.note_path(&note.title, note.folder_id.as_ref()));
                    doomed_notes.insert(note.id.clone());
                }
            }
        }

        report.notes = self
            .notes
            .iter()
            .filter(|n| doomed_notes.contains(&n.id))
            .map(|n| n.id.clone())
            .collect();
        report.folders = self
            .folders
            .iter()
            .filter(|f| doomed_folders.contains(&f.id))
            .map(|f| f.id.clone())
            .collect();

        let folders: Vec<FolderId> = report.folders.clone();
        self.remove_folders_and_contents(&folders);
        self.notes.retain(|n| !doomed_notes.contains(&n.id));
        for id in &doomed_notes {
            self.unsynced.remove(id);
        }
        self.clear_stale_open_note();
        self.normalize_bookmarks();
        for path in &report.paths {
            self.queue_remote_delete(path);
        }

        report
    }

    /// Ids of `root` and every folder below it, via an explicit worklist.
    pub(crate) fn subtree(&self, root: &FolderId) -> Vec<FolderId> {
        let mut children: HashMap<&FolderId, Vec<&FolderId>> = HashMap::new();
        for folder in &self.folders {
            if let Some(parent) = &folder.parent_id {
                children.entry(parent).or_default().push(&folder.id);
            }
        }

        let mut seen: HashSet<&FolderId> = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push(id.clone());
            if let Some(kids) = children.get(id) {
                stack.extend(kids.iter().copied());
            }
        }
        out
    }

    /// Drop the given folders and every note filed in them.
    pub(crate) fn remove_folders_and_contents(&mut self, folders: &[FolderId]) {
        let doomed: HashSet<&FolderId> = folders.iter().collect();
        let removed_notes: Vec<NoteId> = self
            .notes
            .iter()
            .filter(|n| n.folder_id.as_ref().is_some_and(|f| doomed.contains(f)))
            .map(|n| n.id.clone())
            .collect();

        self.notes
            .retain(|n| !n.folder_id.as_ref().is_some_and(|f| doomed.contains(f)));
        self.folders.retain(|f| !doomed.contains(&f.id));
        for id in &removed_notes {
            self.unsynced.remove(id);
        }
        self.clear_stale_open_note();
        self.normalize_bookmarks();
    }

    fn has_ancestor_in(&self, id: &FolderId, set: &HashSet<FolderId>) -> bool {
        let mut seen: HashSet<&FolderId> = HashSet::new();
        let mut current = self.folder(id).and_then(|f| f.parent_id.as_ref());
        while let Some(parent) = current {
            if set.contains(parent) {
                return true;
            }
            if !seen.insert(parent) {
                return false;
            }
            current = self.folder(parent).and_then(|f| f.parent_id.as_ref());
        }
        false
    }

    pub(crate) fn clear_stale_open_note(&mut self) {
        let stale = match &self.open_note {
            Some(id) => self.note(id).is_none_or(|n| n.is_deleted()),
            None => false,
        };
        if stale {
            self.open_note = None;
        }
    }
}
