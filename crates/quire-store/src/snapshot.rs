//! Point-in-time copies handed to the sync engine, and merging results back.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quire_core::{Folder, Note, NoteId};

use crate::renames::RenameOperation;
use crate::store::LocalStore;

/// Everything a sync round needs, copied out of the store.
///
/// The engine works on the snapshot alone; the UI keeps mutating the store
/// while the round runs and [`LocalStore::commit_sync`] reconciles the two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub taken_at: DateTime<Utc>,
    pub notes: Vec<Note>,
    pub folders: Vec<Folder>,
    pub renames: Vec<RenameOperation>,
    pub deleted_paths: Vec<String>,
    pub unsynced: BTreeSet<NoteId>,
}

impl SyncSnapshot {
    pub fn is_unsynced(&self, id: &NoteId) -> bool {
        self.unsynced.contains(id)
    }

    /// Whether the round has any local work to push.
    pub fn has_pending_push(&self) -> bool {
        !self.renames.is_empty() || !self.deleted_paths.is_empty() || !self.unsynced.is_empty()
    }
}

impl LocalStore {
    /// Copy the state a sync round works on.
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            taken_at: Utc::now(),
            notes: self.notes.clone(),
            folders: self.folders.clone(),
            renames: self.renames.to_vec(),
            deleted_paths: self.deleted_paths.to_vec(),
            unsynced: self.unsynced.to_set(),
        }
    }

    /// Fold the result of a successful round back into the store.
    ///
    /// Only work captured in `snapshot` is retired: queue entries added since
    /// stay queued, and a note edited since stays unsynced. Entities changed
    /// locally during the round keep their local fields, but content the
    /// round pulled replaces content that was not edited locally; entities
    /// created during the round are kept;
    /// entities permanently removed during the round stay removed.
    pub fn commit_sync(&mut self, snapshot: &SyncSnapshot, notes: Vec<Note>, folders: Vec<Folder>) {
        self.renames.retain_after_sync(&snapshot.renames);
        self.deleted_paths.remove_applied(&snapshot.deleted_paths);

        let merged_notes = merge_table(&self.notes, &snapshot.notes, notes, |n| &n.id, adopt_synced_note);
        let merged_folders =
            merge_table(&self.folders, &snapshot.folders, folders, |f| &f.id, |_, _, _| {});

        for id in &snapshot.unsynced {
            let before = snapshot.notes.iter().find(|n| &n.id == id);
            let now = self.notes.iter().find(|n| &n.id == id);
            let edited_since = match (before, now) {
                (Some(before), Some(now)) => before.content != now.content
                    || before.title != now.title
                    || before.folder_id != now.folder_id
                    || before.deleted_at != now.deleted_at,
                _ => false,
            };
            if !edited_since {
                self.unsynced.remove(id);
            }
        }

        self.notes = merged_notes;
        self.folders = merged_folders;
        let live: HashSet<&NoteId> = self.notes.iter().map(|n| &n.id).collect();
        let gone: Vec<NoteId> = self.unsynced.iter().filter(|id| !live.contains(id)).cloned().collect();
        for id in &gone {
            self.unsynced.remove(id);
        }
        self.clear_stale_open_note();
        self.normalize_bookmarks();

        tracing::debug!(
            notes = self.notes.len(),
            folders = self.folders.len(),
            pending_renames = self.renames.len(),
            pending_deletes = self.deleted_paths.len(),
            "committed sync round"
        );
    }
}

/// Carry the round's result into a note that changed locally meanwhile.
///
/// `synced_at` only moves forward together with the content it describes:
/// if the local body was edited it stays, and the note is still unsynced.
fn adopt_synced_note(local: &mut Note, base: &Note, synced: &Note) {
    if local.content == base.content {
        local.content = synced.content.clone();
        local.updated_at = local.updated_at.max(synced.updated_at);
    }
    local.synced_at = local.synced_at.max(synced.synced_at);
}

/// Three-way merge of one entity table.
///
/// `local` is the store now, `base` what the round started from, `synced`
/// what the round produced. `adopt` receives the local copy, the base and
/// the synced copy when both sides changed.
fn merge_table<T, K>(
    local: &[T],
    base: &[T],
    synced: Vec<T>,
    key: impl Fn(&T) -> &K,
    adopt: impl Fn(&mut T, &T, &T),
) -> Vec<T>
where
    T: Clone + PartialEq,
    K: Eq + Hash + Clone,
{
    let base_by_key: HashMap<&K, &T> = base.iter().map(|item| (key(item), item)).collect();
    let local_by_key: HashMap<&K, &T> = local.iter().map(|item| (key(item), item)).collect();

    let mut placed: HashSet<K> = HashSet::new();
    let mut out = Vec::with_capacity(synced.len());
    for item in synced {
        let k = key(&item).clone();
        match (local_by_key.get(&k), base_by_key.get(&k)) {
            (Some(now), Some(before)) if now != before => {
                let mut kept = (*now).clone();
                adopt(&mut kept, before, &item);
                out.push(kept);
            }
            // Removed locally while the round ran.
            (None, Some(_)) => {}
            _ => out.push(item),
        }
        placed.insert(k);
    }

    for item in local {
        let k = key(item);
        if placed.contains(k) {
            continue;
        }
        match base_by_key.get(k) {
            // Created during the round.
            None => out.push(item.clone()),
            // Removed by the round but edited locally meanwhile.
            Some(before) if *before != item => out.push(item.clone()),
            Some(_) => {}
        }
    }
    out
}
