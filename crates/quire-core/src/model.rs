//! Note and folder records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a note. Never reused once issued.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub String);

impl NoteId {
    /// Issue a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a folder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(pub String);

impl FolderId {
    /// Issue a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    /// Containing folder, `None` for the root.
    #[serde(default)]
    pub folder_id: Option<FolderId>,
    /// Display title, also the stem of the remote filename.
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_bookmarked: bool,
    /// Dense rank among bookmarked notes.
    #[serde(default)]
    pub bookmark_order: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the note is in the trash.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Server modification time seen at the last upload or download.
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

impl Note {
    /// Create a live, empty note.
    pub fn new(title: impl Into<String>, folder_id: Option<FolderId>, now: DateTime<Utc>) -> Self {
        Self {
            id: NoteId::generate(),
            folder_id,
            title: title.into(),
            content: String::new(),
            is_bookmarked: false,
            bookmark_order: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            synced_at: None,
        }
    }

    /// Set the body, builder style.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Reference time for last-writer-wins comparisons.
    pub fn last_known_change(&self) -> DateTime<Utc> {
        match self.synced_at {
            Some(synced) if synced > self.updated_at => synced,
            _ => self.updated_at,
        }
    }
}

/// A folder in the note hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    /// Parent folder, `None` for a top-level folder.
    #[serde(default)]
    pub parent_id: Option<FolderId>,
    pub created_at: DateTime<Utc>,
    /// Older snapshots lack this field; it falls back to the epoch.
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Folder {
    /// Create a live folder.
    pub fn new(name: impl Into<String>, parent_id: Option<FolderId>, now: DateTime<Utc>) -> Self {
        Self {
            id: FolderId::generate(),
            name: name.into(),
            parent_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(NoteId::generate(), NoteId::generate());
        assert_ne!(FolderId::generate(), FolderId::generate());
    }

    #[test]
    fn test_note_round_trips_through_json() {
        let now = Utc::now();
        let mut note = Note::new("Foo", Some(FolderId::new("f1")), now).with_content("body");
        note.is_bookmarked = true;
        note.bookmark_order = Some(0);
        note.deleted_at = Some(now);

        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("\"folderId\":\"f1\""));
        let back: Note = serde_json::from_str(&json).unwrap();
        assert_eq!(back, note);
    }

    #[test]
    fn test_last_known_change_prefers_later_sync() {
        let now = Utc::now();
        let mut note = Note::new("Foo", None, now);
        assert_eq!(note.last_known_change(), now);

        let later = now + chrono::Duration::seconds(10);
        note.synced_at = Some(later);
        assert_eq!(note.last_known_change(), later);
    }
}
