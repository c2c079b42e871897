//! The remote store abstraction the sync engine talks to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RemoteError;

/// Whether a remote entry is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    File,
    Folder,
}

/// One entry of a recursive remote listing.
///
/// Paths are relative to the configured remote root, `/`-separated, with no
/// leading slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub kind: RemoteKind,
    /// Server modification time; folders have none.
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn file(path: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            kind: RemoteKind::File,
            modified: Some(modified),
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: RemoteKind::Folder,
            modified: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == RemoteKind::Folder
    }

    /// Number of path segments, used to create parents before children.
    pub fn depth(&self) -> usize {
        self.path.split('/').count()
    }
}

/// Result of a remote move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// Something already at the destination was deleted first.
    Replaced,
    /// Nothing at the source; an earlier round already applied the move.
    SourceMissing,
}

/// Result of a remote deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing at the path; an earlier round already deleted it.
    Missing,
}

/// A hierarchical file store reachable with a bearer token.
///
/// Every call takes the token explicitly so the caller can refresh and
/// retry after [`RemoteError::Unauthorized`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every file and folder below the root, recursively.
    async fn list_all(&self, token: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Contents of a text file.
    async fn read(&self, token: &str, path: &str) -> Result<String, RemoteError>;

    /// Create or overwrite a file; returns the server modification time.
    async fn write(&self, token: &str, path: &str, content: &str)
    -> Result<DateTime<Utc>, RemoteError>;

    /// Move a file or folder, replacing whatever is at `to`.
    async fn move_path(&self, token: &str, from: &str, to: &str)
    -> Result<MoveOutcome, RemoteError>;

    /// Delete a file or folder (with its contents).
    async fn delete(&self, token: &str, path: &str) -> Result<DeleteOutcome, RemoteError>;
}
