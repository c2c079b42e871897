//! Error types for local store operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{FolderId, NoteId};

/// Errors that can occur while mutating or persisting local state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No note with this id.
    #[error("Note not found: {id}")]
    NoteNotFound { id: NoteId },

    /// No folder with this id.
    #[error("Folder not found: {id}")]
    FolderNotFound { id: FolderId },

    /// Moving a folder would make it its own ancestor.
    #[error("Cannot move folder {id} into its own subtree")]
    FolderCycle { id: FolderId },

    /// The entity is in the trash and cannot be edited.
    #[error("{what} is in the trash")]
    Trashed { what: String },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted state could not be encoded or decoded.
    #[error("Invalid state file {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl StoreError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn note_not_found(id: &NoteId) -> Self {
        Self::NoteNotFound { id: id.clone() }
    }

    pub fn folder_not_found(id: &FolderId) -> Self {
        Self::FolderNotFound { id: id.clone() }
    }
}
