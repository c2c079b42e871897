//! Core types and traits for quire.
//!
//! This crate provides the fundamental data structures shared by the local
//! store and the sync engine: notes, folders, remote path resolution and
//! configuration.

mod config;
mod error;
mod model;
pub mod path;

pub use config::{
    AuthSection, QuireConfig, RemoteSection, ScheduleSection, SyncSettings, SyncSettingsBuilder,
};
pub use error::StoreError;
pub use model::{Folder, FolderId, Note, NoteId};
pub use path::{PathResolver, folder_path, note_path, sanitize_segment, split_note_path};

/// Separator between path segments on the remote store.
pub const PATH_SEPARATOR: char = '/';

/// Extension appended to a note title to form its remote filename.
pub const NOTE_EXTENSION: &str = "md";
