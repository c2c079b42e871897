//! Remote path resolution.
//!
//! A note's remote path is derived from its title and the names of its
//! ancestor folders, so renaming or moving anything in the chain changes the
//! path. Resolution is pure: callers resolve once against the folder table
//! before a change and once against the table after it, and diff the results.

use std::collections::{HashMap, HashSet};

use crate::model::{Folder, FolderId};
use crate::{NOTE_EXTENSION, PATH_SEPARATOR};

/// Characters that may not appear inside a single path segment.
const RESERVED_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Placeholder for a segment that sanitizes to nothing.
const EMPTY_SEGMENT: &str = "Untitled";

/// Make a title or folder name safe to use as one path segment.
///
/// Separators, reserved characters and control characters become `_`,
/// surrounding whitespace is trimmed, and the dot-only names `.` and `..`
/// are replaced so they can never address a parent directory.
pub fn sanitize_segment(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if RESERVED_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim();
    match trimmed {
        "" => EMPTY_SEGMENT.to_string(),
        "." => "_".to_string(),
        ".." => "__".to_string(),
        other => other.to_string(),
    }
}

/// Folder lookup built once per folder table.
#[derive(Debug)]
pub struct PathResolver<'a> {
    folders: HashMap<&'a FolderId, &'a Folder>,
}

impl<'a> PathResolver<'a> {
    /// Index a folder table.
    pub fn new(folders: &'a [Folder]) -> Self {
        Self {
            folders: folders.iter().map(|f| (&f.id, f)).collect(),
        }
    }

    /// Sanitized ancestor names of `folder_id`, root first, the folder itself last.
    ///
    /// A dangling reference ends the chain as if it were the root. A cyclic
    /// chain is cut at the first folder seen twice.
    pub fn folder_segments(&self, folder_id: Option<&FolderId>) -> Vec<String> {
        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        let mut current = folder_id;

        while let Some(id) = current {
            let Some(folder) = self.folders.get(id) else {
                break;
            };
            if !seen.insert(id) {
                break;
            }
            segments.push(sanitize_segment(&folder.name));
            current = folder.parent_id.as_ref();
        }

        segments.reverse();
        segments
    }

    /// Path of a folder, empty for the root.
    pub fn folder_path(&self, folder_id: Option<&FolderId>) -> String {
        self.folder_segments(folder_id)
            .join(&PATH_SEPARATOR.to_string())
    }

    /// Path of a note with `title` stored in `folder_id`.
    pub fn note_path(&self, title: &str, folder_id: Option<&FolderId>) -> String {
        let mut segments = self.folder_segments(folder_id);
        segments.push(format!("{}.{}", sanitize_segment(title), NOTE_EXTENSION));
        segments.join(&PATH_SEPARATOR.to_string())
    }
}

/// Resolve the remote path of a note.
pub fn note_path(title: &str, folder_id: Option<&FolderId>, folders: &[Folder]) -> String {
    PathResolver::new(folders).note_path(title, folder_id)
}

/// Resolve the remote path of a folder.
pub fn folder_path(folder_id: Option<&FolderId>, folders: &[Folder]) -> String {
    PathResolver::new(folders).folder_path(folder_id)
}

/// Split a remote note path into its folder segments and title stem.
///
/// Returns `None` for anything that is not a note file.
pub fn split_note_path(path: &str) -> Option<(Vec<String>, String)> {
    let mut segments: Vec<&str> = path
        .split(PATH_SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect();
    let file_name = segments.pop()?;

    let suffix_len = NOTE_EXTENSION.len() + 1;
    if file_name.len() <= suffix_len || !file_name.is_char_boundary(file_name.len() - suffix_len) {
        return None;
    }
    let (stem, suffix) = file_name.split_at(file_name.len() - suffix_len);
    if !suffix.eq_ignore_ascii_case(&format!(".{NOTE_EXTENSION}")) {
        return None;
    }

    Some((
        segments.into_iter().map(str::to_string).collect(),
        stem.to_string(),
    ))
}
