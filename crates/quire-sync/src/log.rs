//! Chronological record of what a sync round did.

use std::fmt;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};

/// Kind of step recorded in a [`SyncLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    #[strum(to_string = "moved")]
    Rename,
    #[strum(to_string = "move skipped")]
    RenameSkipped,
    #[strum(to_string = "deleted remotely")]
    Delete,
    #[strum(to_string = "delete skipped")]
    DeleteSkipped,
    #[strum(to_string = "uploaded")]
    Upload,
    #[strum(to_string = "path collision")]
    Collision,
    #[strum(to_string = "folder created")]
    FolderCreated,
    #[strum(to_string = "downloaded")]
    Download,
    #[strum(to_string = "updated")]
    Update,
    #[strum(to_string = "removed locally")]
    RemoveLocal,
}

/// One step of a sync round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncLogEntry {
    pub at: DateTime<Utc>,
    pub action: SyncAction,
    pub path: String,
    pub detail: Option<String>,
}

impl fmt::Display for SyncLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.path)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Entries in the order the steps happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SyncLog {
    entries: Vec<SyncLogEntry>,
}

impl SyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step and mirror it to the tracing log.
    pub fn record(&mut self, action: SyncAction, path: impl Into<String>, detail: Option<String>) {
        let entry = SyncLogEntry {
            at: Utc::now(),
            action,
            path: path.into(),
            detail,
        };
        match action {
            SyncAction::Collision => tracing::warn!("{entry}"),
            _ => tracing::debug!("{entry}"),
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SyncLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries of one kind.
    pub fn count(&self, action: SyncAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Per-action totals, e.g. `"2 uploaded, 1 downloaded"`.
    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return "nothing to do".to_string();
        }
        let counts = self.entries.iter().map(|e| e.action).counts();
        SyncAction::iter()
            .filter_map(|action| counts.get(&action).map(|n| format!("{n} {action}")))
            .join(", ")
    }
}
