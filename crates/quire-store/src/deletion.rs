//! Remote paths awaiting permanent removal.

use serde::{Deserialize, Serialize};

/// Append-only list of remote paths to delete on the next sync round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeletedPaths(Vec<String>);

impl DeletedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a path. A path already waiting is not added twice.
    pub fn push(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.0.contains(&path) {
            tracing::debug!(%path, "queued remote deletion");
            self.0.push(path);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.iter().any(|p| p == path)
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

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }

    /// Drop the paths a sync round deleted, keeping anything queued since.
    pub fn remove_applied(&mut self, applied: &[String]) {
        self.0.retain(|path| !applied.contains(path));
    }
}
