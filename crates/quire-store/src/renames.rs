//! Coalescing ledger of pending remote moves.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A pending remote move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameOperation {
    pub from: String,
    pub to: String,
}

impl RenameOperation {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Pending remote moves, at most one per original source path.
///
/// Entries are keyed by their original `from` and indexed in reverse by their
/// current `to`, so extending a chain is a map lookup rather than a scan.
/// Insertion order is preserved because moves must replay in the order the
/// user made them (a folder move before a rename inside the moved folder).
#[derive(Debug, Clone, Default)]
pub struct RenameQueue {
    entries: IndexMap<String, String>,
    by_target: HashMap<String, String>,
}

impl RenameQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the object at `from` now lives at `to`.
    ///
    /// If an entry already ends at `from`, its destination is rewritten in
    /// place; a chain that returns to its origin disappears entirely.
    pub fn queue_rename(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        if from == to {
            return;
        }

        if let Some(origin) = self.by_target.remove(&from) {
            if origin == to {
                self.entries.shift_remove(&origin);
                tracing::debug!(path = %origin, "rename chain returned to its origin");
            } else {
                self.entries.insert(origin.clone(), to.clone());
                self.by_target.insert(to, origin);
            }
            return;
        }

        if let Some(previous_to) = self.entries.insert(from.clone(), to.clone()) {
            self.by_target.remove(&previous_to);
        }
        self.by_target.insert(to, from);
    }

    /// Pending moves in replay order.
    pub fn iter(&self) -> impl Iterator<Item = RenameOperation> + '_ {
        self.entries
            .iter()
            .map(|(from, to)| RenameOperation::new(from.clone(), to.clone()))
    }

    /// Pending moves as an owned list.
    pub fn to_vec(&self) -> Vec<RenameOperation> {
        self.iter().collect()
    }

    /// Destination currently queued for `from`.
    pub fn destination_of(&self, from: &str) -> Option<&str> {
        self.entries.get(from).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_target.clear();
    }

    /// Drop the moves a sync round applied.
    ///
    /// An entry extended while the round was running keeps its new tail: the
    /// remote object already sits at the applied destination, so the entry is
    /// re-rooted there.
    pub fn retain_after_sync(&mut self, applied: &[RenameOperation]) {
        for op in applied {
            let Some((index, _, current_to)) = self.entries.shift_remove_full(&op.from) else {
                continue;
            };
            self.by_target.remove(&current_to);

            if current_to != op.to && current_to != op.from {
                self.entries
                    .shift_insert(index, op.to.clone(), current_to.clone());
                self.by_target.insert(current_to, op.to.clone());
            }
        }
    }
}

impl From<Vec<RenameOperation>> for RenameQueue {
    fn from(ops: Vec<RenameOperation>) -> Self {
        let mut queue = Self::new();
        for op in ops {
            if op.from == op.to {
                continue;
            }
            if let Some(previous_to) = queue.entries.insert(op.from.clone(), op.to.clone()) {
                queue.by_target.remove(&previous_to);
            }
            queue.by_target.insert(op.to, op.from);
        }
        queue
    }
}

impl From<RenameQueue> for Vec<RenameOperation> {
    fn from(queue: RenameQueue) -> Self {
        queue.to_vec()
    }
}

impl Serialize for RenameQueue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for RenameQueue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<RenameOperation>::deserialize(deserializer).map(Self::from)
    }
}
