//! Local state for quire.
//!
//! This crate owns the in-memory note and folder tables together with the
//! ledgers the sync engine drains: pending remote moves, remote paths awaiting
//! deletion, and notes changed since the last push. Every UI mutation goes
//! through [`LocalStore`] so those ledgers stay consistent with the tables.

mod deletion;
mod persist;
mod renames;
mod snapshot;
mod store;
mod trash;

pub use deletion::DeletedPaths;
pub use persist::StateLock;
pub use renames::{RenameOperation, RenameQueue};
pub use snapshot::SyncSnapshot;
pub use store::{LocalStore, UnsyncedIds};
pub use trash::ReapReport;
