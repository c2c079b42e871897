//! Sync for quire.
//!
//! This crate connects a [`quire_store::LocalStore`] to a remote file store:
//!
//! - [`AuthManager`] runs the PKCE authorization flow and keeps tokens fresh
//! - [`RemoteStore`] abstracts the remote, with [`DropboxStore`] for the real
//!   service and [`MemoryStore`] for tests and offline use
//! - [`SyncEngine`] runs one round: moves, deletes, push, then pull
//! - [`AutoSyncScheduler`] decides when rounds run

mod auth;
mod dropbox;
mod engine;
mod error;
mod job;
mod log;
mod memory;
mod remote;
mod scheduler;

pub use auth::{AuthManager, Credentials, TokenSource, code_challenge};
pub use dropbox::DropboxStore;
pub use engine::{SyncEngine, SyncOutcome};
pub use error::{AuthError, RemoteError, SyncError};
pub use job::{FileSyncJob, SyncJob};
pub use log::{SyncAction, SyncLog, SyncLogEntry};
pub use memory::MemoryStore;
pub use remote::{DeleteOutcome, MoveOutcome, RemoteEntry, RemoteKind, RemoteStore};
pub use scheduler::{AutoSyncScheduler, SchedulerHandle, SkipReason, SyncGate, SyncStatus, Trigger};
