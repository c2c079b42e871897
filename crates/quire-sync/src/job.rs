//! A complete sync round against the on-disk state file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use quire_core::SyncSettings;
use quire_store::{LocalStore, StateLock};

use crate::auth::TokenSource;
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::log::SyncLog;

/// Work the scheduler runs when a trigger is admitted.
#[async_trait]
pub trait SyncJob: Send + Sync + 'static {
    async fn run(&self) -> Result<SyncLog, SyncError>;
}

/// Loads the state file, reaps expired trash, syncs and commits.
///
/// The state file is re-read before committing, so edits another process
/// saved while the round ran are merged rather than overwritten. Every
/// load-modify-save cycle holds the [`StateLock`]; the lock is not held
/// across remote calls.
pub struct FileSyncJob {
    state_path: PathBuf,
    engine: SyncEngine,
    tokens: Arc<dyn TokenSource>,
    settings: SyncSettings,
}

impl FileSyncJob {
    pub fn new(
        state_path: impl Into<PathBuf>,
        engine: SyncEngine,
        tokens: Arc<dyn TokenSource>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            state_path: state_path.into(),
            engine,
            tokens,
            settings,
        }
    }

    /// Run one round now, bypassing any scheduling.
    pub async fn run_once(&self) -> Result<SyncLog, SyncError> {
        let snapshot = {
            let _lock = StateLock::acquire(&self.state_path)?;
            let mut store = LocalStore::load(&self.state_path)?;
            let reaped = store.reap_expired(Utc::now(), self.settings.retention_chrono());
            if !reaped.is_empty() {
                store.save(&self.state_path)?;
            }
            store.snapshot()
        };

        let outcome = self.engine.sync(self.tokens.as_ref(), &snapshot).await?;

        let _lock = StateLock::acquire(&self.state_path)?;
        let mut current = LocalStore::load(&self.state_path)?;
        current.commit_sync(&snapshot, outcome.notes, outcome.folders);
        current.save(&self.state_path)?;

        Ok(outcome.log)
    }
}

#[async_trait]
impl SyncJob for FileSyncJob {
    async fn run(&self) -> Result<SyncLog, SyncError> {
        self.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::auth::{AuthManager, Credentials};
    use crate::memory::MemoryStore;
    use quire_core::AuthSection;

    async fn connected() -> Arc<AuthManager> {
        let auth = AuthManager::new(AuthSection::default());
        auth.set_credentials(Credentials {
            access_token: "token".into(),
            refresh_token: None,
            expires_at: None,
        })
        .await
        .unwrap();
        Arc::new(auth)
    }

    #[tokio::test]
    async fn test_round_trip_through_state_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = LocalStore::new();
        let id = store.create_note("Foo", None).unwrap();
        store.update_note_content(&id, "hello").unwrap();
        store.save(&path).unwrap();

        let remote = Arc::new(MemoryStore::new());
        let job = FileSyncJob::new(
            &path,
            SyncEngine::new(remote.clone()),
            connected().await,
            SyncSettings::default(),
        );
        let log = job.run().await.unwrap();

        assert_eq!(log.summary(), "1 uploaded");
        assert_eq!(remote.file("Foo.md").as_deref(), Some("hello"));
        let after = LocalStore::load(&path).unwrap();
        assert!(after.unsynced().is_empty());
        assert!(after.note(&id).unwrap().synced_at.is_some());
    }

    #[tokio::test]
    async fn test_round_releases_state_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        LocalStore::new().save(&path).unwrap();

        let job = FileSyncJob::new(
            &path,
            SyncEngine::new(Arc::new(MemoryStore::new())),
            connected().await,
            SyncSettings::default(),
        );
        job.run().await.unwrap();

        assert!(StateLock::try_acquire(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_round_leaves_state_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = LocalStore::new();
        let id = store.create_note("Foo", None).unwrap();
        store.rename_note(&id, "Bar").unwrap();
        store.save(&path).unwrap();

        let remote = Arc::new(MemoryStore::new());
        remote.set_offline(true);
        let job = FileSyncJob::new(
            &path,
            SyncEngine::new(remote.clone()),
            connected().await,
            SyncSettings::default(),
        );

        let err = job.run().await.unwrap_err();
        assert!(err.is_retryable());

        let after = LocalStore::load(&path).unwrap();
        assert!(after.unsynced().contains(&id));
        assert_eq!(after.renames().len(), 1);
    }
}
