//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

const DAY: u64 = 24 * 60 * 60;

/// Timing and retention knobs used by the trash reaper and scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct SyncSettings {
    /// Age after which a soft-deleted entity is permanently removed.
    #[builder(default = "Duration::from_secs(30 * DAY)")]
    pub retention: Duration,

    /// Minimum time between the starts of two automatic rounds.
    #[builder(default = "Duration::from_secs(30)")]
    pub min_interval: Duration,

    /// Automatic rounds are suppressed this long after a local edit.
    #[builder(default = "Duration::from_secs(5)")]
    pub quiet_window: Duration,

    /// Period of the background timer trigger.
    #[builder(default = "Duration::from_secs(5 * 60)")]
    pub periodic_interval: Duration,

    /// Delay before the one-shot trigger after start-up.
    #[builder(default = "Duration::from_secs(3)")]
    pub initial_delay: Duration,

    /// Access tokens this close to expiry are treated as stale.
    #[builder(default = "Duration::from_secs(60)")]
    pub token_skew: Duration,
}

impl SyncSettingsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(period) = self.periodic_interval
            && period.is_zero()
        {
            return Err("Periodic interval must be non-zero".to_string());
        }
        if let Some(retention) = self.retention
            && retention.is_zero()
        {
            return Err("Trash retention must be non-zero".to_string());
        }
        Ok(())
    }
}

impl SyncSettings {
    /// Create a new settings builder.
    pub fn builder() -> SyncSettingsBuilder {
        SyncSettingsBuilder::default()
    }

    /// Retention as a chrono duration for timestamp arithmetic.
    pub fn retention_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100))
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * DAY),
            min_interval: Duration::from_secs(30),
            quiet_window: Duration::from_secs(5),
            periodic_interval: Duration::from_secs(5 * 60),
            initial_delay: Duration::from_secs(3),
            token_skew: Duration::from_secs(60),
        }
    }
}

/// Remote store endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Base URL for metadata RPC endpoints.
    pub api_base: String,
    /// Base URL for content upload/download endpoints.
    pub content_base: String,
    /// Remote folder all notes live under, empty for the app root.
    pub root: String,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.dropboxapi.com".to_string(),
            content_base: "https://content.dropboxapi.com".to_string(),
            root: String::new(),
        }
    }
}

/// OAuth client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_uri: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            authorize_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            redirect_uri: "http://localhost:53682/callback".to_string(),
        }
    }
}

/// Auto-sync schedule, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub enabled: bool,
    pub min_interval_secs: u64,
    pub quiet_window_secs: u64,
    pub periodic_secs: u64,
    pub initial_delay_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_secs: 30,
            quiet_window_secs: 5,
            periodic_secs: 5 * 60,
            initial_delay_secs: 3,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    /// Directory holding the state and credentials files.
    pub data_dir: PathBuf,
    /// Days a trashed note or folder is kept before it is reaped.
    pub retention_days: u64,
    pub remote: RemoteSection,
    pub auth: AuthSection,
    pub schedule: ScheduleSection,
}

impl Default for QuireConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quire");

        Self {
            data_dir,
            retention_days: 30,
            remote: RemoteSection::default(),
            auth: AuthSection::default(),
            schedule: ScheduleSection::default(),
        }
    }
}

impl QuireConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quire")
            .join("config.toml")
    }

    /// Load a configuration file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::parse(&text)
    }

    /// Parse configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        toml::from_str(text).map_err(|e| StoreError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Override the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Path of the persisted notes/folders/queues document.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    /// Path of the persisted OAuth credentials.
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    /// Derive validated timing settings.
    pub fn sync_settings(&self) -> Result<SyncSettings, StoreError> {
        SyncSettings::builder()
            .retention(Duration::from_secs(self.retention_days * DAY))
            .min_interval(Duration::from_secs(self.schedule.min_interval_secs))
            .quiet_window(Duration::from_secs(self.schedule.quiet_window_secs))
            .periodic_interval(Duration::from_secs(self.schedule.periodic_secs))
            .initial_delay(Duration::from_secs(self.schedule.initial_delay_secs))
            .build()
            .map_err(|e| StoreError::InvalidConfig {
                message: e.to_string(),
            })
    }
}
