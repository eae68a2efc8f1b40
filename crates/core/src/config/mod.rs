//! Icon database configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (FAVDB_*)
//! 2. TOML config file (if FAVDB_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Icon database configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (FAVDB_*)
/// 2. TOML config file (if FAVDB_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IconDatabaseConfig {
    /// Whether the database starts out enabled.
    ///
    /// Set via FAVDB_ENABLED environment variable.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory the host passes to `open`.
    ///
    /// Set via FAVDB_DATABASE_DIR environment variable.
    #[serde(default = "default_database_dir")]
    pub database_dir: PathBuf,

    /// File name of the SQLite store inside the opened directory.
    ///
    /// Set via FAVDB_DATABASE_FILENAME environment variable.
    #[serde(default = "default_database_filename")]
    pub database_filename: String,

    /// Delay before buffered mutations are flushed, in milliseconds.
    ///
    /// Every mutation restarts the timer. Set via FAVDB_SYNC_DELAY_MS.
    #[serde(default = "default_sync_delay_ms")]
    pub sync_delay_ms: u64,

    /// Age in seconds after which a known icon should be fetched again.
    ///
    /// Set via FAVDB_ICON_EXPIRATION_SECS environment variable.
    #[serde(default = "default_icon_expiration_secs")]
    pub icon_expiration_secs: u64,

    /// Maximum icons read from the store in one read pass.
    ///
    /// Set via FAVDB_READ_BATCH_SIZE environment variable.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    /// Buffered snapshot count above which a mutation wakes the sync thread
    /// right away instead of deferring the timer.
    ///
    /// Set via FAVDB_PENDING_SYNC_SOFT_LIMIT environment variable.
    #[serde(default = "default_pending_sync_soft_limit")]
    pub pending_sync_soft_limit: usize,

    /// Run `PRAGMA integrity_check` when opening and rebuild on failure.
    ///
    /// Set via FAVDB_CHECK_INTEGRITY_ON_OPEN environment variable.
    #[serde(default)]
    pub check_integrity_on_open: bool,

    /// Sweep persisted page bindings nobody retained, once per open.
    ///
    /// Set via FAVDB_PRUNE_UNRETAINED_ON_OPEN environment variable.
    #[serde(default)]
    pub prune_unretained_on_open: bool,

    /// Remove dangling page bindings instead of repairing and reporting them.
    ///
    /// Set via FAVDB_PRUNE_DANGLING_PAGES environment variable.
    #[serde(default = "default_true")]
    pub prune_dangling_pages: bool,

    /// JSON manifest consumed by the one-time legacy import.
    ///
    /// Set via FAVDB_LEGACY_IMPORT_PATH environment variable.
    #[serde(default)]
    pub legacy_import_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_database_dir() -> PathBuf {
    PathBuf::from("./favdb")
}

fn default_database_filename() -> String {
    "WebpageIcons.db".into()
}

fn default_sync_delay_ms() -> u64 {
    5_000
}

fn default_icon_expiration_secs() -> u64 {
    60 * 60 * 24 * 4
}

fn default_read_batch_size() -> usize {
    64
}

fn default_pending_sync_soft_limit() -> usize {
    1_024
}

impl Default for IconDatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_dir: default_database_dir(),
            database_filename: default_database_filename(),
            sync_delay_ms: default_sync_delay_ms(),
            icon_expiration_secs: default_icon_expiration_secs(),
            read_batch_size: default_read_batch_size(),
            pending_sync_soft_limit: default_pending_sync_soft_limit(),
            check_integrity_on_open: false,
            prune_unretained_on_open: false,
            prune_dangling_pages: true,
            legacy_import_path: None,
        }
    }
}

impl IconDatabaseConfig {
    /// Sync timer delay as a Duration.
    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }

    /// Icon expiration in whole seconds, as stored timestamps are.
    pub fn icon_expiration(&self) -> i64 {
        i64::try_from(self.icon_expiration_secs).unwrap_or(i64::MAX)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `FAVDB_`
    /// 2. TOML file from `FAVDB_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("FAVDB_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("FAVDB_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
