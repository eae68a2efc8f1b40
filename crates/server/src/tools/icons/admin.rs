//! Lifecycle and maintenance tools: open/close, sync, stats, remove-all,
//! private browsing.

use std::path::PathBuf;
use std::time::Duration;

use favdb_core::{Error, IconDatabase, IconDatabaseStats, SyncState};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Ack, require_open, to_result};
use crate::error::BridgeError;

/// Parameters for the icon_database_open tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpenParams {
    /// Directory holding the store. Defaults to the configured `database_dir`.
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpenOutput {
    pub opened: bool,
    pub database_path: Option<String>,
}

pub fn open(db: &IconDatabase, params: OpenParams) -> Result<OpenOutput, BridgeError> {
    let directory = params.directory.map_or_else(|| db.config().database_dir.clone(), PathBuf::from);
    if directory.exists() && !directory.is_dir() {
        return Err(Error::InvalidPath(format!("{} is not a directory", directory.display())).into());
    }
    let opened = db.open(&directory);
    let database_path = db.database_path().map(|path| path.display().to_string());
    Ok(OpenOutput { opened, database_path })
}

/// Implementation of the icon_database_open tool.
pub fn open_impl(db: &IconDatabase, params: OpenParams) -> Result<CallToolResult, McpError> {
    to_result(&open(db, params)?)
}

/// Implementation of the icon_database_close tool. Blocks until the sync thread exits.
pub fn close_impl(db: &IconDatabase) -> Result<CallToolResult, McpError> {
    db.close();
    to_result(&Ack { ok: true })
}

/// Parameters for the icon_sync tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncParams {
    /// How long to wait for the cycle, in milliseconds (default: 10000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncOutput {
    pub completed: bool,
    /// Sync thread state: `not_started`, `importing`, `syncing`, `terminating` or `stopped`.
    pub state: String,
}

fn state_label(state: SyncState) -> &'static str {
    match state {
        SyncState::NotStarted => "not_started",
        SyncState::Importing => "importing",
        SyncState::Syncing => "syncing",
        SyncState::Terminating => "terminating",
        SyncState::Stopped => "stopped",
    }
}

pub fn sync(db: &IconDatabase, params: SyncParams) -> Result<SyncOutput, BridgeError> {
    require_open(db)?;
    let completed = db.sync_now(Duration::from_millis(params.timeout_ms));
    Ok(SyncOutput { completed, state: state_label(db.sync_state()).into() })
}

/// Implementation of the icon_sync tool. Blocks for up to `timeout_ms`.
pub fn sync_impl(db: &IconDatabase, params: SyncParams) -> Result<CallToolResult, McpError> {
    to_result(&sync(db, params)?)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsOutput {
    pub open: bool,
    pub enabled: bool,
    pub private_browsing: bool,
    pub state: &'static str,
    pub stats: IconDatabaseStats,
}

pub fn stats(db: &IconDatabase) -> StatsOutput {
    StatsOutput {
        open: db.is_open(),
        enabled: db.is_enabled(),
        private_browsing: db.is_private_browsing_enabled(),
        state: state_label(db.sync_state()),
        stats: db.stats(),
    }
}

/// Implementation of the icon_stats tool.
pub fn stats_impl(db: &IconDatabase) -> Result<CallToolResult, McpError> {
    to_result(&stats(db))
}

pub fn remove_all(db: &IconDatabase) -> Result<Ack, BridgeError> {
    require_open(db)?;
    db.remove_all_icons();
    Ok(Ack { ok: true })
}

/// Implementation of the icon_remove_all tool.
pub fn remove_all_impl(db: &IconDatabase) -> Result<CallToolResult, McpError> {
    to_result(&remove_all(db)?)
}

/// Parameters for the icon_private_browsing tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PrivateBrowsingParams {
    pub enabled: bool,
}

/// Implementation of the icon_private_browsing tool.
pub fn private_browsing_impl(db: &IconDatabase, params: PrivateBrowsingParams) -> Result<CallToolResult, McpError> {
    db.set_private_browsing_enabled(params.enabled);
    to_result(&Ack { ok: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::icons::test_support::open_db;
    use bytes::Bytes;

    #[test]
    fn test_open_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let db = IconDatabase::new(Default::default());

        let params = OpenParams { directory: Some(file.display().to_string()) };
        assert!(matches!(open(&db, params), Err(BridgeError::Core(Error::InvalidPath(_)))));
    }

    #[test]
    fn test_open_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = IconDatabase::new(Default::default());
        let output = open(&db, OpenParams { directory: Some(dir.path().display().to_string()) }).unwrap();
        assert!(output.opened);
        assert!(output.database_path.unwrap().ends_with("WebpageIcons.db"));

        let again = open(&db, OpenParams { directory: Some(dir.path().display().to_string()) }).unwrap();
        assert!(!again.opened);
        assert!(close_impl(&db).is_ok());
    }

    #[test]
    fn test_sync_and_stats() {
        let (_dir, db) = open_db();
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"a")), "icon://a");

        let output = sync(&db, SyncParams { timeout_ms: 10_000 }).unwrap();
        assert!(output.completed);
        assert_eq!(output.state, "syncing");

        let stats = stats(&db);
        assert!(stats.open);
        assert_eq!(stats.stats.page_url_mappings, 1);
        assert_eq!(stats.stats.pending_sync, 0);
    }

    #[test]
    fn test_remove_all_clears_memory() {
        let (_dir, db) = open_db();
        db.set_icon_url_for_page_url("icon://a", "page://x");
        remove_all(&db).unwrap();
        assert_eq!(db.icon_url_for_page_url("page://x"), None);
    }

    #[test]
    fn test_private_browsing_toggle() {
        let (_dir, db) = open_db();
        private_browsing_impl(&db, PrivateBrowsingParams { enabled: true }).unwrap();
        assert!(stats(&db).private_browsing);
    }
}
