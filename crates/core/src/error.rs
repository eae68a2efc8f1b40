//! Unified error types for the icon database.
//!
//! Only the sync thread ever sees these: store failures are contained there
//! and the facade reports outcomes as booleans and options.

use rusqlite::ErrorCode;

/// Unified error type for store access, import and configuration of paths.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SQLite operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The on-disk schema was written by a newer version.
    #[error("STORE_ERROR: schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// `PRAGMA integrity_check` reported a problem.
    #[error("STORE_ERROR: integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    /// Filesystem access failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// The legacy import source could not be read or parsed.
    #[error("IMPORT_FAILED: {0}")]
    ImportFailed(String),

    /// The database location is unusable.
    #[error("INVALID_PATH: {0}")]
    InvalidPath(String),
}

impl Error {
    /// Whether the error means the file on disk is not a usable database at all.
    ///
    /// These are rebuilt from scratch rather than served.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::IntegrityCheckFailed(_) => true,
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
            }
            _ => false,
        }
    }
}
