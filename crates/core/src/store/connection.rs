//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite store, applying pragmas, checking
//! integrity, rebuilding corrupt files and running migrations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use super::migrations;
use crate::Error;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;
     PRAGMA cache_size=200;";

/// Persistent icon store.
///
/// Owned by the sync thread; nothing else touches the connection.
#[derive(Debug)]
pub struct IconStore {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
}

impl IconStore {
    /// Open the store at the specified path.
    ///
    /// Creates the file and its parent directory if they don't exist, applies
    /// pragmas, and runs any pending migrations. A file that SQLite rejects as
    /// corrupt, or that fails the integrity check when `check_integrity` is set,
    /// is deleted and recreated empty.
    pub fn open(path: impl AsRef<Path>, check_integrity: bool) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        match Self::open_checked(path, check_integrity) {
            Ok(store) => Ok(store),
            Err(e) if e.is_corruption() => {
                tracing::warn!(path = %path.display(), error = %e, "Icon store is corrupt, rebuilding from scratch");
                remove_store_files(path)?;
                Self::open_checked(path, false)
            }
            Err(e) => Err(e),
        }
    }

    /// Open an in-memory store for testing.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(PRAGMAS)?;
        migrations::run(&conn)?;
        Ok(Self { conn, path: None })
    }

    fn open_checked(path: &Path, check_integrity: bool) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;

        if check_integrity {
            integrity_check(&conn)?;
        }

        migrations::run(&conn)?;

        Ok(Self { conn, path: Some(path.to_path_buf()) })
    }

    /// Path of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Drop cached statements and close the connection.
    pub fn close(self) -> Result<(), Error> {
        self.conn.flush_prepared_statement_cache();
        self.conn.close().map_err(|(_, e)| Error::Database(e))
    }
}

fn integrity_check(conn: &Connection) -> Result<(), Error> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if result == "ok" {
        Ok(())
    } else {
        Err(Error::IntegrityCheckFailed(result))
    }
}

fn remove_store_files(path: &Path) -> Result<(), Error> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }

    for file in candidates {
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let store = IconStore::open_in_memory().unwrap();
        let version: String = store
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .unwrap();
        assert!(!version.is_empty());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("icons.db");

        let store = IconStore::open(&path, true).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        store.close().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_garbage_file_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icons.db");
        fs::write(&path, vec![0x42u8; 8192]).unwrap();

        let store = IconStore::open(&path, true).unwrap();
        let tables: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 'page_url'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tables, 1);
    }
}
