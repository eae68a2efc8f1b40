//! Key/value flags stored alongside the icon tables.

use rusqlite::{OptionalExtension, params};

use super::connection::IconStore;
use crate::Error;

const IMPORTED_KEY: &str = "imported_legacy_icons";

impl IconStore {
    /// Whether the one-time legacy import has completed for this store.
    pub fn imported(&self) -> Result<bool, Error> {
        let value: Option<String> = self
            .conn
            .query_row("SELECT value FROM icon_database_info WHERE key = ?1", params![IMPORTED_KEY], |row| row.get(0))
            .optional()?;
        Ok(value.as_deref() == Some("1"))
    }
}

pub(crate) fn set_imported_on(conn: &rusqlite::Connection, imported: bool) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO icon_database_info (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![IMPORTED_KEY, if imported { "1" } else { "0" }],
    )?;
    Ok(())
}
