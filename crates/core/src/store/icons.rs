//! Icon rows: addresses, timestamps and bytes.

use bytes::Bytes;
use rusqlite::{Connection, OptionalExtension, params};

use super::connection::IconStore;
use crate::Error;
use crate::records::IconSnapshot;

pub(crate) fn icon_id(conn: &Connection, icon_url: &str) -> Result<Option<i64>, Error> {
    let mut stmt = conn.prepare_cached("SELECT icon_id FROM icon_info WHERE url = ?1")?;
    Ok(stmt.query_row(params![icon_url], |row| row.get(0)).optional()?)
}

/// Look up the icon id, adding a data-less row if the address is new.
pub(crate) fn get_or_add_icon_id(conn: &Connection, icon_url: &str) -> Result<i64, Error> {
    if let Some(id) = icon_id(conn, icon_url)? {
        return Ok(id);
    }
    let mut stmt = conn.prepare_cached("INSERT INTO icon_info (url, stamp) VALUES (?1, 0)")?;
    stmt.execute(params![icon_url])?;
    Ok(conn.last_insert_rowid())
}

/// Write one icon snapshot: upsert its timestamp and bytes, or delete it.
pub(crate) fn write_icon_snapshot(conn: &Connection, snapshot: &IconSnapshot) -> Result<(), Error> {
    if snapshot.is_deletion() {
        remove_icon(conn, &snapshot.icon_url)?;
        return Ok(());
    }

    let id = get_or_add_icon_id(conn, &snapshot.icon_url)?;
    conn.prepare_cached("UPDATE icon_info SET stamp = ?1 WHERE icon_id = ?2")?
        .execute(params![snapshot.timestamp, id])?;

    let data: Option<&[u8]> = snapshot.data.as_deref();
    conn.prepare_cached(
        "INSERT INTO icon_data (icon_id, data) VALUES (?1, ?2)
         ON CONFLICT(icon_id) DO UPDATE SET data = excluded.data",
    )?
    .execute(params![id, data])?;
    Ok(())
}

/// Delete an icon along with its bytes and every page bound to it.
pub(crate) fn remove_icon(conn: &Connection, icon_url: &str) -> Result<bool, Error> {
    let Some(id) = icon_id(conn, icon_url)? else {
        return Ok(false);
    };
    conn.prepare_cached("DELETE FROM page_url WHERE icon_id = ?1")?.execute(params![id])?;
    conn.prepare_cached("DELETE FROM icon_data WHERE icon_id = ?1")?.execute(params![id])?;
    conn.prepare_cached("DELETE FROM icon_info WHERE icon_id = ?1")?.execute(params![id])?;
    Ok(true)
}

impl IconStore {
    /// Get the bytes stored for an icon address.
    ///
    /// Returns None if the icon is unknown or known to have no data.
    pub fn icon_data(&self, icon_url: &str) -> Result<Option<Bytes>, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT icon_data.data FROM icon_data
             INNER JOIN icon_info ON icon_info.icon_id = icon_data.icon_id
             WHERE icon_info.url = ?1",
        )?;
        let data: Option<Option<Vec<u8>>> = stmt.query_row(params![icon_url], |row| row.get(0)).optional()?;
        Ok(data.flatten().filter(|d| !d.is_empty()).map(Bytes::from))
    }

    /// Timestamp recorded for an icon address.
    pub fn icon_timestamp(&self, icon_url: &str) -> Result<Option<i64>, Error> {
        let mut stmt = self.conn.prepare_cached("SELECT stamp FROM icon_info WHERE url = ?1")?;
        Ok(stmt.query_row(params![icon_url], |row| row.get(0)).optional()?)
    }

    /// Whether the icon address has a row.
    pub fn contains_icon(&self, icon_url: &str) -> Result<bool, Error> {
        Ok(icon_id(&self.conn, icon_url)?.is_some())
    }

    /// Delete the given icons (and their bindings) in one transaction.
    ///
    /// Returns the number of icons that existed.
    pub fn remove_icons(&mut self, icon_urls: &[String]) -> Result<usize, Error> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for url in icon_urls {
            if remove_icon(&tx, url)? {
                removed += 1;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Number of icon rows.
    pub fn icon_count(&self) -> Result<usize, Error> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM icon_info", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete every icon and binding, then reclaim the file space.
    pub fn remove_all(&mut self) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM page_url;
             DELETE FROM icon_data;
             DELETE FROM icon_info;",
        )?;
        tx.commit()?;
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}
