//! Page address to icon bindings, and the snapshot flush that writes them.

use std::collections::HashSet;

use rusqlite::{Connection, params};

use super::connection::IconStore;
use super::icons::{get_or_add_icon_id, write_icon_snapshot};
use crate::Error;
use crate::records::{IconSnapshot, PageUrlSnapshot};

/// A persisted binding as read back during the URL import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBinding {
    pub page_url: String,
    pub icon_url: String,
    pub icon_timestamp: i64,
}

pub(crate) fn set_icon_url_for_page_url(conn: &Connection, icon_url: &str, page_url: &str) -> Result<(), Error> {
    let id = get_or_add_icon_id(conn, icon_url)?;
    conn.prepare_cached(
        "INSERT INTO page_url (url, icon_id) VALUES (?1, ?2)
         ON CONFLICT(url) DO UPDATE SET icon_id = excluded.icon_id",
    )?
    .execute(params![page_url, id])?;
    Ok(())
}

pub(crate) fn remove_page_url(conn: &Connection, page_url: &str) -> Result<(), Error> {
    conn.prepare_cached("DELETE FROM page_url WHERE url = ?1")?.execute(params![page_url])?;
    Ok(())
}

impl IconStore {
    /// Apply one cycle's worth of snapshots in a single transaction.
    ///
    /// Icons are written before pages, each list in the order given. Nothing is
    /// committed if any statement fails.
    pub fn write_snapshots(&mut self, icons: &[IconSnapshot], pages: &[PageUrlSnapshot]) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        for icon in icons {
            write_icon_snapshot(&tx, icon)?;
        }
        for page in pages {
            match &page.icon_url {
                Some(icon_url) => set_icon_url_for_page_url(&tx, icon_url, &page.page_url)?,
                None => remove_page_url(&tx, &page.page_url)?,
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Every binding whose icon row exists, with the icon's timestamp.
    pub fn page_bindings(&self) -> Result<Vec<PageBinding>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT page_url.url, icon_info.url, icon_info.stamp
             FROM page_url INNER JOIN icon_info ON page_url.icon_id = icon_info.icon_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PageBinding { page_url: row.get(0)?, icon_url: row.get(1)?, icon_timestamp: row.get(2)? })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Error::from)
    }

    /// Icon address bound to a page, if any.
    pub fn icon_url_for_page_url(&self, page_url: &str) -> Result<Option<String>, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT icon_info.url FROM page_url
             INNER JOIN icon_info ON page_url.icon_id = icon_info.icon_id
             WHERE page_url.url = ?1",
        )?;
        let mut rows = stmt.query(params![page_url])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Number of page bindings.
    pub fn page_count(&self) -> Result<usize, Error> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM page_url", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count bindings that point at no icon row, deleting them when `prune` is set.
    pub fn dangling_page_urls(&mut self, prune: bool) -> Result<usize, Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM page_url WHERE icon_id NOT IN (SELECT icon_id FROM icon_info)",
            [],
            |row| row.get(0),
        )?;
        if count > 0 && prune {
            self.conn
                .execute("DELETE FROM page_url WHERE icon_id NOT IN (SELECT icon_id FROM icon_info)", [])?;
        }
        Ok(count as usize)
    }

    /// Delete bindings for pages outside `keep_pages`, then icons left without
    /// bindings that are not in `keep_icons`.
    ///
    /// Returns (pages removed, icons removed).
    pub fn prune_unretained(
        &mut self, keep_pages: &HashSet<String>, keep_icons: &HashSet<String>,
    ) -> Result<(usize, usize), Error> {
        let tx = self.conn.transaction()?;

        let page_urls: Vec<String> = {
            let mut stmt = tx.prepare("SELECT url FROM page_url")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let mut pages_removed = 0;
        for url in page_urls.iter().filter(|url| !keep_pages.contains(*url)) {
            remove_page_url(&tx, url)?;
            pages_removed += 1;
        }

        let orphan_icons: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT url FROM icon_info WHERE icon_id NOT IN (SELECT DISTINCT icon_id FROM page_url)",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let mut icons_removed = 0;
        for url in orphan_icons.iter().filter(|url| !keep_icons.contains(*url)) {
            super::icons::remove_icon(&tx, url)?;
            icons_removed += 1;
        }

        tx.commit()?;
        Ok((pages_removed, icons_removed))
    }
}
