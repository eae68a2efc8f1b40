//! Transactional sink the legacy import writes through.

use bytes::Bytes;
use rusqlite::Transaction;

use super::connection::IconStore;
use super::icons::{icon_id, write_icon_snapshot};
use super::info::set_imported_on;
use super::pages::set_icon_url_for_page_url;
use crate::Error;
use crate::records::IconSnapshot;

/// Write access handed to a legacy importer on the sync thread.
///
/// Everything goes into one transaction that commits only if the import
/// succeeds, together with the completion flag.
pub struct ImportSink<'a> {
    tx: Transaction<'a>,
    timestamp: i64,
    pages: usize,
    icons: usize,
}

impl ImportSink<'_> {
    /// Record a page binding. Empty addresses are skipped.
    pub fn import_icon_url_for_page_url(&mut self, icon_url: &str, page_url: &str) -> Result<(), Error> {
        if icon_url.is_empty() || page_url.is_empty() {
            return Ok(());
        }
        set_icon_url_for_page_url(&self.tx, icon_url, page_url)?;
        self.pages += 1;
        Ok(())
    }

    /// Record icon bytes. Icons that already have a row keep their current data.
    pub fn import_icon_data_for_icon_url(&mut self, data: Option<Bytes>, icon_url: &str) -> Result<(), Error> {
        if icon_url.is_empty() {
            return Ok(());
        }
        if let Some(id) = icon_id(&self.tx, icon_url)? {
            let has_data: bool = self.tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM icon_data WHERE icon_id = ?1 AND data IS NOT NULL)",
                [id],
                |row| row.get(0),
            )?;
            if has_data {
                return Ok(());
            }
        }
        let snapshot = IconSnapshot { icon_url: icon_url.to_string(), timestamp: self.timestamp, data };
        write_icon_snapshot(&self.tx, &snapshot)?;
        self.icons += 1;
        Ok(())
    }

    /// (page bindings, icons) written so far.
    pub fn counts(&self) -> (usize, usize) {
        (self.pages, self.icons)
    }

    /// Commit the import and mark it complete.
    pub(crate) fn commit(self) -> Result<(usize, usize), Error> {
        set_imported_on(&self.tx, true)?;
        self.tx.commit()?;
        Ok((self.pages, self.icons))
    }
}

impl IconStore {
    /// Begin an import transaction. Dropping the sink without committing rolls back.
    pub fn begin_import(&mut self, timestamp: i64) -> Result<ImportSink<'_>, Error> {
        let tx = self.conn.transaction()?;
        Ok(ImportSink { tx, timestamp, pages: 0, icons: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_commits_with_flag() {
        let mut store = IconStore::open_in_memory().unwrap();
        let mut sink = store.begin_import(1_000).unwrap();
        sink.import_icon_url_for_page_url("icon://a", "page://x").unwrap();
        sink.import_icon_data_for_icon_url(Some(Bytes::from_static(b"a")), "icon://a")
            .unwrap();
        assert_eq!(sink.commit().unwrap(), (1, 1));

        assert!(store.imported().unwrap());
        assert_eq!(store.icon_data("icon://a").unwrap(), Some(Bytes::from_static(b"a")));
        assert_eq!(store.icon_timestamp("icon://a").unwrap(), Some(1_000));
    }

    #[test]
    fn test_dropped_import_rolls_back() {
        let mut store = IconStore::open_in_memory().unwrap();
        {
            let mut sink = store.begin_import(1_000).unwrap();
            sink.import_icon_url_for_page_url("icon://a", "page://x").unwrap();
        }

        assert!(!store.imported().unwrap());
        assert_eq!(store.page_count().unwrap(), 0);
    }

    #[test]
    fn test_import_does_not_clobber_existing_data() {
        let mut store = IconStore::open_in_memory().unwrap();
        let existing = IconSnapshot { icon_url: "icon://a".into(), timestamp: 5, data: Some(Bytes::from_static(b"new")) };
        store.write_snapshots(&[existing], &[]).unwrap();

        let mut sink = store.begin_import(1).unwrap();
        sink.import_icon_data_for_icon_url(Some(Bytes::from_static(b"legacy")), "icon://a")
            .unwrap();
        sink.commit().unwrap();

        assert_eq!(store.icon_data("icon://a").unwrap(), Some(Bytes::from_static(b"new")));
    }
}
