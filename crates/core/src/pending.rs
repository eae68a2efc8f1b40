//! Pending-change buffers and pending-read queues.
//!
//! Both are keyed by address and keep enqueue order: re-enqueueing a key
//! moves it to the back with its newest value, so a drained batch replays
//! mutations in the order they last happened.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};

use crate::client::LoaderId;
use crate::records::{IconSnapshot, PageUrlSnapshot};

/// Snapshots waiting to be written to the store. Second lock in the order.
#[derive(Debug, Default)]
pub struct PendingSync {
    icons: IndexMap<String, IconSnapshot>,
    pages: IndexMap<String, PageUrlSnapshot>,
}

impl PendingSync {
    pub fn push_icon(&mut self, snapshot: IconSnapshot) {
        self.icons.shift_remove(&snapshot.icon_url);
        self.icons.insert(snapshot.icon_url.clone(), snapshot);
    }

    pub fn push_page(&mut self, snapshot: PageUrlSnapshot) {
        self.pages.shift_remove(&snapshot.page_url);
        self.pages.insert(snapshot.page_url.clone(), snapshot);
    }

    /// Take everything buffered, in enqueue order.
    pub fn drain(&mut self) -> (Vec<IconSnapshot>, Vec<PageUrlSnapshot>) {
        let icons = std::mem::take(&mut self.icons).into_values().collect();
        let pages = std::mem::take(&mut self.pages).into_values().collect();
        (icons, pages)
    }

    /// Put back a batch whose write failed.
    ///
    /// The failed batch goes in front; anything enqueued since supersedes it.
    pub fn restore(&mut self, icons: Vec<IconSnapshot>, pages: Vec<PageUrlSnapshot>) {
        let newer_icons = std::mem::take(&mut self.icons);
        let newer_pages = std::mem::take(&mut self.pages);
        for snapshot in icons {
            self.icons.insert(snapshot.icon_url.clone(), snapshot);
        }
        for snapshot in pages {
            self.pages.insert(snapshot.page_url.clone(), snapshot);
        }
        for (_, snapshot) in newer_icons {
            self.push_icon(snapshot);
        }
        for (_, snapshot) in newer_pages {
            self.push_page(snapshot);
        }
    }

    /// Whether any buffered snapshot mentions this icon address.
    pub fn references_icon(&self, icon_url: &str) -> bool {
        self.icons.contains_key(icon_url)
            || self
                .pages
                .values()
                .any(|page| page.icon_url.as_deref() == Some(icon_url))
    }

    /// Every icon address mentioned by a buffered snapshot.
    pub fn referenced_icons(&self) -> HashSet<String> {
        self.icons
            .keys()
            .cloned()
            .chain(self.pages.values().filter_map(|page| page.icon_url.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.icons.clear();
        self.pages.clear();
    }

    pub fn len(&self) -> usize {
        self.icons.len() + self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty() && self.pages.is_empty()
    }
}

/// Reads the sync thread still owes the foreground. Third lock in the order.
#[derive(Debug, Default)]
pub struct PendingReads {
    import_complete: bool,
    pages_pending_import: HashSet<String>,
    pages_interested_in_icons: HashSet<String>,
    icons_pending_read: IndexSet<String>,
    loaders_pending_decision: Vec<LoaderId>,
}

impl PendingReads {
    pub fn import_complete(&self) -> bool {
        self.import_complete
    }

    pub(crate) fn set_import_complete(&mut self, complete: bool) {
        self.import_complete = complete;
    }

    pub fn add_page_pending_import(&mut self, page_url: &str) {
        self.pages_pending_import.insert(page_url.to_string());
    }

    pub fn take_pages_pending_import(&mut self) -> HashSet<String> {
        std::mem::take(&mut self.pages_pending_import)
    }

    pub fn add_interested_page(&mut self, page_url: &str) {
        self.pages_interested_in_icons.insert(page_url.to_string());
    }

    pub fn is_interested(&self, page_url: &str) -> bool {
        self.pages_interested_in_icons.contains(page_url)
    }

    /// Stop tracking a page that nobody is waiting on any more.
    pub fn forget_page(&mut self, page_url: &str) {
        self.pages_pending_import.remove(page_url);
        self.pages_interested_in_icons.remove(page_url);
    }

    /// Remove and return the interested pages among `page_urls`.
    pub fn take_interested<'a>(&mut self, page_urls: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        page_urls
            .into_iter()
            .filter(|url| self.pages_interested_in_icons.remove(url.as_str()))
            .cloned()
            .collect()
    }

    pub fn add_icon_pending_read(&mut self, icon_url: &str) -> bool {
        self.icons_pending_read.insert(icon_url.to_string())
    }

    pub fn remove_icon_pending_read(&mut self, icon_url: &str) -> bool {
        self.icons_pending_read.shift_remove(icon_url)
    }

    pub fn is_icon_pending_read(&self, icon_url: &str) -> bool {
        self.icons_pending_read.contains(icon_url)
    }

    /// Up to `limit` icon addresses awaiting a read, oldest first.
    pub fn icons_to_read(&self, limit: usize) -> Vec<String> {
        self.icons_pending_read.iter().take(limit).cloned().collect()
    }

    pub fn icons_pending_read(&self) -> usize {
        self.icons_pending_read.len()
    }

    pub fn add_loader(&mut self, loader: LoaderId) {
        if !self.loaders_pending_decision.contains(&loader) {
            self.loaders_pending_decision.push(loader);
        }
    }

    pub fn take_loaders(&mut self) -> Vec<LoaderId> {
        std::mem::take(&mut self.loaders_pending_decision)
    }

    /// Forget all outstanding reads. The import flag is kept.
    pub fn clear(&mut self) {
        self.pages_pending_import.clear();
        self.pages_interested_in_icons.clear();
        self.icons_pending_read.clear();
        self.loaders_pending_decision.clear();
    }

    /// Back to the state of a database that has not been opened.
    pub(crate) fn reset(&mut self) {
        self.clear();
        self.import_complete = false;
    }
}
