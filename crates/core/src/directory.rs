//! In-memory directory: icon records, page records and the retained set.
//!
//! The directory is the foreground's source of truth. It lives behind the
//! first lock in the fixed order directory → pending-sync → pending-read.
//! Pages refer to icons by address; the bind/unbind helpers keep each icon's
//! page set in step so a page never points at an icon that is not here.

use std::collections::{HashMap, HashSet};

use crate::records::{IconRecord, PageRecord};

/// Outcome of [`Directory::release_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRelease {
    /// The page was unknown or not retained; nothing changed.
    NotRetained,
    StillRetained,
    /// The last retain went away. Holds the unbound record that was removed.
    Dropped(PageRecord),
}

#[derive(Debug)]
pub struct Directory<I> {
    icons: HashMap<String, IconRecord<I>>,
    pages: HashMap<String, PageRecord>,
    retained: HashSet<String>,
}

impl<I> Default for Directory<I> {
    fn default() -> Self {
        Self { icons: HashMap::new(), pages: HashMap::new(), retained: HashSet::new() }
    }
}

impl<I> Directory<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn icon(&self, icon_url: &str) -> Option<&IconRecord<I>> {
        self.icons.get(icon_url)
    }

    pub fn icon_mut(&mut self, icon_url: &str) -> Option<&mut IconRecord<I>> {
        self.icons.get_mut(icon_url)
    }

    pub fn get_or_create_icon(&mut self, icon_url: &str) -> &mut IconRecord<I> {
        self.icons
            .entry(icon_url.to_string())
            .or_insert_with(|| IconRecord::new(icon_url))
    }

    pub fn page(&self, page_url: &str) -> Option<&PageRecord> {
        self.pages.get(page_url)
    }

    pub fn get_or_create_page(&mut self, page_url: &str) -> &mut PageRecord {
        self.pages
            .entry(page_url.to_string())
            .or_insert_with(|| PageRecord::new(page_url))
    }

    /// Icon address bound to a page, if both are known.
    pub fn icon_url_for_page(&self, page_url: &str) -> Option<&str> {
        self.pages.get(page_url).and_then(PageRecord::icon_url)
    }

    /// Bind a page to an icon, creating either record as needed.
    ///
    /// Returns the previously bound icon address, if it differs.
    pub fn bind(&mut self, page_url: &str, icon_url: &str) -> Option<String> {
        let previous = self.get_or_create_page(page_url).icon_url().map(str::to_string);
        if previous.as_deref() == Some(icon_url) {
            return None;
        }
        if let Some(old) = previous.as_deref() {
            if let Some(icon) = self.icons.get_mut(old) {
                icon.remove_page_url(page_url);
            }
        }
        self.get_or_create_icon(icon_url).add_page_url(page_url);
        if let Some(page) = self.pages.get_mut(page_url) {
            page.set_icon_url(Some(icon_url.to_string()));
        }
        previous
    }

    /// Clear a page's binding, keeping the page record.
    pub fn unbind(&mut self, page_url: &str) -> Option<String> {
        let page = self.pages.get_mut(page_url)?;
        let previous = page.icon_url().map(str::to_string);
        page.set_icon_url(None);
        if let Some(old) = previous.as_deref() {
            if let Some(icon) = self.icons.get_mut(old) {
                icon.remove_page_url(page_url);
            }
        }
        previous
    }

    /// Drop a page record entirely, unbinding it first.
    pub fn remove_page(&mut self, page_url: &str) -> Option<PageRecord> {
        self.unbind(page_url);
        self.retained.remove(page_url);
        self.pages.remove(page_url)
    }

    /// Drop an icon record and clear every page bound to it.
    pub fn remove_icon(&mut self, icon_url: &str) -> Option<IconRecord<I>> {
        let icon = self.icons.remove(icon_url)?;
        for page_url in icon.page_urls() {
            if let Some(page) = self.pages.get_mut(page_url) {
                page.set_icon_url(None);
            }
        }
        Some(icon)
    }

    /// Increment a page's retain count. Returns true on the first retain.
    pub fn retain_page(&mut self, page_url: &str) -> bool {
        let first = self.get_or_create_page(page_url).retain();
        if first {
            self.retained.insert(page_url.to_string());
        }
        first
    }

    /// Decrement a page's retain count.
    ///
    /// A page whose count reaches zero is unbound and dropped, which leaves
    /// its icon for the next prune if no other page holds it.
    pub fn release_page(&mut self, page_url: &str) -> PageRelease {
        let Some(page) = self.pages.get_mut(page_url) else {
            return PageRelease::NotRetained;
        };
        if page.retain_count() == 0 {
            return PageRelease::NotRetained;
        }
        if !page.release() {
            return PageRelease::StillRetained;
        }
        match self.remove_page(page_url) {
            Some(page) => PageRelease::Dropped(page),
            None => PageRelease::NotRetained,
        }
    }

    pub fn is_retained(&self, page_url: &str) -> bool {
        self.retained.contains(page_url)
    }

    pub fn retained(&self) -> &HashSet<String> {
        &self.retained
    }

    pub fn icons(&self) -> impl Iterator<Item = &IconRecord<I>> {
        self.icons.values()
    }

    pub fn pages(&self) -> impl Iterator<Item = &PageRecord> {
        self.pages.values()
    }

    /// Icon addresses with no page bound to them.
    pub fn orphan_icon_urls(&self) -> Vec<String> {
        self.icons
            .values()
            .filter(|icon| icon.page_urls().is_empty())
            .map(|icon| icon.icon_url().to_string())
            .collect()
    }

    /// Pages whose bound icon has no record.
    pub fn dangling_page_urls(&self) -> Vec<String> {
        self.pages
            .values()
            .filter(|page| page.icon_url().is_some_and(|url| !self.icons.contains_key(url)))
            .map(|page| page.page_url().to_string())
            .collect()
    }

    /// Give a dangling page a fresh icon record so the icon gets read or refetched.
    pub fn repair_dangling_page(&mut self, page_url: &str) -> bool {
        let Some(icon_url) = self.icon_url_for_page(page_url).map(str::to_string) else {
            return false;
        };
        if self.icons.contains_key(&icon_url) {
            return false;
        }
        self.get_or_create_icon(&icon_url).add_page_url(page_url);
        true
    }

    /// Drop every icon and binding. Retained pages keep their records and
    /// counts; everything else is removed.
    pub fn clear_icons(&mut self) {
        self.icons.clear();
        let retained = &self.retained;
        self.pages.retain(|url, _| retained.contains(url));
        for page in self.pages.values_mut() {
            page.set_icon_url(None);
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn icon_count(&self) -> usize {
        self.icons.len()
    }

    pub fn icon_with_data_count(&self) -> usize {
        self.icons.values().filter(|icon| icon.data().is_some()).count()
    }
}
