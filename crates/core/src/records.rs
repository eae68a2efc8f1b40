//! In-memory icon and page records, and the snapshots handed to the sync thread.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;

use crate::decoder::IconSize;

/// What is known about an icon's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageDataStatus {
    /// Not read from the store yet.
    Unknown,
    /// Known to have no data (never fetched, or explicitly marked as missing).
    Missing,
    Present(Bytes),
}

/// An icon address, its bytes, and the pages bound to it.
#[derive(Debug)]
pub struct IconRecord<I> {
    icon_url: String,
    status: ImageDataStatus,
    timestamp: i64,
    page_urls: HashSet<String>,
    images: HashMap<IconSize, Arc<I>>,
}

impl<I> IconRecord<I> {
    pub fn new(icon_url: impl Into<String>) -> Self {
        Self {
            icon_url: icon_url.into(),
            status: ImageDataStatus::Unknown,
            timestamp: 0,
            page_urls: HashSet::new(),
            images: HashMap::new(),
        }
    }

    pub fn icon_url(&self) -> &str {
        &self.icon_url
    }

    pub fn status(&self) -> &ImageDataStatus {
        &self.status
    }

    pub fn data(&self) -> Option<&Bytes> {
        match &self.status {
            ImageDataStatus::Present(data) => Some(data),
            _ => None,
        }
    }

    /// Whether a read from the store is still outstanding.
    pub fn is_pending_read(&self) -> bool {
        self.status == ImageDataStatus::Unknown
    }

    /// Replace the icon bytes. Empty or absent data marks the icon as missing.
    pub fn set_image_data(&mut self, data: Option<Bytes>) {
        self.status = match data {
            Some(data) if !data.is_empty() => ImageDataStatus::Present(data),
            _ => ImageDataStatus::Missing,
        };
        self.images.clear();
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn page_urls(&self) -> &HashSet<String> {
        &self.page_urls
    }

    pub(crate) fn add_page_url(&mut self, page_url: &str) {
        self.page_urls.insert(page_url.to_string());
    }

    pub(crate) fn remove_page_url(&mut self, page_url: &str) {
        self.page_urls.remove(page_url);
    }

    pub fn cached_image(&self, size: IconSize) -> Option<Arc<I>> {
        self.images.get(&size).cloned()
    }

    pub(crate) fn cache_image(&mut self, size: IconSize, image: Arc<I>) {
        self.images.insert(size, image);
    }

    /// Persistable copy of the current state.
    pub fn snapshot(&self) -> IconSnapshot {
        IconSnapshot { icon_url: self.icon_url.clone(), timestamp: self.timestamp, data: self.data().cloned() }
    }
}

/// A page address, the icon it is bound to, and its retain count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    page_url: String,
    icon_url: Option<String>,
    retain_count: u32,
}

impl PageRecord {
    pub fn new(page_url: impl Into<String>) -> Self {
        Self { page_url: page_url.into(), icon_url: None, retain_count: 0 }
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn icon_url(&self) -> Option<&str> {
        self.icon_url.as_deref()
    }

    pub(crate) fn set_icon_url(&mut self, icon_url: Option<String>) {
        self.icon_url = icon_url;
    }

    pub fn retain_count(&self) -> u32 {
        self.retain_count
    }

    /// Returns true when this was the first retain.
    pub(crate) fn retain(&mut self) -> bool {
        self.retain_count += 1;
        self.retain_count == 1
    }

    /// Returns true when this release dropped the count to zero.
    ///
    /// Releasing an unretained page is ignored.
    pub(crate) fn release(&mut self) -> bool {
        if self.retain_count == 0 {
            return false;
        }
        self.retain_count -= 1;
        self.retain_count == 0
    }

    pub fn snapshot(&self) -> PageUrlSnapshot {
        PageUrlSnapshot { page_url: self.page_url.clone(), icon_url: self.icon_url.clone() }
    }
}

/// Immutable copy of an icon's persistable fields.
///
/// A zero timestamp with no data means "delete this icon".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconSnapshot {
    pub icon_url: String,
    pub timestamp: i64,
    pub data: Option<Bytes>,
}

impl IconSnapshot {
    pub fn deletion(icon_url: impl Into<String>) -> Self {
        Self { icon_url: icon_url.into(), timestamp: 0, data: None }
    }

    pub fn is_deletion(&self) -> bool {
        self.timestamp == 0 && self.data.is_none()
    }
}

/// Immutable copy of a page binding. No icon address means "delete this binding".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrlSnapshot {
    pub page_url: String,
    pub icon_url: Option<String>,
}

impl PageUrlSnapshot {
    pub fn is_deletion(&self) -> bool {
        self.icon_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_icon_is_pending_read() {
        let icon: IconRecord<()> = IconRecord::new("https://example.com/favicon.ico");
        assert!(icon.is_pending_read());
        assert!(icon.data().is_none());
    }

    #[test]
    fn test_empty_data_marks_missing() {
        let mut icon: IconRecord<()> = IconRecord::new("icon://a");
        icon.set_image_data(Some(Bytes::new()));
        assert_eq!(icon.status(), &ImageDataStatus::Missing);
    }

    #[test]
    fn test_set_data_clears_image_cache() {
        let mut icon: IconRecord<u8> = IconRecord::new("icon://a");
        icon.set_image_data(Some(Bytes::from_static(b"one")));
        icon.cache_image(IconSize::new(16, 16), Arc::new(1));
        assert!(icon.cached_image(IconSize::new(16, 16)).is_some());

        icon.set_image_data(Some(Bytes::from_static(b"two")));
        assert!(icon.cached_image(IconSize::new(16, 16)).is_none());
    }

    #[test]
    fn test_retain_release_counts() {
        let mut page = PageRecord::new("page://x");
        assert!(page.retain());
        assert!(!page.retain());
        assert!(!page.release());
        assert!(page.release());
        assert!(!page.release());
        assert_eq!(page.retain_count(), 0);
    }

    #[test]
    fn test_snapshot_deletion_markers() {
        assert!(IconSnapshot::deletion("icon://a").is_deletion());
        let missing = IconSnapshot { icon_url: "icon://a".into(), timestamp: 10, data: None };
        assert!(!missing.is_deletion());

        let page = PageRecord::new("page://x");
        assert!(page.snapshot().is_deletion());
    }
}
