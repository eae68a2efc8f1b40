//! The icon database facade.
//!
//! [`IconDatabase`] is the only entry point collaborators use. Every call
//! touches the in-memory directory and pending partitions under their locks
//! and returns without waiting on disk; the sync thread started by
//! [`IconDatabase::open`] does all store I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use crate::client::{IconDatabaseClient, IconLoadDecision, LoaderId};
use crate::config::IconDatabaseConfig;
use crate::decoder::{IconDecoder, IconSize, RawIconDecoder};
use crate::directory::PageRelease;
use crate::import::{JsonLegacyImporter, LegacyImporter};
use crate::records::ImageDataStatus;
use crate::sync::{Shared, SyncSettings, SyncState, SyncWorker};

const SYNC_THREAD_NAME: &str = "icon-database-sync";

/// Counters describing the in-memory state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IconDatabaseStats {
    pub page_url_mappings: usize,
    pub retained_pages: usize,
    pub icon_records: usize,
    pub icon_records_with_data: usize,
    pub pending_sync: usize,
    pub pending_reads: usize,
}

struct Worker {
    handle: JoinHandle<()>,
    path: PathBuf,
}

struct DefaultIcon<I> {
    data: Option<Bytes>,
    images: HashMap<IconSize, Arc<I>>,
}

/// Concurrent, disk-backed map from page addresses to site icons.
pub struct IconDatabase<D: IconDecoder = RawIconDecoder> {
    shared: Arc<Shared<D::Image>>,
    decoder: D,
    config: IconDatabaseConfig,
    enabled: AtomicBool,
    closing: AtomicBool,
    integrity_check_requested: AtomicBool,
    worker: Mutex<Option<Worker>>,
    default_icon: Mutex<DefaultIcon<D::Image>>,
}

impl IconDatabase<RawIconDecoder> {
    /// Database whose images are the raw stored bytes.
    pub fn new(config: IconDatabaseConfig) -> Self {
        Self::with_decoder(config, RawIconDecoder)
    }
}

impl<D: IconDecoder> IconDatabase<D> {
    pub fn with_decoder(config: IconDatabaseConfig, decoder: D) -> Self {
        let shared = Arc::new(Shared::new());
        if let Some(path) = &config.legacy_import_path {
            shared.set_importer(Some(Arc::new(JsonLegacyImporter::new(path))));
        }
        let enabled = AtomicBool::new(config.enabled);
        Self {
            shared,
            decoder,
            config,
            enabled,
            closing: AtomicBool::new(false),
            integrity_check_requested: AtomicBool::new(false),
            worker: Mutex::new(None),
            default_icon: Mutex::new(DefaultIcon { data: None, images: HashMap::new() }),
        }
    }

    pub fn config(&self) -> &IconDatabaseConfig {
        &self.config
    }

    /// Open the store in `directory` and start the sync thread.
    ///
    /// Returns false without side effects when the database is disabled,
    /// already open, still closing, or `directory` is not usable. The store
    /// itself is opened on the sync thread; if that fails the session runs
    /// from memory only.
    pub fn open(&self, directory: impl AsRef<Path>) -> bool {
        let directory = directory.as_ref();
        if !self.is_enabled() {
            tracing::warn!("Attempted to open a disabled icon database");
            return false;
        }
        if directory.as_os_str().is_empty() || (directory.exists() && !directory.is_dir()) {
            tracing::warn!(path = %directory.display(), "Invalid icon database directory");
            return false;
        }

        let mut worker = self.worker.lock();
        if self.closing.load(Ordering::Acquire) {
            tracing::warn!("Icon database is still closing");
            return false;
        }
        if worker.is_some() {
            tracing::warn!("Icon database is already open");
            return false;
        }

        self.shared.signal.reset();
        self.shared.pending_reads.lock().reset();

        let path = directory.join(&self.config.database_filename);
        let settings = SyncSettings {
            path: path.clone(),
            check_integrity: self.config.check_integrity_on_open
                || self.integrity_check_requested.swap(false, Ordering::AcqRel),
            read_batch_size: self.config.read_batch_size,
            prune_unretained_on_open: self.config.prune_unretained_on_open,
            prune_dangling_pages: self.config.prune_dangling_pages,
        };
        let sync = SyncWorker::new(Arc::clone(&self.shared), settings);

        let handle = match thread::Builder::new().name(SYNC_THREAD_NAME.into()).spawn(move || sync.run()) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn icon database sync thread");
                return false;
            }
        };

        self.shared.open.store(true, Ordering::Release);
        tracing::info!(path = %path.display(), "Opened icon database");
        *worker = Some(Worker { handle, path });
        true
    }

    /// Flush pending work, stop the sync thread and wait for it to exit.
    ///
    /// Idempotent. Retained pages (and their counts) survive a close; every
    /// other record is dropped.
    pub fn close(&self) {
        let worker = {
            let mut guard = self.worker.lock();
            let worker = guard.take();
            if worker.is_some() {
                self.closing.store(true, Ordering::Release);
                self.shared.open.store(false, Ordering::Release);
            }
            worker
        };
        let Some(worker) = worker else {
            return;
        };

        self.shared.signal.request_terminate();
        if worker.handle.join().is_err() {
            tracing::error!("Icon database sync thread panicked");
        }

        self.shared.directory.lock().clear_icons();
        self.shared.pending_sync.lock().clear();
        self.shared.pending_reads.lock().reset();
        self.closing.store(false, Ordering::Release);
        tracing::info!(path = %worker.path.display(), "Closed icon database");
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Path of the store file while open.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.worker.lock().as_ref().map(|worker| worker.path.clone())
    }

    pub fn sync_state(&self) -> SyncState {
        self.shared.signal.state()
    }

    /// Wake the sync thread and wait for a full cycle to complete.
    ///
    /// Returns false if the database is closed, the thread stopped, or
    /// `timeout` elapsed first.
    pub fn sync_now(&self, timeout: Duration) -> bool {
        self.is_open() && self.shared.signal.sync_now(timeout)
    }

    /// Best-known icon for a page at `size`.
    ///
    /// Returns the default icon when nothing is known about the page, and
    /// `None` when the bytes are still on disk (a read is queued and the
    /// client is told via `did_add_icon_for_page_url`). A 0×0 size only
    /// queues the read. With `cache` set the decoded image is kept for reuse.
    pub fn icon_for_page_url(&self, page_url: &str, size: IconSize, cache: bool) -> Option<Arc<D::Image>> {
        if !self.is_open() || page_url.is_empty() {
            return self.default_icon(size);
        }

        let mut directory = self.shared.directory.lock();
        let Some(icon_url) = directory.icon_url_for_page(page_url).map(str::to_string) else {
            let mut reads = self.shared.pending_reads.lock();
            if reads.import_complete() {
                drop(reads);
                drop(directory);
                return self.default_icon(size);
            }
            directory.get_or_create_page(page_url);
            reads.add_page_pending_import(page_url);
            return None;
        };

        let Some(icon) = directory.icon_mut(&icon_url) else {
            drop(directory);
            return self.default_icon(size);
        };
        match icon.status().clone() {
            ImageDataStatus::Unknown => {
                let mut reads = self.shared.pending_reads.lock();
                reads.add_icon_pending_read(&icon_url);
                reads.add_interested_page(page_url);
                drop(reads);
                drop(directory);
                self.shared.signal.wake_now();
                None
            }
            ImageDataStatus::Missing => {
                drop(directory);
                self.default_icon(size)
            }
            ImageDataStatus::Present(data) => {
                if size.is_empty() {
                    return None;
                }
                if let Some(image) = icon.cached_image(size) {
                    return Some(image);
                }
                drop(directory);

                let image = Arc::new(self.decoder.decode(&data, size)?);
                if cache {
                    let mut directory = self.shared.directory.lock();
                    // Skip the cache if the bytes changed while decoding.
                    if let Some(icon) = directory.icon_mut(&icon_url).filter(|icon| icon.data() == Some(&data)) {
                        icon.cache_image(size, Arc::clone(&image));
                    }
                }
                Some(image)
            }
        }
    }

    /// Queue a store read for the page's icon without producing an image.
    pub fn read_icon_for_page_url_from_disk(&self, page_url: &str) {
        self.icon_for_page_url(page_url, IconSize::new(0, 0), false);
    }

    pub fn icon_url_for_page_url(&self, page_url: &str) -> Option<String> {
        if !self.is_open() || page_url.is_empty() {
            return None;
        }
        self.shared.directory.lock().icon_url_for_page(page_url).map(str::to_string)
    }

    /// Icon shown when a page has none, decoded from the bytes set with
    /// [`set_default_icon_data`](Self::set_default_icon_data).
    pub fn default_icon(&self, size: IconSize) -> Option<Arc<D::Image>> {
        if size.is_empty() {
            return None;
        }
        let mut default_icon = self.default_icon.lock();
        if let Some(image) = default_icon.images.get(&size) {
            return Some(Arc::clone(image));
        }
        let data = default_icon.data.as_ref()?;
        let image = Arc::new(self.decoder.decode(data, size)?);
        default_icon.images.insert(size, Arc::clone(&image));
        Some(image)
    }

    pub fn set_default_icon_data(&self, data: Option<Bytes>) {
        let mut default_icon = self.default_icon.lock();
        default_icon.data = data.filter(|data| !data.is_empty());
        default_icon.images.clear();
    }

    pub fn retain_icon_for_page_url(&self, page_url: &str) {
        if !self.is_enabled() || page_url.is_empty() {
            return;
        }
        if self.shared.directory.lock().retain_page(page_url) {
            tracing::debug!(page_url, "Retained page");
        }
    }

    /// Undo one retain. Releasing a page that is not retained is ignored.
    ///
    /// The last release drops the page and its binding, so its icon is pruned
    /// on the next cycle unless another page still uses it.
    pub fn release_icon_for_page_url(&self, page_url: &str) {
        if !self.is_enabled() || page_url.is_empty() {
            return;
        }

        let mut directory = self.shared.directory.lock();
        let page = match directory.release_page(page_url) {
            PageRelease::NotRetained => {
                drop(directory);
                tracing::warn!(page_url, "Released icon for a page that was not retained");
                return;
            }
            PageRelease::StillRetained => return,
            PageRelease::Dropped(page) => page,
        };
        if !self.shared.is_private_browsing() {
            self.shared.pending_sync.lock().push_page(page.snapshot());
        }
        drop(directory);
        self.shared.pending_reads.lock().forget_page(page_url);

        tracing::debug!(page_url, "Page no longer retained");
        self.schedule_sync();
    }

    /// Set (or, with `None`, mark as missing) the bytes for an icon.
    pub fn set_icon_data_for_icon_url(&self, data: Option<Bytes>, icon_url: &str) {
        if !self.is_open() || icon_url.is_empty() {
            return;
        }

        let ready_pages = {
            let mut directory = self.shared.directory.lock();
            let icon = directory.get_or_create_icon(icon_url);
            icon.set_image_data(data);
            icon.set_timestamp(chrono::Utc::now().timestamp());
            let snapshot = icon.snapshot();
            let has_data = icon.data().is_some();
            let pages: Vec<String> = icon.page_urls().iter().cloned().collect();

            if !self.shared.is_private_browsing() {
                self.shared.pending_sync.lock().push_icon(snapshot);
            }

            let mut reads = self.shared.pending_reads.lock();
            reads.remove_icon_pending_read(icon_url);
            reads.take_interested(&pages);
            if has_data { pages } else { Vec::new() }
        };

        let client = self.shared.client();
        for page_url in &ready_pages {
            client.did_add_icon_for_page_url(page_url);
        }
        self.schedule_sync();
    }

    /// Bind a page to an icon address.
    pub fn set_icon_url_for_page_url(&self, icon_url: &str, page_url: &str) {
        if !self.is_open() || icon_url.is_empty() || page_url.is_empty() {
            return;
        }

        let (ready, read_queued) = {
            let mut directory = self.shared.directory.lock();
            if directory.icon_url_for_page(page_url) == Some(icon_url) {
                return;
            }
            directory.bind(page_url, icon_url);
            let (pending_read, has_data) = directory
                .icon(icon_url)
                .map_or((false, false), |icon| (icon.is_pending_read(), icon.data().is_some()));

            if !self.shared.is_private_browsing() {
                if let Some(page) = directory.page(page_url) {
                    self.shared.pending_sync.lock().push_page(page.snapshot());
                }
            }

            let mut reads = self.shared.pending_reads.lock();
            let interested = reads.is_interested(page_url);
            let read_queued = interested && pending_read && reads.add_icon_pending_read(icon_url);
            let ready = interested && has_data;
            if ready {
                reads.forget_page(page_url);
            }
            (ready, read_queued)
        };

        if ready {
            self.shared.client().did_add_icon_for_page_url(page_url);
        }
        if read_queued {
            self.shared.signal.wake_now();
        } else {
            self.schedule_sync();
        }
    }

    /// Should the loader identified by `loader` fetch this icon?
    ///
    /// Before the import finishes an unknown icon yields `Unknown` and the
    /// loader is told to ask again via `did_resolve_load_decisions`.
    pub fn load_decision_for_icon_url(&self, icon_url: &str, loader: LoaderId) -> IconLoadDecision {
        if !self.is_open() || icon_url.is_empty() {
            return IconLoadDecision::No;
        }

        let directory = self.shared.directory.lock();
        if let Some(timestamp) = directory.icon(icon_url).map(|icon| icon.timestamp()).filter(|ts| *ts > 0) {
            let age = chrono::Utc::now().timestamp().saturating_sub(timestamp);
            return if age > self.config.icon_expiration() { IconLoadDecision::Yes } else { IconLoadDecision::No };
        }

        let mut reads = self.shared.pending_reads.lock();
        if reads.import_complete() {
            return IconLoadDecision::Yes;
        }
        reads.add_loader(loader);
        IconLoadDecision::Unknown
    }

    /// Whether the icon's bytes (or their absence) are known in memory.
    pub fn icon_data_known_for_icon_url(&self, icon_url: &str) -> bool {
        if !self.is_open() || icon_url.is_empty() {
            return false;
        }
        self.shared
            .directory
            .lock()
            .icon(icon_url)
            .is_some_and(|icon| !icon.is_pending_read())
    }

    /// Disabling closes the database. Enabling does not reopen it.
    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, Ordering::AcqRel);
        if was_enabled && !enabled {
            self.close();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// While enabled, mutations update memory but are never written to the store.
    pub fn set_private_browsing_enabled(&self, enabled: bool) {
        let was_enabled = self.shared.private_browsing.swap(enabled, Ordering::AcqRel);
        if was_enabled != enabled {
            tracing::info!(enabled, "Private browsing changed");
            self.shared.client().did_change_private_browsing(enabled);
        }
    }

    pub fn is_private_browsing_enabled(&self) -> bool {
        self.shared.is_private_browsing()
    }

    /// Forget every icon now and wipe the store on the next allowed cycle.
    pub fn remove_all_icons(&self) {
        if !self.is_open() {
            return;
        }
        {
            let mut directory = self.shared.directory.lock();
            directory.clear_icons();
            // Raised under the buffer lock so the sync thread never drains a
            // change made after this call ahead of the wipe.
            let mut pending = self.shared.pending_sync.lock();
            pending.clear();
            self.shared.signal.request_remove_all();
        }
        self.shared.pending_reads.lock().clear();
        tracing::info!("Removing all icons");
    }

    /// Defer pruning and remove-all until a matching
    /// [`allow_database_cleanup`](Self::allow_database_cleanup). Nests.
    pub fn delay_database_cleanup(&self) {
        self.shared.delay_cleanup();
    }

    pub fn allow_database_cleanup(&self) {
        match self.shared.allow_cleanup() {
            None => tracing::warn!("allow_database_cleanup called without a matching delay"),
            Some(0) if self.is_open() => self.shared.signal.wake_now(),
            Some(_) => {}
        }
    }

    /// Run a full integrity check the next time the store is opened.
    pub fn check_integrity_before_opening(&self) {
        self.integrity_check_requested.store(true, Ordering::Release);
    }

    pub fn set_client(&self, client: Arc<dyn IconDatabaseClient>) {
        self.shared.set_client(client);
    }

    /// Replace the legacy importer. Takes effect on the next open.
    pub fn set_legacy_importer(&self, importer: Option<Arc<dyn LegacyImporter>>) {
        self.shared.set_importer(importer);
    }

    pub fn stats(&self) -> IconDatabaseStats {
        let (page_url_mappings, retained_pages, icon_records, icon_records_with_data) = {
            let directory = self.shared.directory.lock();
            (
                directory.pages().filter(|page| page.icon_url().is_some()).count(),
                directory.retained().len(),
                directory.icon_count(),
                directory.icon_with_data_count(),
            )
        };
        let pending_sync = self.shared.pending_sync.lock().len();
        let pending_reads = self.shared.pending_reads.lock().icons_pending_read();
        IconDatabaseStats {
            page_url_mappings,
            retained_pages,
            icon_records,
            icon_records_with_data,
            pending_sync,
            pending_reads,
        }
    }

    /// Restart the deferred sync timer, or wake the thread right away when
    /// the pending-change buffer has grown past its soft limit.
    fn schedule_sync(&self) {
        if self.shared.pending_sync.lock().len() > self.config.pending_sync_soft_limit {
            self.shared.signal.wake_now();
        } else {
            self.shared.signal.schedule(self.config.sync_delay());
        }
    }
}

impl<D: IconDecoder> Drop for IconDatabase<D> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<D: IconDecoder + std::fmt::Debug> std::fmt::Debug for IconDatabase<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IconDatabase")
            .field("decoder", &self.decoder)
            .field("open", &self.is_open())
            .field("enabled", &self.is_enabled())
            .field("state", &self.sync_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawIcon;
    use crate::records::PageUrlSnapshot;
    use crate::store::{IconStore, ImportSink};
    use std::sync::{OnceLock, Weak, mpsc};

    const WAIT: Duration = Duration::from_secs(10);
    const SIZE: IconSize = IconSize::new(16, 16);

    #[derive(Default)]
    struct RecordingClient {
        events: Mutex<Vec<String>>,
        loaders: Mutex<Vec<LoaderId>>,
    }

    impl RecordingClient {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl IconDatabaseClient for RecordingClient {
        fn did_import_icon_urls(&self) {
            self.events.lock().push("import".into());
        }

        fn did_resolve_load_decisions(&self, loaders: &[LoaderId]) {
            self.loaders.lock().extend_from_slice(loaders);
        }

        fn did_add_icon_for_page_url(&self, page_url: &str) {
            self.events.lock().push(format!("icon:{page_url}"));
        }

        fn did_remove_all_icons(&self) {
            self.events.lock().push("remove_all".into());
        }

        fn did_change_private_browsing(&self, enabled: bool) {
            self.events.lock().push(format!("private:{enabled}"));
        }
    }

    /// Importer that blocks until the test lets it finish.
    struct GatedImporter {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl LegacyImporter for GatedImporter {
        fn perform_import(&self, _sink: &mut ImportSink<'_>) -> Result<(), crate::Error> {
            let _ = self.gate.lock().recv_timeout(WAIT);
            Ok(())
        }
    }

    fn config() -> IconDatabaseConfig {
        IconDatabaseConfig { sync_delay_ms: 60_000, ..Default::default() }
    }

    fn open_db(dir: &Path) -> IconDatabase {
        let db = IconDatabase::new(config());
        assert!(db.open(dir));
        assert!(db.sync_now(WAIT));
        db
    }

    fn raw(image: Option<Arc<RawIcon>>) -> Option<Bytes> {
        image.map(|icon| icon.data.clone())
    }

    fn store_path(dir: &Path) -> PathBuf {
        dir.join(IconDatabaseConfig::default().database_filename)
    }

    #[test]
    fn test_set_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());

        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        assert!(db.sync_now(WAIT));

        let image = db.icon_for_page_url("page://x", SIZE, true).unwrap();
        assert_eq!(image.data, Bytes::from_static(b"png"));
        assert_eq!(image.size, SIZE);
        assert_eq!(db.icon_url_for_page_url("page://x").as_deref(), Some("icon://a"));
        assert!(Arc::ptr_eq(&image, &db.icon_for_page_url("page://x", SIZE, true).unwrap()));
    }

    #[test]
    fn test_round_trip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        assert!(db.sync_now(WAIT));
        db.close();

        let client = Arc::new(RecordingClient::default());
        let db = IconDatabase::new(config());
        db.set_client(client.clone());
        assert!(db.open(dir.path()));
        assert!(db.sync_now(WAIT));

        assert_eq!(db.icon_url_for_page_url("page://x").as_deref(), Some("icon://a"));
        assert!(!db.icon_data_known_for_icon_url("icon://a"));
        assert!(db.icon_for_page_url("page://x", SIZE, true).is_none());
        assert!(db.sync_now(WAIT));

        assert_eq!(raw(db.icon_for_page_url("page://x", SIZE, true)), Some(Bytes::from_static(b"png")));
        assert!(client.events().contains(&"icon:page://x".to_string()));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.close();
        db.close();

        assert!(!db.is_open());
        assert_eq!(db.sync_state(), SyncState::Stopped);
        assert!(!db.sync_now(WAIT));
        assert!(db.open(dir.path()));
    }

    #[test]
    fn test_open_rejects_invalid_requests() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let db = IconDatabase::new(config());
        assert!(!db.open(""));
        assert!(!db.open(&file));
        assert!(db.open(dir.path()));
        assert!(!db.open(dir.path()));

        let disabled = IconDatabase::new(IconDatabaseConfig { enabled: false, ..config() });
        assert!(!disabled.open(dir.path()));
    }

    #[test]
    fn test_disabling_closes() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_enabled(false);
        assert!(!db.is_enabled());
        assert!(!db.is_open());
    }

    #[test]
    fn test_retained_twice_released_once_survives_prune() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");

        db.retain_icon_for_page_url("page://x");
        db.retain_icon_for_page_url("page://x");
        db.release_icon_for_page_url("page://x");
        assert!(db.sync_now(WAIT));

        assert_eq!(raw(db.icon_for_page_url("page://x", SIZE, false)), Some(Bytes::from_static(b"png")));
        assert_eq!(db.stats().retained_pages, 1);
        db.close();

        let store = IconStore::open(store_path(dir.path()), false).unwrap();
        assert!(store.contains_icon("icon://a").unwrap());
    }

    #[test]
    fn test_release_to_zero_prunes_icon() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        db.retain_icon_for_page_url("page://x");
        assert!(db.sync_now(WAIT));

        db.release_icon_for_page_url("page://x");
        assert!(db.sync_now(WAIT));

        let stats = db.stats();
        assert_eq!(stats.icon_records, 0);
        assert_eq!(stats.retained_pages, 0);
        assert_eq!(db.icon_url_for_page_url("page://x"), None);

        // Unbalanced release is ignored.
        db.release_icon_for_page_url("page://x");
        db.close();

        let store = IconStore::open(store_path(dir.path()), false).unwrap();
        assert!(!store.contains_icon("icon://a").unwrap());
        assert_eq!(store.icon_url_for_page_url("page://x").unwrap(), None);
    }

    #[test]
    fn test_release_to_zero_keeps_icon_used_by_other_page() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_url_for_page_url("icon://a", "page://y");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        db.retain_icon_for_page_url("page://x");
        db.release_icon_for_page_url("page://x");
        assert!(db.sync_now(WAIT));

        assert_eq!(db.icon_url_for_page_url("page://x"), None);
        assert_eq!(raw(db.icon_for_page_url("page://y", SIZE, true)), Some(Bytes::from_static(b"png")));
        db.close();

        let store = IconStore::open(store_path(dir.path()), false).unwrap();
        assert!(store.contains_icon("icon://a").unwrap());
        assert_eq!(store.icon_url_for_page_url("page://y").unwrap().as_deref(), Some("icon://a"));
    }

    #[test]
    fn test_private_release_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        assert!(db.sync_now(WAIT));

        db.set_private_browsing_enabled(true);
        db.retain_icon_for_page_url("page://x");
        db.release_icon_for_page_url("page://x");
        assert!(db.sync_now(WAIT));
        assert_eq!(db.icon_url_for_page_url("page://x"), None);
        db.close();

        let db = open_db(dir.path());
        assert_eq!(db.icon_url_for_page_url("page://x").as_deref(), Some("icon://a"));
    }

    #[test]
    fn test_orphan_icon_pruned_from_memory_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"a")), "icon://a");
        assert!(db.sync_now(WAIT));

        db.set_icon_url_for_page_url("icon://b", "page://x");
        assert!(db.sync_now(WAIT));
        assert!(!db.icon_data_known_for_icon_url("icon://a"));
        assert_eq!(db.stats().icon_records, 1);
        db.close();

        let store = IconStore::open(store_path(dir.path()), false).unwrap();
        assert!(!store.contains_icon("icon://a").unwrap());
        assert_eq!(store.icon_url_for_page_url("page://x").unwrap().as_deref(), Some("icon://b"));
    }

    #[test]
    fn test_private_browsing_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::default());
        let db = open_db(dir.path());
        db.set_client(client.clone());

        db.set_private_browsing_enabled(true);
        assert!(db.is_private_browsing_enabled());
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        assert_eq!(raw(db.icon_for_page_url("page://x", SIZE, true)), Some(Bytes::from_static(b"png")));
        assert!(db.sync_now(WAIT));
        db.close();
        assert_eq!(client.events().first().map(String::as_str), Some("private:true"));

        let db = open_db(dir.path());
        assert!(!db.is_private_browsing_enabled());
        assert_eq!(db.icon_url_for_page_url("page://x"), None);
    }

    #[test]
    fn test_remove_all_icons() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::default());
        let db = open_db(dir.path());
        db.set_client(client.clone());
        db.set_default_icon_data(Some(Bytes::from_static(b"default")));
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        assert!(db.sync_now(WAIT));

        db.remove_all_icons();
        assert_eq!(raw(db.icon_for_page_url("page://x", SIZE, true)), Some(Bytes::from_static(b"default")));
        assert!(db.sync_now(WAIT));
        assert!(client.events().contains(&"remove_all".to_string()));
        db.close();

        let store = IconStore::open(store_path(dir.path()), false).unwrap();
        assert_eq!(store.icon_count().unwrap(), 0);
        assert_eq!(store.page_count().unwrap(), 0);
    }

    /// Wipes everything the first time an icon arrives, then binds a new page.
    struct WipeOnFirstIcon {
        db: Weak<IconDatabase>,
        fired: AtomicBool,
    }

    impl IconDatabaseClient for WipeOnFirstIcon {
        fn did_add_icon_for_page_url(&self, _page_url: &str) {
            if self.fired.swap(true, Ordering::AcqRel) {
                return;
            }
            if let Some(db) = self.db.upgrade() {
                db.remove_all_icons();
                db.set_icon_url_for_page_url("icon://b", "page://y");
            }
        }
    }

    #[test]
    fn test_binding_made_after_remove_all_survives_wipe() {
        let dir = tempfile::tempdir().unwrap();
        let seed = open_db(dir.path());
        seed.set_icon_url_for_page_url("icon://a", "page://x");
        seed.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        seed.close();

        let db = Arc::new(IconDatabase::new(config()));
        db.set_client(Arc::new(WipeOnFirstIcon { db: Arc::downgrade(&db), fired: AtomicBool::new(false) }));
        assert!(db.open(dir.path()));
        assert!(db.sync_now(WAIT));

        // The read completes on the sync thread, whose callback wipes and rebinds mid-cycle.
        assert!(db.icon_for_page_url("page://x", SIZE, true).is_none());
        assert!(db.sync_now(WAIT));
        assert!(db.sync_now(WAIT));
        assert_eq!(db.icon_url_for_page_url("page://y").as_deref(), Some("icon://b"));
        assert_eq!(db.icon_url_for_page_url("page://x"), None);
        db.close();

        let store = IconStore::open(store_path(dir.path()), false).unwrap();
        assert_eq!(store.icon_url_for_page_url("page://y").unwrap().as_deref(), Some("icon://b"));
        assert_eq!(store.icon_url_for_page_url("page://x").unwrap(), None);
    }

    /// Decoder that checks the directory is free by looking a page up from
    /// another thread while it decodes.
    #[derive(Default)]
    struct LookupWhileDecoding {
        db: OnceLock<Weak<IconDatabase<LookupWhileDecoding>>>,
        lookup_finished: AtomicBool,
    }

    impl IconDecoder for LookupWhileDecoding {
        type Image = RawIcon;

        fn decode(&self, data: &Bytes, size: IconSize) -> Option<RawIcon> {
            if let Some(db) = self.db.get().and_then(Weak::upgrade) {
                let (done, finished) = mpsc::channel();
                thread::spawn(move || {
                    let _ = done.send(db.icon_url_for_page_url("page://x"));
                });
                let finished = finished.recv_timeout(Duration::from_secs(2)).is_ok();
                self.lookup_finished.store(finished, Ordering::Release);
            }
            RawIconDecoder.decode(data, size)
        }
    }

    #[test]
    fn test_decode_runs_without_directory_lock() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(IconDatabase::with_decoder(config(), LookupWhileDecoding::default()));
        assert!(db.decoder.db.set(Arc::downgrade(&db)).is_ok());
        assert!(db.open(dir.path()));
        assert!(db.sync_now(WAIT));
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");

        let image = db.icon_for_page_url("page://x", SIZE, true).unwrap();
        assert_eq!(image.data, Bytes::from_static(b"png"));
        assert!(db.decoder.lookup_finished.load(Ordering::Acquire));
        assert!(Arc::ptr_eq(&image, &db.icon_for_page_url("page://x", SIZE, true).unwrap()));
        db.close();
    }

    #[test]
    fn test_delayed_cleanup_holds_remove_all() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(RecordingClient::default());
        let db = open_db(dir.path());
        db.set_client(client.clone());

        db.delay_database_cleanup();
        db.remove_all_icons();
        assert!(db.sync_now(WAIT));
        assert!(!client.events().contains(&"remove_all".to_string()));

        db.allow_database_cleanup();
        assert!(db.sync_now(WAIT));
        assert!(client.events().contains(&"remove_all".to_string()));

        // Unbalanced allow is ignored.
        db.allow_database_cleanup();
    }

    #[test]
    fn test_no_icon_marker() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_default_icon_data(Some(Bytes::from_static(b"default")));
        db.set_icon_url_for_page_url("icon://none", "page://x");
        db.set_icon_data_for_icon_url(None, "icon://none");

        assert!(db.icon_data_known_for_icon_url("icon://none"));
        assert_eq!(raw(db.icon_for_page_url("page://x", SIZE, true)), Some(Bytes::from_static(b"default")));
        assert_eq!(db.load_decision_for_icon_url("icon://none", LoaderId(1)), IconLoadDecision::No);
    }

    #[test]
    fn test_load_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IconStore::open(store_path(dir.path()), false).unwrap();
        let old = crate::IconSnapshot { icon_url: "icon://old".into(), timestamp: 1, data: Some(Bytes::from_static(b"o")) };
        let binding = PageUrlSnapshot { page_url: "page://old".into(), icon_url: Some("icon://old".into()) };
        store.write_snapshots(&[old], &[binding]).unwrap();
        store.close().unwrap();

        let closed = IconDatabase::new(config());
        assert_eq!(closed.load_decision_for_icon_url("icon://a", LoaderId(1)), IconLoadDecision::No);

        let db = open_db(dir.path());
        assert_eq!(db.load_decision_for_icon_url("icon://old", LoaderId(1)), IconLoadDecision::Yes);
        assert_eq!(db.load_decision_for_icon_url("icon://new", LoaderId(1)), IconLoadDecision::Yes);
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"n")), "icon://new");
        assert_eq!(db.load_decision_for_icon_url("icon://new", LoaderId(1)), IconLoadDecision::No);
    }

    #[test]
    fn test_requests_during_import_resolved_after() {
        let dir = tempfile::tempdir().unwrap();
        let (release, gate) = mpsc::channel();
        let client = Arc::new(RecordingClient::default());
        let db = IconDatabase::new(config());
        db.set_client(client.clone());
        db.set_legacy_importer(Some(Arc::new(GatedImporter { gate: Mutex::new(gate) })));
        assert!(db.open(dir.path()));

        assert_eq!(db.load_decision_for_icon_url("icon://a", LoaderId(7)), IconLoadDecision::Unknown);
        assert!(db.icon_for_page_url("page://x", SIZE, true).is_none());

        release.send(()).unwrap();
        assert!(db.sync_now(WAIT));

        assert_eq!(*client.loaders.lock(), vec![LoaderId(7)]);
        assert!(client.events().contains(&"import".to_string()));
        assert_eq!(db.load_decision_for_icon_url("icon://a", LoaderId(7)), IconLoadDecision::Yes);
        assert_eq!(db.stats().page_url_mappings, 0);
    }

    #[test]
    fn test_json_legacy_import_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("legacy.json");
        std::fs::write(
            &manifest,
            r#"{"pages":[{"page_url":"page://x","icon_url":"icon://a"}],"icons":[{"icon_url":"icon://a","data":"cafe"}]}"#,
        )
        .unwrap();
        let config = IconDatabaseConfig { legacy_import_path: Some(manifest.clone()), ..config() };

        let db = IconDatabase::new(config.clone());
        assert!(db.open(dir.path()));
        assert!(db.sync_now(WAIT));
        assert_eq!(db.icon_url_for_page_url("page://x").as_deref(), Some("icon://a"));
        db.read_icon_for_page_url_from_disk("page://x");
        assert!(db.sync_now(WAIT));
        assert_eq!(raw(db.icon_for_page_url("page://x", SIZE, true)), Some(Bytes::from_static(&[0xca, 0xfe])));
        db.close();

        std::fs::write(&manifest, r#"{"pages":[{"page_url":"page://y","icon_url":"icon://b"}]}"#).unwrap();
        let db = IconDatabase::new(config);
        assert!(db.open(dir.path()));
        assert!(db.sync_now(WAIT));
        assert_eq!(db.icon_url_for_page_url("page://y"), None);
        assert_eq!(db.icon_url_for_page_url("page://x").as_deref(), Some("icon://a"));
    }

    #[test]
    fn test_zero_size_lookup_queues_read() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_icon_url_for_page_url("icon://a", "page://x");
        db.set_icon_data_for_icon_url(Some(Bytes::from_static(b"png")), "icon://a");
        db.close();

        let db = open_db(dir.path());
        assert!(db.icon_for_page_url("page://x", IconSize::new(0, 0), true).is_none());
        assert!(db.sync_now(WAIT));
        assert!(db.icon_data_known_for_icon_url("icon://a"));
        assert_eq!(db.stats().icon_records_with_data, 1);
    }

    #[test]
    fn test_unretained_sweep_keeps_retained_pages() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        db.set_icon_url_for_page_url("icon://a", "page://kept");
        db.set_icon_url_for_page_url("icon://b", "page://stale");
        db.close();

        let db = IconDatabase::new(IconDatabaseConfig { prune_unretained_on_open: true, ..config() });
        db.retain_icon_for_page_url("page://kept");
        assert!(db.open(dir.path()));
        assert!(db.sync_now(WAIT));
        assert_eq!(db.icon_url_for_page_url("page://kept").as_deref(), Some("icon://a"));
        assert_eq!(db.icon_url_for_page_url("page://stale"), None);
        db.close();

        let store = IconStore::open(store_path(dir.path()), false).unwrap();
        assert!(store.contains_icon("icon://a").unwrap());
        assert!(!store.contains_icon("icon://b").unwrap());
    }

    #[test]
    fn test_stats_serialize() {
        let stats = IconDatabaseStats { page_url_mappings: 2, ..Default::default() };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["page_url_mappings"], 2);
        assert_eq!(json["pending_reads"], 0);
    }
}
