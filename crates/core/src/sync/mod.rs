//! The sync thread: import, pending writes, pending reads and pruning.
//!
//! The thread is the only owner of the [`IconStore`]. It talks to the
//! foreground exclusively through [`Shared`]: the directory, the two pending
//! partitions, and the [`SyncSignal`] control block. Locks are taken in the
//! order directory → pending-sync → pending-read, at most two at a time,
//! and are never held across a store call. The signal's own lock may be
//! taken under any of them; it never takes one itself.

mod prune;
mod signal;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

pub use signal::SyncState;
pub(crate) use signal::SyncSignal;

use crate::Error;
use crate::client::{IconDatabaseClient, NoopClient};
use crate::directory::Directory;
use crate::import::LegacyImporter;
use crate::pending::{PendingReads, PendingSync};
use crate::store::{IconStore, PageBinding};

/// Bindings applied per directory lock acquisition during the URL import.
const IMPORT_CHUNK: usize = 512;

/// Tries at the final wipe and at the final flush before giving up.
const TERMINATE_ATTEMPTS: usize = 3;

/// State shared between the facade and the sync thread.
pub(crate) struct Shared<I> {
    pub(crate) directory: Mutex<Directory<I>>,
    pub(crate) pending_sync: Mutex<PendingSync>,
    pub(crate) pending_reads: Mutex<PendingReads>,
    pub(crate) signal: SyncSignal,
    pub(crate) open: AtomicBool,
    pub(crate) private_browsing: AtomicBool,
    cleanup_delay: AtomicUsize,
    client: RwLock<Arc<dyn IconDatabaseClient>>,
    importer: RwLock<Option<Arc<dyn LegacyImporter>>>,
}

impl<I> Shared<I> {
    pub(crate) fn new() -> Self {
        Self {
            directory: Mutex::new(Directory::new()),
            pending_sync: Mutex::new(PendingSync::default()),
            pending_reads: Mutex::new(PendingReads::default()),
            signal: SyncSignal::default(),
            open: AtomicBool::new(false),
            private_browsing: AtomicBool::new(false),
            cleanup_delay: AtomicUsize::new(0),
            client: RwLock::new(Arc::new(NoopClient)),
            importer: RwLock::new(None),
        }
    }

    pub(crate) fn client(&self) -> Arc<dyn IconDatabaseClient> {
        Arc::clone(&self.client.read())
    }

    pub(crate) fn set_client(&self, client: Arc<dyn IconDatabaseClient>) {
        *self.client.write() = client;
    }

    pub(crate) fn importer(&self) -> Option<Arc<dyn LegacyImporter>> {
        self.importer.read().clone()
    }

    pub(crate) fn set_importer(&self, importer: Option<Arc<dyn LegacyImporter>>) {
        *self.importer.write() = importer;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn is_private_browsing(&self) -> bool {
        self.private_browsing.load(Ordering::Acquire)
    }

    pub(crate) fn cleanup_delayed(&self) -> bool {
        self.cleanup_delay.load(Ordering::Acquire) > 0
    }

    pub(crate) fn delay_cleanup(&self) {
        self.cleanup_delay.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the remaining nesting depth, or `None` if cleanup was not delayed.
    pub(crate) fn allow_cleanup(&self) -> Option<usize> {
        self.cleanup_delay
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| depth.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }
}

/// Settings the sync thread copies out of the configuration at open.
#[derive(Debug, Clone)]
pub(crate) struct SyncSettings {
    pub(crate) path: PathBuf,
    pub(crate) check_integrity: bool,
    pub(crate) read_batch_size: usize,
    pub(crate) prune_unretained_on_open: bool,
    pub(crate) prune_dangling_pages: bool,
}

pub(crate) struct SyncWorker<I> {
    shared: Arc<Shared<I>>,
    settings: SyncSettings,
    store: Option<IconStore>,
    sweep_pending: bool,
}

impl<I: Send + Sync + 'static> SyncWorker<I> {
    pub(crate) fn new(shared: Arc<Shared<I>>, settings: SyncSettings) -> Self {
        let sweep_pending = settings.prune_unretained_on_open;
        Self { shared, settings, store: None, sweep_pending }
    }

    /// Thread body: NotStarted → Importing → Syncing → Terminating → Stopped.
    pub(crate) fn run(mut self) {
        self.shared.signal.set_state(SyncState::Importing);
        self.store = self.open_store();
        self.import();

        if !self.shared.signal.terminate_requested() {
            self.shared.signal.set_state(SyncState::Syncing);
            while self.shared.signal.wait_for_work() {
                self.cycle();
                self.shared.signal.complete_cycle();
            }
        }

        self.shared.signal.set_state(SyncState::Terminating);
        self.terminate();
        self.shared.signal.set_state(SyncState::Stopped);
        tracing::info!(path = %self.settings.path.display(), "Icon database sync thread stopped");
    }

    fn open_store(&self) -> Option<IconStore> {
        let path = &self.settings.path;
        match IconStore::open(path, self.settings.check_integrity) {
            Ok(store) => {
                tracing::info!(path = %path.display(), "Opened icon store");
                Some(store)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to open icon store, running without persistence");
                None
            }
        }
    }

    fn import(&mut self) {
        let bindings = match self.store.as_mut() {
            Some(store) => {
                if let Some(importer) = self.shared.importer() {
                    run_legacy_import(store, importer.as_ref());
                }
                if self.shared.signal.terminate_requested() {
                    return;
                }
                store.page_bindings().unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Failed to read page bindings during import");
                    Vec::new()
                })
            }
            None => Vec::new(),
        };

        if self.shared.signal.terminate_requested() {
            return;
        }
        self.load_bindings(&bindings);
        self.finish_import();
    }

    /// Load persisted bindings into the directory.
    ///
    /// Pages the foreground has already bound keep their binding. When the
    /// unretained sweep will run, only pages already in the directory are
    /// loaded; the rest are about to be deleted from the store.
    fn load_bindings(&self, bindings: &[PageBinding]) {
        let known_only = self.sweep_pending && !self.shared.cleanup_delayed();
        let total = bindings.len();
        let mut loaded = 0;

        for chunk in bindings.chunks(IMPORT_CHUNK) {
            let mut directory = self.shared.directory.lock();
            for binding in chunk {
                let page = directory.page(&binding.page_url);
                if known_only && page.is_none() {
                    continue;
                }
                if page.and_then(|p| p.icon_url()).is_some() {
                    continue;
                }
                directory.bind(&binding.page_url, &binding.icon_url);
                if let Some(icon) = directory.icon_mut(&binding.icon_url) {
                    if icon.timestamp() == 0 {
                        icon.set_timestamp(binding.icon_timestamp);
                    }
                }
                loaded += 1;
            }
        }
        tracing::info!(count = loaded, total, "Imported page bindings from icon store");
    }

    /// Mark the import complete and resolve everything that waited on it.
    fn finish_import(&self) {
        let mut ready_pages = Vec::new();
        let mut read_queued = false;

        let loaders = {
            let mut directory = self.shared.directory.lock();
            let mut reads = self.shared.pending_reads.lock();
            reads.set_import_complete(true);

            for page_url in reads.take_pages_pending_import() {
                let Some(icon_url) = directory.icon_url_for_page(&page_url).map(str::to_string) else {
                    let placeholder = directory
                        .page(&page_url)
                        .is_some_and(|page| page.retain_count() == 0 && page.icon_url().is_none());
                    if placeholder {
                        directory.remove_page(&page_url);
                    }
                    continue;
                };
                match directory.icon(&icon_url) {
                    Some(icon) if icon.is_pending_read() => {
                        reads.add_icon_pending_read(&icon_url);
                        reads.add_interested_page(&page_url);
                        read_queued = true;
                    }
                    Some(icon) if icon.data().is_some() => ready_pages.push(page_url),
                    _ => {}
                }
            }
            reads.take_loaders()
        };

        if read_queued {
            self.shared.signal.wake_now();
        }

        let client = self.shared.client();
        if !loaders.is_empty() {
            client.did_resolve_load_decisions(&loaders);
        }
        for page_url in &ready_pages {
            client.did_add_icon_for_page_url(page_url);
        }
        client.did_import_icon_urls();
    }

    /// One sync cycle. Returns once no reads or writes are left or
    /// termination was requested.
    fn cycle(&mut self) {
        loop {
            // A wipe requested mid-cycle runs before the next write, so
            // nothing enqueued after the request is lost to it.
            self.perform_remove_all(false);
            if self.shared.signal.remove_all_pending() {
                // Held by delayed cleanup; reads and writes wait with it.
                break;
            }
            let wrote = self.write_to_database();
            let read = self.read_from_database();
            if !(wrote || read) || self.shared.signal.terminate_requested() {
                break;
            }
        }

        if self.shared.cleanup_delayed() || self.shared.signal.terminate_requested() {
            return;
        }
        if std::mem::take(&mut self.sweep_pending) {
            prune::sweep_unretained(&self.shared, self.store.as_mut());
        }
        prune::prune(&self.shared, self.store.as_mut(), self.settings.prune_dangling_pages);
    }

    fn perform_remove_all(&mut self, force: bool) {
        if !self.shared.signal.remove_all_pending() || (!force && self.shared.cleanup_delayed()) {
            return;
        }
        self.shared.signal.take_remove_all();

        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.remove_all() {
                tracing::warn!(error = %e, "Failed to remove all icons from store, retrying next cycle");
                self.shared.signal.request_remove_all();
                return;
            }
        }
        tracing::info!("Removed all icons");
        self.shared.client().did_remove_all_icons();
    }

    /// Drain the pending-change buffers into the store in one transaction.
    ///
    /// Returns whether anything was written. Nothing is drained while a wipe
    /// is pending: `remove_all_icons` raises that flag under the pending-sync
    /// lock, so every drained snapshot predates any wipe still to come. A
    /// failed batch goes back into the buffers ahead of anything enqueued
    /// since, unless a wipe was requested in the meantime.
    fn write_to_database(&mut self) -> bool {
        let (icons, pages) = {
            let mut pending = self.shared.pending_sync.lock();
            if self.shared.signal.remove_all_pending() {
                return false;
            }
            pending.drain()
        };
        if icons.is_empty() && pages.is_empty() {
            return false;
        }

        let Some(store) = self.store.as_mut() else {
            tracing::warn!(
                icons = icons.len(),
                pages = pages.len(),
                "No icon store open, discarding pending changes"
            );
            return false;
        };

        match store.write_snapshots(&icons, &pages) {
            Ok(()) => {
                tracing::debug!(icons = icons.len(), pages = pages.len(), "Wrote pending changes to icon store");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write pending changes, retrying next cycle");
                let mut pending = self.shared.pending_sync.lock();
                if !self.shared.signal.remove_all_pending() {
                    pending.restore(icons, pages);
                }
                false
            }
        }
    }

    /// Read one batch of icons the foreground is waiting for.
    ///
    /// Returns whether any icon was read.
    fn read_from_database(&mut self) -> bool {
        let batch = self.shared.pending_reads.lock().icons_to_read(self.settings.read_batch_size);
        if batch.is_empty() {
            return false;
        }

        let results = match self.store.as_ref() {
            Some(store) => read_icons(store, batch),
            None => batch.into_iter().map(|url| (url, None, 0)).collect(),
        };
        if results.is_empty() {
            return false;
        }

        let mut ready_pages = Vec::new();
        {
            let mut directory = self.shared.directory.lock();
            let mut reads = self.shared.pending_reads.lock();
            for (icon_url, data, timestamp) in results {
                if !reads.remove_icon_pending_read(&icon_url) {
                    continue;
                }
                let Some(icon) = directory.icon_mut(&icon_url) else {
                    continue;
                };
                if !icon.is_pending_read() {
                    continue;
                }
                icon.set_image_data(data);
                if icon.timestamp() == 0 {
                    icon.set_timestamp(timestamp);
                }
                let interested = reads.take_interested(icon.page_urls());
                if icon.data().is_some() {
                    ready_pages.extend(interested);
                }
            }
        }

        tracing::debug!(count = ready_pages.len(), "Read icons from store");
        let client = self.shared.client();
        for page_url in &ready_pages {
            client.did_add_icon_for_page_url(page_url);
        }
        true
    }

    /// Final wipe and flush before the store closes.
    ///
    /// Each step is retried a few times. Changes still buffered after that
    /// are reported as lost; a wipe that keeps failing blocks the flush,
    /// since writing without it would resurrect wiped icons on reopen.
    fn terminate(&mut self) {
        for _ in 0..TERMINATE_ATTEMPTS {
            self.perform_remove_all(true);
            if !self.shared.signal.remove_all_pending() {
                break;
            }
        }
        if self.shared.signal.remove_all_pending() {
            tracing::error!("Failed to remove all icons from store before closing");
        } else {
            for _ in 0..TERMINATE_ATTEMPTS {
                self.write_to_database();
                if self.shared.pending_sync.lock().is_empty() {
                    break;
                }
            }
        }

        let lost = self.shared.pending_sync.lock().len();
        if lost > 0 {
            tracing::error!(count = lost, "Closing icon store with unsaved changes");
        }
        if let Some(store) = self.store.take() {
            if let Err(e) = store.close() {
                tracing::warn!(error = %e, "Failed to close icon store cleanly");
            }
        }
    }
}

fn run_legacy_import(store: &mut IconStore, importer: &dyn LegacyImporter) {
    match store.imported() {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read legacy import flag, skipping legacy import");
            return;
        }
    }

    match legacy_import(store, importer) {
        Ok((pages, icons)) => tracing::info!(pages, icons, "Legacy icon import complete"),
        Err(e) => tracing::warn!(error = %e, "Legacy icon import failed, will retry on next open"),
    }
}

/// Run the importer inside one transaction; dropping the sink on error rolls it back.
fn legacy_import(store: &mut IconStore, importer: &dyn LegacyImporter) -> Result<(usize, usize), Error> {
    let mut sink = store.begin_import(chrono::Utc::now().timestamp())?;
    importer.perform_import(&mut sink)?;
    sink.commit()
}

fn read_icon(store: &IconStore, icon_url: &str) -> Result<(Option<Bytes>, i64), Error> {
    let data = store.icon_data(icon_url)?;
    let timestamp = store.icon_timestamp(icon_url)?.unwrap_or(0);
    Ok((data, timestamp))
}

/// Read bytes and timestamps for a batch of icons, stopping at the first
/// store error. Icons not reached stay queued for the next cycle.
fn read_icons(store: &IconStore, batch: Vec<String>) -> Vec<(String, Option<Bytes>, i64)> {
    let mut results = Vec::with_capacity(batch.len());
    for icon_url in batch {
        match read_icon(store, &icon_url) {
            Ok((data, timestamp)) => results.push((icon_url, data, timestamp)),
            Err(e) => {
                tracing::warn!(icon_url = %icon_url, error = %e, "Failed to read icon from store");
                break;
            }
        }
    }
    results
}
