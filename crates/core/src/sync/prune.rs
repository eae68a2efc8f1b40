//! Reclaiming icons nothing refers to any more.

use std::collections::HashSet;

use super::Shared;
use crate::records::IconSnapshot;
use crate::store::IconStore;

/// Remove orphan icons from memory and store, then deal with dangling pages.
///
/// An orphan is an icon with no bound page that neither pending partition
/// references. Dangling pages (bound to an icon with no record) are removed
/// when `prune_dangling` is set and repaired otherwise; retained pages are
/// unbound rather than removed so their counts survive.
pub(super) fn prune<I>(shared: &Shared<I>, store: Option<&mut IconStore>, prune_dangling: bool) {
    let (orphans, dangling) = {
        let mut directory = shared.directory.lock();
        let candidates: Vec<String> = {
            let reads = shared.pending_reads.lock();
            directory
                .orphan_icon_urls()
                .into_iter()
                .filter(|url| !reads.is_icon_pending_read(url))
                .collect()
        };
        let orphans: Vec<String> = {
            let pending = shared.pending_sync.lock();
            candidates.into_iter().filter(|url| !pending.references_icon(url)).collect()
        };
        for icon_url in &orphans {
            directory.remove_icon(icon_url);
        }

        let dangling = directory.dangling_page_urls();
        for page_url in &dangling {
            if !prune_dangling {
                directory.repair_dangling_page(page_url);
            } else if directory.is_retained(page_url) {
                directory.unbind(page_url);
            } else {
                directory.remove_page(page_url);
            }
        }
        (orphans, dangling.len())
    };

    if !orphans.is_empty() || dangling > 0 {
        tracing::debug!(icons = orphans.len(), dangling, "Pruned icon directory");
    }

    let Some(store) = store else {
        return;
    };
    // Private sessions only forget icons in memory.
    if shared.is_private_browsing() {
        return;
    }

    // A page bound to a pruned address since the locks were dropped brings
    // its record back; keep that row. A binding made after this check is
    // written later against a fresh data-less row and reads as missing.
    let orphans: Vec<String> = {
        let directory = shared.directory.lock();
        orphans.into_iter().filter(|url| directory.icon(url).is_none()).collect()
    };
    if !orphans.is_empty() {
        if let Err(e) = store.remove_icons(&orphans) {
            tracing::warn!(error = %e, count = orphans.len(), "Failed to prune icons from store, retrying next cycle");
            let mut pending = shared.pending_sync.lock();
            for icon_url in orphans {
                pending.push_icon(IconSnapshot::deletion(icon_url));
            }
        }
    }
    match store.dangling_page_urls(prune_dangling) {
        Ok(0) => {}
        Ok(count) if prune_dangling => tracing::info!(count, "Removed dangling page bindings from store"),
        Ok(count) => tracing::warn!(count, "Icon store has page bindings without icons"),
        Err(e) => tracing::warn!(error = %e, "Failed to check store for dangling page bindings"),
    }
}

/// One-time sweep of persisted bindings for pages nobody is interested in.
///
/// Pages in the directory (which includes every retained page) are kept, as
/// are icons the directory or the pending-change buffers mention.
pub(super) fn sweep_unretained<I>(shared: &Shared<I>, store: Option<&mut IconStore>) {
    let Some(store) = store else {
        return;
    };

    let (keep_pages, keep_icons) = {
        let directory = shared.directory.lock();
        let keep_pages: HashSet<String> = directory
            .pages()
            .map(|page| page.page_url().to_string())
            .chain(directory.retained().iter().cloned())
            .collect();
        let mut keep_icons: HashSet<String> = directory.icons().map(|icon| icon.icon_url().to_string()).collect();
        keep_icons.extend(shared.pending_sync.lock().referenced_icons());
        (keep_pages, keep_icons)
    };

    match store.prune_unretained(&keep_pages, &keep_icons) {
        Ok((pages, icons)) => tracing::info!(pages, icons, "Swept unretained icons from store"),
        Err(e) => tracing::warn!(error = %e, "Failed to sweep unretained icons from store"),
    }
}
