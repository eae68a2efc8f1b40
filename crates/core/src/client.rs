//! Notification interface for collaborators.

use serde::{Deserialize, Serialize};

/// Opaque handle a page-load collaborator passes to `load_decision_for_icon_url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoaderId(pub u64);

/// Whether a loader should fetch an icon over the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IconLoadDecision {
    /// No usable icon is known (or it expired): fetch it.
    Yes,
    /// A fresh icon, or a fresh "no icon" marker, is known: don't fetch.
    No,
    /// The import has not finished; the loader is told again later via
    /// [`IconDatabaseClient::did_resolve_load_decisions`].
    Unknown,
}

/// Callbacks from the icon database.
///
/// Callbacks run on the sync thread, or on the foreground thread for the
/// call that caused them, and never while a database lock is held.
pub trait IconDatabaseClient: Send + Sync {
    /// The URL import finished; lookups that returned nothing may now succeed.
    fn did_import_icon_urls(&self) {}

    /// These loaders got `Unknown` earlier and should ask again.
    fn did_resolve_load_decisions(&self, _loaders: &[LoaderId]) {}

    /// Icon bytes became available for a page someone asked about.
    fn did_add_icon_for_page_url(&self, _page_url: &str) {}

    /// The store was wiped after `remove_all_icons`.
    fn did_remove_all_icons(&self) {}

    /// Private browsing was switched on or off.
    fn did_change_private_browsing(&self, _enabled: bool) {}
}

/// Client that ignores every notification.
#[derive(Debug, Default)]
pub struct NoopClient;

impl IconDatabaseClient for NoopClient {}
