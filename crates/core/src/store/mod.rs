//! SQLite-backed persistent icon store.
//!
//! This module provides the on-disk half of the icon database. It supports:
//!
//! - Icon bytes and timestamps keyed by icon address
//! - Page address to icon bindings
//! - Automatic schema migrations and integrity-checked rebuilds
//! - All-or-nothing snapshot flushes, one transaction per sync cycle
//!
//! Only the sync thread holds an [`IconStore`].

pub mod connection;
pub mod icons;
pub mod import;
pub mod info;
pub mod migrations;
pub mod pages;

pub use connection::IconStore;
pub use import::ImportSink;
pub use pages::PageBinding;
