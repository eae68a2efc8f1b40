//! Concurrent, disk-backed site-icon cache.
//!
//! This crate provides:
//! - [`IconDatabase`], the facade the foreground thread calls
//! - An in-memory directory of icon and page records with pending-change
//!   and pending-read partitions
//! - A single background sync thread that owns the SQLite store
//! - Unified error types and layered configuration

pub mod client;
pub mod config;
pub mod database;
pub mod decoder;
pub mod directory;
pub mod error;
pub mod import;
pub mod pending;
pub mod records;
pub mod store;
pub mod sync;

pub use client::{IconDatabaseClient, IconLoadDecision, LoaderId, NoopClient};
pub use config::{ConfigError, IconDatabaseConfig};
pub use database::{IconDatabase, IconDatabaseStats};
pub use decoder::{IconDecoder, IconSize, RawIcon, RawIconDecoder};
pub use error::Error;
pub use import::{JsonLegacyImporter, LegacyImporter};
pub use records::{IconSnapshot, ImageDataStatus, PageUrlSnapshot};
pub use store::{IconStore, ImportSink};
pub use sync::SyncState;
