//! One-time legacy import.
//!
//! A [`LegacyImporter`] runs on the sync thread the first time a store is
//! opened (until it succeeds) and writes through an [`ImportSink`]. The
//! bundled [`JsonLegacyImporter`] reads a manifest of page bindings and
//! hex-encoded icon bytes.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Deserialize;

use crate::Error;
use crate::store::ImportSink;

/// Source of legacy icon data.
pub trait LegacyImporter: Send + Sync {
    /// Write everything the source knows into `sink`.
    ///
    /// Returning an error rolls back the whole import and leaves the
    /// completion flag unset, so it is retried on the next open.
    fn perform_import(&self, sink: &mut ImportSink<'_>) -> Result<(), Error>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    pages: Vec<ManifestPage>,
    #[serde(default)]
    icons: Vec<ManifestIcon>,
}

#[derive(Debug, Deserialize)]
struct ManifestPage {
    page_url: String,
    icon_url: String,
}

#[derive(Debug, Deserialize)]
struct ManifestIcon {
    icon_url: String,
    /// Hex-encoded bytes; absent means "known to have no icon".
    #[serde(default)]
    data: Option<String>,
}

/// Imports a JSON manifest:
///
/// ```json
/// { "pages": [{ "page_url": "...", "icon_url": "..." }],
///   "icons": [{ "icon_url": "...", "data": "89504e47..." }] }
/// ```
#[derive(Debug, Clone)]
pub struct JsonLegacyImporter {
    path: PathBuf,
}

impl JsonLegacyImporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_manifest(&self) -> Result<Manifest, Error> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| Error::ImportFailed(format!("{}: {e}", self.path.display())))?;
        parse_manifest(&raw)
    }
}

fn parse_manifest(raw: &str) -> Result<Manifest, Error> {
    serde_json::from_str(raw).map_err(|e| Error::ImportFailed(format!("invalid manifest: {e}")))
}

fn decode_icon(icon: &ManifestIcon) -> Result<Option<Bytes>, Error> {
    icon.data
        .as_deref()
        .map(|hex_data| {
            hex::decode(hex_data)
                .map(Bytes::from)
                .map_err(|e| Error::ImportFailed(format!("icon {}: {e}", icon.icon_url)))
        })
        .transpose()
}

impl LegacyImporter for JsonLegacyImporter {
    fn perform_import(&self, sink: &mut ImportSink<'_>) -> Result<(), Error> {
        let manifest = self.read_manifest()?;

        for page in &manifest.pages {
            sink.import_icon_url_for_page_url(&page.icon_url, &page.page_url)?;
        }
        for icon in &manifest.icons {
            let data = decode_icon(icon)?;
            sink.import_icon_data_for_icon_url(data, &icon.icon_url)?;
        }

        let (pages, icons) = sink.counts();
        tracing::info!(path = %self.path.display(), pages, icons, "Read legacy icon manifest");
        Ok(())
    }
}
