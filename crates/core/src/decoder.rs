//! Decode hook supplied by the embedding application.
//!
//! The database stores icons as opaque bytes. Turning them into something
//! drawable is the host's business; it plugs in an [`IconDecoder`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Requested icon dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IconSize {
    pub width: u32,
    pub height: u32,
}

impl IconSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A 0x0 request only schedules a read and never yields an image.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Turns stored icon bytes into the host's image type.
///
/// Called on the foreground thread with no directory lock held. It still
/// delays the caller, so it should not block on I/O.
pub trait IconDecoder: Send + Sync + 'static {
    type Image: Send + Sync + 'static;

    /// Decode `data` for display at `size`, or `None` if the bytes are not an image.
    fn decode(&self, data: &Bytes, size: IconSize) -> Option<Self::Image>;
}

/// Undecoded icon bytes tagged with the size they were requested at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIcon {
    pub size: IconSize,
    pub data: Bytes,
}

/// Decoder that hands the stored bytes back untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawIconDecoder;

impl IconDecoder for RawIconDecoder {
    type Image = RawIcon;

    fn decode(&self, data: &Bytes, size: IconSize) -> Option<RawIcon> {
        if data.is_empty() {
            return None;
        }
        Some(RawIcon { size, data: data.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_size() {
        assert!(IconSize::new(0, 0).is_empty());
        assert!(IconSize::new(16, 0).is_empty());
        assert!(!IconSize::new(16, 16).is_empty());
    }

    #[test]
    fn test_raw_decoder_rejects_empty() {
        assert!(RawIconDecoder.decode(&Bytes::new(), IconSize::new(16, 16)).is_none());
    }

    #[test]
    fn test_raw_decoder_keeps_bytes() {
        let data = Bytes::from_static(b"\x89PNG");
        let icon = RawIconDecoder.decode(&data, IconSize::new(32, 32)).unwrap();
        assert_eq!(icon.data, data);
        assert_eq!(icon.size, IconSize::new(32, 32));
    }
}
