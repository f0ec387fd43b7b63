//! Derived image attributes carried as object user metadata.

use serde::Serialize;
use std::collections::BTreeMap;

pub const META_BLURHASH: &str = "x-blurhash";
pub const META_WIDTH: &str = "x-width";
pub const META_HEIGHT: &str = "x-height";

/// Placeholder hash plus intrinsic pixel dimensions of an image.
///
/// Derived at ingest, never authoritative: a missing or partial set of
/// user-metadata entries reads back as the zero value for that field.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Compact BlurHash string used to paint a blurred preview.
    pub blurhash: String,
    pub width: u32,
    pub height: u32,
}

impl ImageMetadata {
    /// Entries to attach to the stored object.
    pub fn to_user_metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (META_BLURHASH.to_string(), self.blurhash.clone()),
            (META_WIDTH.to_string(), self.width.to_string()),
            (META_HEIGHT.to_string(), self.height.to_string()),
        ])
    }

    pub fn from_user_metadata(meta: &BTreeMap<String, String>) -> Self {
        let dimension = |name| {
            meta_value(meta, name)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Self {
            blurhash: meta_value(meta, META_BLURHASH).unwrap_or_default().to_string(),
            width: dimension(META_WIDTH),
            height: dimension(META_HEIGHT),
        }
    }
}

/// Case-insensitive lookup; S3-compatible stores differ in how they case
/// user metadata keys.
pub fn meta_value<'a>(meta: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    meta.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}
