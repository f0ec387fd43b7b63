//! Represents an object (file) stored in the media bucket.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::metadata::{ImageMetadata, meta_value};

/// Store-side description of a single object.
///
/// The payload itself is never held here; reads hand it out as a byte stream
/// next to this struct.
#[derive(Serialize, Clone, Debug)]
pub struct ObjectInfo {
    /// Full object key (e.g. `posts/p1/3f0c….png`).
    pub key: String,

    /// MIME type recorded at upload time.
    pub content_type: String,

    /// Size in bytes.
    pub size: i64,

    /// Opaque integrity token assigned by the store, without surrounding quotes.
    pub etag: String,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,

    /// `Cache-Control` directive stored with the object.
    pub cache_control: Option<String>,

    /// User metadata, keys lower-cased (`x-blurhash`, `x-width`, `x-height`).
    pub user_metadata: BTreeMap<String, String>,
}

impl ObjectInfo {
    /// Last path component of the key.
    pub fn file_name(&self) -> &str {
        file_name_of(&self.key)
    }

    /// Case-insensitive user metadata lookup.
    pub fn user_meta(&self, name: &str) -> Option<&str> {
        meta_value(&self.user_metadata, name)
    }

    /// Derived image attributes, defaulting to zero/empty when absent.
    pub fn image_metadata(&self) -> ImageMetadata {
        ImageMetadata::from_user_metadata(&self.user_metadata)
    }
}

/// One entry of a prefix listing.
#[derive(Serialize, Clone, Debug)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl ObjectSummary {
    pub fn file_name(&self) -> &str {
        file_name_of(&self.key)
    }
}

fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
