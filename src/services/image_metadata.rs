//! Ingest-time image metadata: BlurHash placeholder plus pixel dimensions.
//!
//! Runs synchronously inside the upload request, so callers only hand over
//! payloads at or below [`METADATA_SIZE_LIMIT`]. Every failure degrades to
//! "no metadata".

use crate::{models::metadata::ImageMetadata, services::blurhash};
use image::ImageFormat;
use tracing::debug;

/// Largest payload that is decoded inline (5 MiB).
pub const METADATA_SIZE_LIMIT: usize = 5 * 1024 * 1024;

/// BlurHash grid used for every placeholder.
pub const COMPONENTS_X: u32 = 4;
pub const COMPONENTS_Y: u32 = 3;

/// Decoder registry, keyed by MIME essence.
const DECODERS: &[(&str, ImageFormat)] = &[
    ("image/jpeg", ImageFormat::Jpeg),
    ("image/jpg", ImageFormat::Jpeg),
    ("image/pjpeg", ImageFormat::Jpeg),
    ("image/png", ImageFormat::Png),
    ("image/webp", ImageFormat::WebP),
    ("image/gif", ImageFormat::Gif),
];

/// True for any `image/*` content type.
pub fn is_image(content_type: &str) -> bool {
    mime_essence(content_type).starts_with("image/")
}

pub(crate) fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn decoder_for(content_type: &str) -> Option<ImageFormat> {
    let essence = mime_essence(content_type);
    DECODERS
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, format)| *format)
}

/// Decode `data` and derive its placeholder hash and dimensions.
///
/// Registered types are decoded strictly as the declared format; other
/// `image/*` types fall back to sniffing the payload.
pub fn extract(content_type: &str, data: &[u8]) -> Option<ImageMetadata> {
    let decoded = match decoder_for(content_type) {
        Some(format) => image::load_from_memory_with_format(data, format),
        None => image::load_from_memory(data),
    };
    let img = match decoded {
        Ok(img) => img,
        Err(err) => {
            debug!(content_type, error = %err, "image decode failed; skipping metadata");
            return None;
        }
    };

    let (width, height) = (img.width(), img.height());
    let rgb = img.to_rgb8();
    let blurhash = blurhash::encode(COMPONENTS_X, COMPONENTS_Y, width, height, rgb.as_raw())?;

    Some(ImageMetadata {
        blurhash,
        width,
        height,
    })
}
