//! src/services/media_service.rs
//!
//! Upload, read and delete orchestration on top of an [`ObjectStore`].
//!
//! Writes decide between buffering and streaming: `image/*` payloads are read
//! into memory up to [`METADATA_SIZE_LIMIT`] so their placeholder hash and
//! dimensions can be derived before the put. Anything larger, or not an image,
//! goes to the store as a stream and never sits in memory as a whole.

use crate::{
    models::{
        metadata::ImageMetadata,
        object::{ObjectInfo, ObjectSummary},
    },
    services::{
        delivery::{DeliveryUrl, DeliveryUrlResolver},
        image_metadata::{self, METADATA_SIZE_LIMIT},
        object_store::{
            BodyStream, ObjectBody, ObjectStore, PutBody, PutOptions, StorageError,
            StorageResult,
        },
    },
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Every stored object is content-addressed by a fresh or owner-scoped key,
/// so caches may keep it for a year.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum UploadError {
    /// The payload could not be read; nothing was sent to the store.
    #[error("invalid upload payload: {0}")]
    Read(#[source] io::Error),
    /// The store rejected or failed the write.
    #[error("upload failed for `{key}`: {source}")]
    Store {
        key: String,
        #[source]
        source: StorageError,
    },
}

/// Result of a successful upload.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    pub bucket: String,
    pub object: String,
    pub file_name: String,
    pub etag: String,
    pub size: i64,
    pub content_type: String,
}

/// Object description plus derived image attributes and a delivery URL.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub object: String,
    pub etag: String,
    pub size: i64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub cache_control: String,
    pub blurhash: String,
    pub width: u32,
    pub height: u32,
    /// Empty when no URL could be issued.
    pub url: String,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ListedFile {
    pub object: String,
    pub file_name: String,
    pub size: i64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl From<ObjectSummary> for ListedFile {
    fn from(summary: ObjectSummary) -> Self {
        Self {
            file_name: summary.file_name().to_string(),
            object: summary.key,
            size: summary.size,
            etag: summary.etag,
            last_modified: summary.last_modified,
        }
    }
}

/// Outcome of reading the head of an upload.
enum Ingest<'a> {
    /// The whole payload fit under the limit.
    Buffered(Bytes),
    /// The limit was crossed; the prefix read so far followed by the rest.
    Streaming(BodyStream<'a>),
}

/// Read `body` until it ends or grows past `limit` bytes.
async fn spool(mut body: BodyStream<'_>, limit: usize) -> io::Result<Ingest<'_>> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
        if buf.len() > limit {
            let prefix = stream::once(async move { Ok::<_, io::Error>(buf.freeze()) });
            return Ok(Ingest::Streaming(prefix.chain(body).boxed()));
        }
    }
    Ok(Ingest::Buffered(buf.freeze()))
}

/// First error yielded by a streamed client body. A put that fails after
/// one was seen is a bad payload, not a store failure.
#[derive(Clone, Default)]
struct ReadFailure(Arc<Mutex<Option<io::Error>>>);

impl ReadFailure {
    fn watch<'a>(&self, body: BodyStream<'a>) -> BodyStream<'a> {
        let slot = self.clone();
        body.inspect_err(move |err| slot.record(err)).boxed()
    }

    fn record(&self, err: &io::Error) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert_with(|| io::Error::new(err.kind(), err.to_string()));
        }
    }

    fn take(&self) -> Option<io::Error> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[derive(Clone)]
pub struct MediaService {
    store: Arc<dyn ObjectStore>,
    resolver: DeliveryUrlResolver,
}

impl MediaService {
    pub fn new(store: Arc<dyn ObjectStore>, resolver: DeliveryUrlResolver) -> Self {
        Self { store, resolver }
    }

    /// Store `body` under `key`, replacing any previous object there.
    pub async fn upload(
        &self,
        key: String,
        content_type: Option<&str>,
        body: BodyStream<'_>,
    ) -> Result<UploadedObject, UploadError> {
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let mut opts = PutOptions {
            content_type: content_type.clone(),
            cache_control: Some(IMMUTABLE_CACHE_CONTROL.to_string()),
            ..Default::default()
        };

        let read_failure = ReadFailure::default();
        let payload = if image_metadata::is_image(&content_type) {
            match spool(body, METADATA_SIZE_LIMIT).await.map_err(UploadError::Read)? {
                Ingest::Buffered(bytes) => {
                    if let Some(meta) = derive_metadata(&content_type, bytes.clone()).await {
                        opts.user_metadata = meta.to_user_metadata();
                    }
                    PutBody::Buffered(bytes)
                }
                Ingest::Streaming(rest) => {
                    debug!(key = %key, "image over metadata limit; streaming without metadata");
                    PutBody::Streaming(read_failure.watch(rest))
                }
            }
        } else {
            PutBody::Streaming(read_failure.watch(body))
        };

        let outcome = match self.store.put_object(&key, payload, opts).await {
            Ok(outcome) => outcome,
            Err(source) => {
                if let Some(read) = read_failure.take() {
                    warn!(key = %key, error = %read, "upload body failed mid-stream");
                    return Err(UploadError::Read(read));
                }
                error!(key = %key, error = %source, "object upload failed");
                return Err(UploadError::Store { key, source });
            }
        };

        info!(key = %key, size = outcome.size, content_type = %content_type, "object stored");
        Ok(UploadedObject {
            bucket: self.store.bucket().to_string(),
            file_name: key.rsplit('/').next().unwrap_or(&key).to_string(),
            object: key,
            etag: outcome.etag,
            size: outcome.size,
            content_type,
        })
    }

    pub async fn open(&self, key: &str) -> StorageResult<ObjectBody> {
        self.store.get_object(key).await
    }

    pub async fn stat(&self, key: &str) -> StorageResult<ObjectInfo> {
        self.store.stat_object(key).await
    }

    /// Stat plus image attributes and a delivery URL. A URL that cannot be
    /// issued leaves `url` empty instead of failing the request.
    pub async fn meta(&self, key: &str, expiry: Duration) -> StorageResult<ObjectMeta> {
        let info = self.store.stat_object(key).await?;
        let image = info.image_metadata();

        let url = match self.resolver.resolve(key, expiry).await {
            Ok(delivery) => delivery.url,
            Err(err) => {
                warn!(key, error = %err, "delivery url unavailable for metadata response");
                String::new()
            }
        };

        Ok(ObjectMeta {
            object: info.key,
            etag: info.etag,
            size: info.size,
            content_type: info.content_type,
            last_modified: info.last_modified,
            cache_control: info.cache_control.unwrap_or_default(),
            blurhash: image.blurhash,
            width: image.width,
            height: image.height,
            url,
        })
    }

    /// Delivery URL for `key`. Existence is not checked.
    pub async fn delivery_url(&self, key: &str, expiry: Duration) -> StorageResult<DeliveryUrl> {
        self.resolver.resolve(key, expiry).await
    }

    /// Delete an existing object. Absent keys yield `ObjectNotFound` rather
    /// than the store's silent success.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.store.stat_object(key).await?;
        self.store.delete_object(key).await?;
        info!(key, "object deleted");
        Ok(())
    }

    /// Every object under `prefix`, minus a folder marker at the prefix itself.
    pub async fn list(&self, prefix: &str) -> StorageResult<Vec<ListedFile>> {
        let objects = self.store.list_objects(prefix).await?;
        Ok(objects
            .into_iter()
            .filter(|obj| obj.key != prefix)
            .map(ListedFile::from)
            .collect())
    }

    /// Readiness: the bucket must exist and answer.
    pub async fn ready(&self) -> StorageResult<()> {
        if self.store.bucket_exists().await? {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(self.store.bucket().to_string()))
        }
    }
}

/// Decoding is CPU-bound, so it runs off the async workers. The caller still
/// awaits it, and the size gate in front keeps per-request latency bounded.
async fn derive_metadata(
    content_type: &str,
    data: Bytes,
) -> Option<ImageMetadata> {
    let mime = content_type.to_string();
    match tokio::task::spawn_blocking(move || image_metadata::extract(&mime, &data)).await {
        Ok(meta) => meta,
        Err(err) => {
            warn!(error = %err, "image metadata task failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::metadata::META_BLURHASH,
        services::{delivery::DEFAULT_URL_EXPIRY, keys::Resource, memory_store::MemoryStore},
        test_support::{chunked, sample_png},
    };

    async fn service() -> (MediaService, MemoryStore) {
        let store = MemoryStore::new("media", "http://store.local");
        store.create_bucket().await.unwrap();
        let resolver = DeliveryUrlResolver::new(Arc::new(store.signer()));
        (MediaService::new(Arc::new(store.clone()), resolver), store)
    }

    fn attachment(original_name: &str) -> String {
        Resource::PostAttachment {
            post_id: "p1",
            original_name,
        }
        .object_key()
    }

    #[tokio::test]
    async fn small_images_get_metadata() {
        let (media, store) = service().await;
        let uploaded = media
            .upload(attachment("cat.png"), Some("image/png"), chunked(sample_png(100, 50)))
            .await
            .unwrap();

        assert!(uploaded.object.starts_with("posts/p1/"));
        assert!(uploaded.file_name.ends_with(".png"));
        assert_eq!(uploaded.bucket, "media");

        let info = store.stat_object(&uploaded.object).await.unwrap();
        let meta = info.image_metadata();
        assert_eq!((meta.width, meta.height), (100, 50));
        assert!(!meta.blurhash.is_empty());
        assert_eq!(info.cache_control.as_deref(), Some(IMMUTABLE_CACHE_CONTROL));
    }

    #[tokio::test]
    async fn oversized_images_stream_without_metadata() {
        let (media, store) = service().await;
        let payload = vec![7u8; METADATA_SIZE_LIMIT + 100];
        let uploaded = media
            .upload(attachment("huge.png"), Some("image/png"), chunked(payload))
            .await
            .unwrap();

        assert_eq!(uploaded.size, (METADATA_SIZE_LIMIT + 100) as i64);
        let info = store.stat_object(&uploaded.object).await.unwrap();
        assert!(info.user_meta(META_BLURHASH).is_none());
        assert_eq!(info.size, uploaded.size);
    }

    #[tokio::test]
    async fn non_images_are_streamed_as_is() {
        let (media, store) = service().await;
        let uploaded = media
            .upload(attachment("doc.pdf"), Some("application/pdf"), chunked(sample_png(8, 8)))
            .await
            .unwrap();
        let info = store.stat_object(&uploaded.object).await.unwrap();
        assert!(info.user_metadata.is_empty());
        assert_eq!(info.content_type, "application/pdf");
    }

    #[tokio::test]
    async fn undecodable_images_are_stored_without_metadata() {
        let (media, store) = service().await;
        let uploaded = media
            .upload(attachment("bad.png"), Some("image/png"), chunked(b"nope".to_vec()))
            .await
            .unwrap();
        let info = store.stat_object(&uploaded.object).await.unwrap();
        assert!(info.user_metadata.is_empty());
        assert_eq!(info.size, 4);
    }

    #[tokio::test]
    async fn missing_content_type_defaults() {
        let (media, _) = service().await;
        let uploaded = media
            .upload(attachment("blob"), None, chunked(b"abc".to_vec()))
            .await
            .unwrap();
        assert_eq!(uploaded.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn concurrent_post_uploads_get_distinct_keys() {
        let (media, store) = service().await;
        let (a, b) = tokio::join!(
            media.upload(attachment("a.png"), Some("image/png"), chunked(sample_png(4, 4))),
            media.upload(attachment("a.png"), Some("image/png"), chunked(sample_png(4, 4))),
        );
        assert_ne!(a.unwrap().object, b.unwrap().object);
        assert_eq!(store.object_count().await, 2);
    }

    #[tokio::test]
    async fn profile_uploads_overwrite_in_place() {
        let (media, store) = service().await;
        let profile = Resource::ProfileImage { user_id: "alice" }.object_key();
        let first = media
            .upload(profile.clone(), Some("image/png"), chunked(sample_png(10, 10)))
            .await
            .unwrap();
        let second = media
            .upload(profile, Some("image/png"), chunked(sample_png(20, 10)))
            .await
            .unwrap();

        assert_eq!(first.object, "profiles/alice/profile");
        assert_eq!(first.object, second.object);
        assert_eq!(store.object_count().await, 1);
        let meta = media.meta(&second.object, DEFAULT_URL_EXPIRY).await.unwrap();
        assert_eq!(meta.width, 20);
    }

    #[tokio::test]
    async fn read_errors_never_reach_the_store() {
        let (media, store) = service().await;
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ])
        .boxed();
        let err = media
            .upload(attachment("a.png"), Some("image/png"), broken)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Read(_)));
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn streamed_read_errors_are_payload_errors() {
        let (media, store) = service().await;
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ])
        .boxed();
        let err = media
            .upload(attachment("notes.txt"), Some("text/plain"), broken)
            .await
            .unwrap_err();
        match err {
            UploadError::Read(read) => assert_eq!(read.to_string(), "connection reset"),
            other => panic!("expected a read error, got {other:?}"),
        }
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn oversized_image_read_errors_are_payload_errors() {
        let (media, _store) = service().await;
        let head = vec![0u8; METADATA_SIZE_LIMIT + 1];
        let broken = stream::iter(vec![
            Ok(Bytes::from(head)),
            Err(io::Error::other("body limit exceeded")),
        ])
        .boxed();
        let err = media
            .upload(attachment("big.png"), Some("image/png"), broken)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Read(_)));
    }

    #[tokio::test]
    async fn store_failures_are_reported_as_attempted() {
        let store = MemoryStore::new("media", "http://store.local");
        let media = MediaService::new(
            Arc::new(store.clone()),
            DeliveryUrlResolver::new(Arc::new(store.signer())),
        );
        let err = media
            .upload(attachment("a.txt"), Some("text/plain"), chunked(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Store { .. }));
        assert!(err.to_string().starts_with("upload failed"));
    }

    #[tokio::test]
    async fn delete_checks_existence_first() {
        let (media, _) = service().await;
        assert!(media.delete("posts/p1/missing").await.unwrap_err().is_not_found());

        let uploaded = media
            .upload(attachment("a.txt"), Some("text/plain"), chunked(b"x".to_vec()))
            .await
            .unwrap();
        media.delete(&uploaded.object).await.unwrap();
        assert!(media.delete(&uploaded.object).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn listing_skips_the_folder_marker() {
        let (media, store) = service().await;
        store
            .put_object("posts/p1/", PutBody::Buffered(Bytes::new()), PutOptions::default())
            .await
            .unwrap();
        media
            .upload(attachment("a.txt"), Some("text/plain"), chunked(b"x".to_vec()))
            .await
            .unwrap();

        let files = media.list("posts/p1/").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].object, format!("posts/p1/{}", files[0].file_name));
    }

    #[tokio::test]
    async fn meta_defaults_for_plain_files() {
        let (media, _) = service().await;
        let uploaded = media
            .upload(attachment("a.txt"), Some("text/plain"), chunked(b"x".to_vec()))
            .await
            .unwrap();
        let meta = media.meta(&uploaded.object, DEFAULT_URL_EXPIRY).await.unwrap();
        assert_eq!((meta.width, meta.height), (0, 0));
        assert_eq!(meta.blurhash, "");
        assert!(meta.url.contains(&uploaded.object));
    }

    #[tokio::test]
    async fn readiness_requires_the_bucket() {
        let store = MemoryStore::new("media", "http://store.local");
        let media = MediaService::new(
            Arc::new(store.clone()),
            DeliveryUrlResolver::new(Arc::new(store.signer())),
        );
        assert!(media.ready().await.is_err());
        store.create_bucket().await.unwrap();
        assert!(media.ready().await.is_ok());
    }
}
