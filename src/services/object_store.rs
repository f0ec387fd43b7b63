//! src/services/object_store.rs
//!
//! The object store seam: a thin put/get/stat/list/delete surface over an
//! S3-compatible bucket, plus presigned GET issuance. Backends live in
//! `s3_store.rs` (production) and `memory_store.rs` (local runs and tests).

use crate::models::object::{ObjectInfo, ObjectSummary};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{collections::BTreeMap, io, time::Duration};
use thiserror::Error;

/// Payload chunks flowing into or out of the store.
pub type BodyStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found")]
    ObjectNotFound { key: String },
    #[error("{op} `{key}` failed: {reason}")]
    Backend {
        op: &'static str,
        key: String,
        reason: String,
    },
    #[error("presigning `{key}` failed: {reason}")]
    Presign { key: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn backend(op: &'static str, key: &str, reason: impl ToString) -> Self {
        Self::Backend {
            op,
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// How an upload reaches the store.
pub enum PutBody<'a> {
    /// Fully read payload with a known length.
    Buffered(Bytes),
    /// Payload of unknown length, forwarded chunk by chunk.
    Streaming(BodyStream<'a>),
}

#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub content_type: String,
    pub cache_control: Option<String>,
    pub user_metadata: BTreeMap<String, String>,
}

/// What the store reports back after a successful write.
#[derive(Clone, Debug)]
pub struct PutOutcome {
    pub etag: String,
    pub size: i64,
}

/// An object opened for reading.
pub struct ObjectBody {
    pub info: ObjectInfo,
    pub stream: BodyStream<'static>,
}

/// Issues time-limited GET URLs for objects in one bucket.
///
/// Signatures cover the host the signer is bound to, so a URL can only be
/// handed to clients that reach the store through that same host.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;
}

/// Bucket-scoped object operations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket every call operates on.
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> StorageResult<bool>;

    /// Create the bucket. Creating a bucket that already exists succeeds.
    async fn create_bucket(&self) -> StorageResult<()>;

    /// Write an object, replacing whatever lives at `key`.
    async fn put_object(
        &self,
        key: &str,
        body: PutBody<'_>,
        opts: PutOptions,
    ) -> StorageResult<PutOutcome>;

    /// Open an object for streaming. Missing keys yield `ObjectNotFound`.
    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody>;

    /// Metadata only. Missing keys yield `ObjectNotFound`.
    async fn stat_object(&self, key: &str) -> StorageResult<ObjectInfo>;

    /// Every object whose key starts with `prefix`, in key order.
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;
}

/// Strip the quotes S3 puts around ETags.
pub fn normalize_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}
