//! In-process object store used by `--backend memory` and by tests.
//!
//! Objects live in a `BTreeMap` behind a `RwLock`; ETags are MD5 digests of
//! the payload, like a single-part S3 upload. Presigned URLs are signed with a
//! per-process secret and can be checked with [`MemorySigner::verify`].

use crate::{
    models::object::{ObjectInfo, ObjectSummary},
    services::object_store::{
        ObjectBody, ObjectStore, PutBody, PutOptions, PutOutcome, StorageError, StorageResult,
        UrlSigner,
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{StreamExt, stream};
use md5::Context;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    bucket_created: bool,
    objects: BTreeMap<String, StoredObject>,
}

struct StoredObject {
    data: Bytes,
    info: ObjectInfo,
}

/// Object store that keeps everything in memory.
#[derive(Clone)]
pub struct MemoryStore {
    bucket: String,
    state: Arc<RwLock<MemoryState>>,
    signer: MemorySigner,
}

impl MemoryStore {
    /// A store whose bucket does not exist yet; run the bootstrap to create it.
    pub fn new(bucket: impl Into<String>, base_url: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let signer = MemorySigner::new(base_url, bucket.clone(), Uuid::new_v4().to_string());
        Self {
            bucket,
            state: Arc::new(RwLock::new(MemoryState::default())),
            signer,
        }
    }

    /// Signer bound to the store's own base URL.
    pub fn signer(&self) -> MemorySigner {
        self.signer.clone()
    }

    /// Signer sharing this store's secret but bound to another host.
    pub fn signer_for(&self, base_url: impl Into<String>) -> MemorySigner {
        MemorySigner {
            base_url: trim_base(base_url.into()),
            ..self.signer.clone()
        }
    }

    #[cfg(test)]
    pub async fn object_count(&self) -> usize {
        self.state.read().await.objects.len()
    }

    async fn ensure_bucket(&self) -> StorageResult<()> {
        if self.state.read().await.bucket_created {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(self.bucket.clone()))
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> StorageResult<bool> {
        Ok(self.state.read().await.bucket_created)
    }

    async fn create_bucket(&self) -> StorageResult<()> {
        self.state.write().await.bucket_created = true;
        Ok(())
    }

    async fn put_object(
        &self,
        key: &str,
        body: PutBody<'_>,
        opts: PutOptions,
    ) -> StorageResult<PutOutcome> {
        self.ensure_bucket().await?;

        let mut digest = Context::new();
        let data = match body {
            PutBody::Buffered(bytes) => {
                digest.consume(&bytes);
                bytes
            }
            PutBody::Streaming(mut chunks) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    digest.consume(&chunk);
                    buf.extend_from_slice(&chunk);
                }
                buf.freeze()
            }
        };

        let etag = format!("{:x}", digest.compute());
        let size = data.len() as i64;
        let info = ObjectInfo {
            key: key.to_string(),
            content_type: opts.content_type,
            size,
            etag: etag.clone(),
            last_modified: Utc::now(),
            cache_control: opts.cache_control,
            user_metadata: opts
                .user_metadata
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
        };

        self.state
            .write()
            .await
            .objects
            .insert(key.to_string(), StoredObject { data, info });
        Ok(PutOutcome { etag, size })
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody> {
        self.ensure_bucket().await?;
        let state = self.state.read().await;
        let stored = state.objects.get(key).ok_or_else(|| not_found(key))?;
        let data = stored.data.clone();
        Ok(ObjectBody {
            info: stored.info.clone(),
            stream: stream::once(async move { Ok(data) }).boxed(),
        })
    }

    async fn stat_object(&self, key: &str) -> StorageResult<ObjectInfo> {
        self.ensure_bucket().await?;
        let state = self.state.read().await;
        state
            .objects
            .get(key)
            .map(|stored| stored.info.clone())
            .ok_or_else(|| not_found(key))
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        self.ensure_bucket().await?;
        let state = self.state.read().await;
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, stored)| ObjectSummary {
                key: stored.info.key.clone(),
                size: stored.info.size,
                etag: stored.info.etag.clone(),
                last_modified: stored.info.last_modified,
            })
            .collect())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.ensure_bucket().await?;
        // S3 semantics: deleting an absent key is not an error.
        self.state.write().await.objects.remove(key);
        Ok(())
    }
}

fn not_found(key: &str) -> StorageError {
    StorageError::ObjectNotFound {
        key: key.to_string(),
    }
}

fn trim_base(base_url: String) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// HMAC-less signer for the memory backend: `md5(secret, bucket, key, expiry)`.
///
/// URLs look like `{base}/{bucket}/{key}?X-Expires={unix_ms}&X-Signature={sig}`.
#[derive(Clone)]
pub struct MemorySigner {
    base_url: String,
    bucket: String,
    secret: String,
}

impl MemorySigner {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: trim_base(base_url.into()),
            bucket: bucket.into(),
            secret: secret.into(),
        }
    }

    fn signature(&self, host_base: &str, key: &str, expires_at_ms: i64) -> String {
        let mut ctx = Context::new();
        for part in [
            self.secret.as_str(),
            host_base,
            self.bucket.as_str(),
            key,
            &expires_at_ms.to_string(),
        ] {
            ctx.consume(part.as_bytes());
            ctx.consume(b"\n");
        }
        URL_SAFE_NO_PAD.encode(ctx.compute().0)
    }

    /// True if `url` was issued by this signer for its host and has not expired.
    #[cfg(test)]
    pub fn verify(&self, url: &str) -> bool {
        let object_prefix = format!("{}/{}/", self.base_url, self.bucket);
        let Some(rest) = url.strip_prefix(&object_prefix) else {
            return false;
        };
        let Some((key, query)) = rest.split_once('?') else {
            return false;
        };

        let mut expires_at = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("X-Expires", v)) => expires_at = v.parse::<i64>().ok(),
                Some(("X-Signature", v)) => signature = Some(v),
                _ => {}
            }
        }
        let (Some(expires_at), Some(signature)) = (expires_at, signature) else {
            return false;
        };

        signature == self.signature(&self.base_url, key, expires_at)
            && Utc::now().timestamp_millis() < expires_at
    }
}

#[async_trait]
impl UrlSigner for MemorySigner {
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let ttl_ms = i64::try_from(expires_in.as_millis()).map_err(|_| StorageError::Presign {
            key: key.to_string(),
            reason: "expiry out of range".into(),
        })?;
        let expires_at = Utc::now().timestamp_millis() + ttl_ms;
        Ok(format!(
            "{}/{}/{}?X-Expires={}&X-Signature={}",
            self.base_url,
            self.bucket,
            key,
            expires_at,
            self.signature(&self.base_url, key, expires_at)
        ))
    }
}
