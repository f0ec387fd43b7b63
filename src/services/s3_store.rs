//! S3-compatible backend built on `aws-sdk-s3`.
//!
//! Works against AWS S3 and S3-compatible stores (MinIO and friends) using
//! path-style addressing and static credentials. Unknown-length uploads are
//! forwarded as multipart uploads so at most one part is held in memory.

use crate::{
    models::object::{ObjectInfo, ObjectSummary},
    services::object_store::{
        BodyStream, ObjectBody, ObjectStore, PutBody, PutOptions, PutOutcome, StorageError,
        StorageResult, UrlSigner, normalize_etag,
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as AwsDateTime},
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration,
    },
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Part size for streamed uploads. S3 requires at least 5 MiB for every part
/// but the last.
const MULTIPART_PART_SIZE: usize = 8 * 1024 * 1024;

/// Connection settings shared by the store and any extra signer.
#[derive(Clone)]
pub struct S3Settings {
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Build a client talking to `endpoint` (scheme + host[:port]).
    ///
    /// No network I/O happens here; the first request reveals a bad endpoint.
    pub fn new(settings: &S3Settings, endpoint: &str) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "media-gateway-config",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }

    async fn put_buffered(
        &self,
        key: &str,
        data: Bytes,
        opts: &PutOptions,
    ) -> StorageResult<PutOutcome> {
        let size = data.len() as i64;
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_length(size)
            .content_type(&opts.content_type)
            .set_cache_control(opts.cache_control.clone())
            .set_metadata(user_metadata(opts))
            .send()
            .await
            .map_err(|e| StorageError::backend("put", key, DisplayErrorContext(&e)))?;

        Ok(PutOutcome {
            etag: output.e_tag().map(normalize_etag).unwrap_or_default(),
            size,
        })
    }

    /// Forward a stream of unknown length. Payloads smaller than one part fall
    /// back to a plain PUT.
    async fn put_streaming(
        &self,
        key: &str,
        mut chunks: BodyStream<'_>,
        opts: &PutOptions,
    ) -> StorageResult<PutOutcome> {
        let mut part = BytesMut::with_capacity(MULTIPART_PART_SIZE);
        while part.len() < MULTIPART_PART_SIZE {
            match chunks.next().await {
                Some(chunk) => part.extend_from_slice(&chunk?),
                None => return self.put_buffered(key, part.freeze(), opts).await,
            }
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&opts.content_type)
            .set_cache_control(opts.cache_control.clone())
            .set_metadata(user_metadata(opts))
            .send()
            .await
            .map_err(|e| StorageError::backend("create multipart", key, DisplayErrorContext(&e)))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::backend("create multipart", key, "missing upload id"))?
            .to_string();

        match self.upload_parts(key, &upload_id, part, chunks).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, upload_id = %upload_id, error = %DisplayErrorContext(&abort_err), "failed to abort multipart upload");
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut part: BytesMut,
        mut chunks: BodyStream<'_>,
    ) -> StorageResult<PutOutcome> {
        let mut completed = Vec::new();
        let mut size: i64 = 0;
        let mut exhausted = false;

        while !exhausted {
            while part.len() < MULTIPART_PART_SIZE {
                match chunks.next().await {
                    Some(chunk) => part.extend_from_slice(&chunk?),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if part.is_empty() {
                break;
            }

            let part_number = completed.len() as i32 + 1;
            let body = part.split().freeze();
            size += body.len() as i64;
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| StorageError::backend("upload part", key, DisplayErrorContext(&e)))?;
            debug!(key, part_number, "uploaded part");

            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .build(),
            );
        }

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::backend("complete multipart", key, DisplayErrorContext(&e)))?;

        Ok(PutOutcome {
            etag: output.e_tag().map(normalize_etag).unwrap_or_default(),
            size,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err))
                if err.err().is_not_found() || err.raw().status().as_u16() == 404 =>
            {
                Ok(false)
            }
            Err(err) => Err(StorageError::backend(
                "head bucket",
                &self.bucket,
                DisplayErrorContext(&err),
            )),
        }
    }

    async fn create_bucket(&self) -> StorageResult<()> {
        let region = self.client.config().region().map(|r| r.as_ref().to_string());
        let location = region
            .filter(|r| r != "us-east-1")
            .map(|r| {
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(r.as_str()))
                    .build()
            });

        match self
            .client
            .create_bucket()
            .bucket(&self.bucket)
            .set_create_bucket_configuration(location)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            // Another instance won the race; the bucket is there either way.
            Err(SdkError::ServiceError(err))
                if err.err().is_bucket_already_owned_by_you()
                    || err.err().is_bucket_already_exists() =>
            {
                debug!(bucket = %self.bucket, "bucket created concurrently");
                Ok(())
            }
            Err(err) => Err(StorageError::backend(
                "create bucket",
                &self.bucket,
                DisplayErrorContext(&err),
            )),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: PutBody<'_>,
        opts: PutOptions,
    ) -> StorageResult<PutOutcome> {
        match body {
            PutBody::Buffered(data) => self.put_buffered(key, data, &opts).await,
            PutBody::Streaming(chunks) => self.put_streaming(key, chunks, &opts).await,
        }
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(SdkError::ServiceError(err))
                if err.err().is_no_such_key() || err.raw().status().as_u16() == 404 =>
            {
                return Err(not_found(key));
            }
            Err(err) => return Err(StorageError::backend("get", key, DisplayErrorContext(&err))),
        };

        let info = object_info(
            key,
            ObjectHeaders {
                content_type: output.content_type(),
                content_length: output.content_length(),
                etag: output.e_tag(),
                last_modified: output.last_modified(),
                cache_control: output.cache_control(),
                metadata: output.metadata(),
            },
        );
        let reader = output.body.into_async_read();
        Ok(ObjectBody {
            info,
            stream: ReaderStream::new(reader).boxed(),
        })
    }

    async fn stat_object(&self, key: &str) -> StorageResult<ObjectInfo> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(object_info(
                key,
                ObjectHeaders {
                    content_type: output.content_type(),
                    content_length: output.content_length(),
                    etag: output.e_tag(),
                    last_modified: output.last_modified(),
                    cache_control: output.cache_control(),
                    metadata: output.metadata(),
                },
            )),
            Err(SdkError::ServiceError(err))
                if err.err().is_not_found() || err.raw().status().as_u16() == 404 =>
            {
                Err(not_found(key))
            }
            Err(err) => Err(StorageError::backend("stat", key, DisplayErrorContext(&err))),
        }
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::backend("list", prefix, DisplayErrorContext(&e)))?;

            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                objects.push(ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0),
                    etag: obj.e_tag().map(normalize_etag).unwrap_or_default(),
                    last_modified: obj.last_modified().map(to_chrono).unwrap_or_default(),
                });
            }

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::backend("delete", key, DisplayErrorContext(&e)))?;
        Ok(())
    }
}

#[async_trait]
impl UrlSigner for S3Store {
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presign = PresigningConfig::expires_in(expires_in).map_err(|e| StorageError::Presign {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign)
            .await
            .map_err(|e| StorageError::Presign {
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(request.uri().to_string())
    }
}

/// Header fields shared by GET and HEAD responses.
struct ObjectHeaders<'a> {
    content_type: Option<&'a str>,
    content_length: Option<i64>,
    etag: Option<&'a str>,
    last_modified: Option<&'a AwsDateTime>,
    cache_control: Option<&'a str>,
    metadata: Option<&'a HashMap<String, String>>,
}

fn object_info(key: &str, headers: ObjectHeaders<'_>) -> ObjectInfo {
    ObjectInfo {
        key: key.to_string(),
        content_type: headers
            .content_type
            .unwrap_or("application/octet-stream")
            .to_string(),
        size: headers.content_length.unwrap_or(0),
        etag: headers.etag.map(normalize_etag).unwrap_or_default(),
        last_modified: headers.last_modified.map(to_chrono).unwrap_or_default(),
        cache_control: headers.cache_control.map(str::to_string),
        user_metadata: headers
            .metadata
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default(),
    }
}

fn user_metadata(opts: &PutOptions) -> Option<HashMap<String, String>> {
    if opts.user_metadata.is_empty() {
        None
    } else {
        Some(
            opts.user_metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

fn to_chrono(ts: &AwsDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()).unwrap_or_default()
}

fn not_found(key: &str) -> StorageError {
    StorageError::ObjectNotFound {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3Store {
        S3Store::new(
            &S3Settings {
                region: "us-east-1".into(),
                access_key: "minioadmin".into(),
                secret_key: "minioadmin".into(),
                bucket: "media".into(),
            },
            "http://minio.internal:9000",
        )
    }

    #[tokio::test]
    async fn presigned_urls_are_bound_to_the_configured_host() {
        let url = store()
            .presign_get("posts/p1/a.png", Duration::from_secs(600))
            .await
            .unwrap();

        assert!(url.starts_with("http://minio.internal:9000/media/posts/p1/a.png?"));
        assert!(url.contains("X-Amz-Expires=600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn presigned_urls_differ_per_expiry() {
        let store = store();
        let short = store
            .presign_get("posts/p1/a.png", Duration::from_secs(60))
            .await
            .unwrap();
        let long = store
            .presign_get("posts/p1/a.png", Duration::from_secs(120))
            .await
            .unwrap();
        assert_ne!(short, long);
    }

    #[test]
    fn user_metadata_is_omitted_when_empty() {
        assert!(user_metadata(&PutOptions::default()).is_none());
    }

    #[test]
    fn timestamps_convert_to_chrono() {
        let ts = AwsDateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(&ts).timestamp(), 1_700_000_000);
    }
}
