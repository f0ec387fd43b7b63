//! Response building shared by the post and profile handlers.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `MediaService`.

use crate::{
    errors::AppError,
    models::{
        metadata::{META_BLURHASH, META_HEIGHT, META_WIDTH},
        object::ObjectInfo,
    },
    services::{
        delivery::parse_expires,
        image_metadata::mime_essence,
        keys::is_safe_segment,
        media_service::{MediaService, UploadedObject},
    },
};
use axum::{
    Json,
    body::Body,
    extract::Multipart,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::{io, time::Duration};
use tracing::debug;

const X_BLURHASH: HeaderName = HeaderName::from_static("x-blurhash");
const X_IMAGE_WIDTH: HeaderName = HeaderName::from_static("x-image-width");
const X_IMAGE_HEIGHT: HeaderName = HeaderName::from_static("x-image-height");

/// `?expires=<seconds>` on URL and metadata endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ExpiresQuery {
    /// Kept as text so malformed values fall back to the default instead of
    /// rejecting the request.
    pub expires: Option<String>,
}

impl ExpiresQuery {
    pub fn expiry(&self) -> Duration {
        parse_expires(self.expires.as_deref())
    }
}

/// Reject client-supplied path segments that could escape their namespace.
pub fn ensure_segments_safe(segments: &[&str]) -> Result<(), AppError> {
    match segments.iter().find(|s| !is_safe_segment(s)) {
        Some(bad) => Err(AppError::bad_request(format!("invalid path segment `{bad}`"))),
        None => Ok(()),
    }
}

/// Upload the first multipart field named one of `field_names`; the key is
/// derived from the client's original file name.
pub async fn upload_file_field<F>(
    media: &MediaService,
    multipart: &mut Multipart,
    field_names: &[&str],
    key_for: F,
) -> Result<UploadedObject, AppError>
where
    F: FnOnce(&str) -> String,
{
    while let Some(field) = multipart.next_field().await? {
        if !field.name().is_some_and(|name| field_names.contains(&name)) {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let key = key_for(&original_name);
        let body = field.map(|chunk| chunk.map_err(io::Error::other)).boxed();

        return Ok(media.upload(key, content_type.as_deref(), body).await?);
    }
    Err(AppError::bad_request(format!(
        "missing file field `{}`",
        field_names.first().copied().unwrap_or("file")
    )))
}

/// `GET` an object as a streaming response.
pub async fn stream_object(media: &MediaService, key: &str) -> Result<Response, AppError> {
    let object = media.open(key).await?;
    let mut response = Response::new(Body::from_stream(object.stream));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &object.info);
    Ok(response)
}

/// `HEAD`: same headers as GET but no body.
pub async fn head_object(media: &MediaService, key: &str) -> Result<Response, AppError> {
    let info = media.stat(key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &info);
    Ok(response)
}

pub async fn object_meta(
    media: &MediaService,
    key: &str,
    query: &ExpiresQuery,
) -> Result<Response, AppError> {
    let meta = media.meta(key, query.expiry()).await?;
    Ok(Json(meta).into_response())
}

/// `{url, expiresIn}` for direct delivery.
pub async fn object_url(
    media: &MediaService,
    key: &str,
    query: &ExpiresQuery,
) -> Result<Response, AppError> {
    let delivery = media.delivery_url(key, query.expiry()).await?;
    debug!(key, source = ?delivery.source, "issued delivery url");
    Ok(Json(json!({
        "url": delivery.url,
        "expiresIn": delivery.expires_in.as_secs(),
    }))
    .into_response())
}

pub async fn delete_object(media: &MediaService, key: &str) -> Result<Response, AppError> {
    media.delete(key).await?;
    Ok(Json(json!({ "message": "deleted", "object": key })).into_response())
}

fn set_object_headers(headers: &mut HeaderMap, info: &ObjectInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size.max(0)));

    let quoted = format!("\"{}\"", info.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    let http_date = info
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&http_date) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if let Some(value) = info
        .cache_control
        .as_deref()
        .and_then(|cc| HeaderValue::from_str(cc).ok())
    {
        headers.insert(header::CACHE_CONTROL, value);
    }

    for (meta_key, header_name) in [
        (META_BLURHASH, X_BLURHASH),
        (META_WIDTH, X_IMAGE_WIDTH),
        (META_HEIGHT, X_IMAGE_HEIGHT),
    ] {
        if let Some(value) = info
            .user_meta(meta_key)
            .filter(|v| !v.is_empty())
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(header_name, value);
        }
    }

    // Render PDFs in the browser instead of downloading them.
    if mime_essence(&info.content_type) == "application/pdf" {
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::delivery::DEFAULT_URL_EXPIRY;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn info(content_type: &str, meta: &[(&str, &str)]) -> ObjectInfo {
        ObjectInfo {
            key: "posts/p1/a".into(),
            content_type: content_type.into(),
            size: 42,
            etag: "abc123".into(),
            last_modified: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            cache_control: Some("public, max-age=31536000, immutable".into()),
            user_metadata: meta
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn image_headers_include_derived_attributes() {
        let mut headers = HeaderMap::new();
        set_object_headers(
            &mut headers,
            &info(
                "image/png",
                &[("x-blurhash", "LKO2?U"), ("x-width", "100"), ("x-height", "50")],
            ),
        );

        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], "42");
        assert_eq!(headers[header::ETAG], "\"abc123\"");
        assert_eq!(headers[header::LAST_MODIFIED], "Fri, 01 Mar 2024 12:30:00 GMT");
        assert_eq!(headers["x-blurhash"], "LKO2?U");
        assert_eq!(headers["x-image-width"], "100");
        assert_eq!(headers["x-image-height"], "50");
        assert!(headers.get(header::CONTENT_DISPOSITION).is_none());
    }

    #[test]
    fn pdfs_render_inline_and_skip_image_headers() {
        let mut headers = HeaderMap::new();
        set_object_headers(&mut headers, &info("application/pdf", &[]));
        assert_eq!(headers[header::CONTENT_DISPOSITION], "inline");
        assert!(headers.get("x-blurhash").is_none());

        let mut headers = HeaderMap::new();
        set_object_headers(&mut headers, &info("Application/PDF; charset=binary", &[]));
        assert_eq!(headers[header::CONTENT_DISPOSITION], "inline");
    }

    #[test]
    fn unsafe_segments_are_rejected() {
        assert!(ensure_segments_safe(&["p1", "a.png"]).is_ok());
        let err = ensure_segments_safe(&["p1", ".."]).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn expiry_query_falls_back_to_default() {
        let q = ExpiresQuery {
            expires: Some("soon".into()),
        };
        assert_eq!(q.expiry(), DEFAULT_URL_EXPIRY);
        assert_eq!(ExpiresQuery::default().expiry(), DEFAULT_URL_EXPIRY);
    }
}
