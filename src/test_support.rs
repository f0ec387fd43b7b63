//! Fixtures shared by the unit and router tests.

use crate::{
    config::AppConfig,
    routes::routes::routes,
    services::{
        authz::{AccessDecision, AccessTarget, Authorizer, AuthzError},
        delivery::DeliveryUrlResolver,
        media_service::MediaService,
        memory_store::MemoryStore,
        object_store::{BodyStream, ObjectStore},
    },
    state::AppState,
};
use async_trait::async_trait;
use axum::{Router, body::Body, http::Response};
use bytes::Bytes;
use futures::{StreamExt, stream};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::{io::Cursor, sync::Arc};

/// Gradient image encoded as `format`.
pub fn encode_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, format)
        .expect("encode test image");
    out.into_inner()
}

pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    encode_image(width, height, ImageFormat::Png)
}

/// Split `data` into 64 KiB chunks, like a network body.
pub fn chunked(data: Vec<u8>) -> BodyStream<'static> {
    let data = Bytes::from(data);
    let chunks: Vec<_> = (0..data.len())
        .step_by(64 * 1024)
        .map(|start| Ok::<_, std::io::Error>(data.slice(start..(start + 64 * 1024).min(data.len()))))
        .collect();
    stream::iter(chunks).boxed()
}

/// `alice-token` belongs to alice, who may edit post `p1`; `bob-token`
/// belongs to bob, who may edit nothing. Every other token is invalid.
pub struct StubAuthorizer;

#[async_trait]
impl Authorizer for StubAuthorizer {
    async fn check(
        &self,
        token: &str,
        target: &AccessTarget,
    ) -> Result<AccessDecision, AuthzError> {
        let identity = match token {
            "alice-token" => "alice",
            "bob-token" => "bob",
            _ => return Err(AuthzError::InvalidCredentials),
        };
        let allowed = match target {
            AccessTarget::Authenticated => true,
            AccessTarget::EditPost(post_id) => identity == "alice" && post_id == "p1",
        };
        Ok(AccessDecision {
            allowed,
            identity: Some(identity.to_string()),
        })
    }
}

/// Router over a fresh memory store with its bucket created.
pub async fn test_app() -> (Router, MemoryStore) {
    let store = MemoryStore::new("media", "http://store.local");
    store.create_bucket().await.expect("create bucket");

    let resolver = DeliveryUrlResolver::new(Arc::new(store.signer()));
    let media = MediaService::new(Arc::new(store.clone()), resolver);
    let state = AppState::new(media, Arc::new(StubAuthorizer));

    let app = routes(&AppConfig::default()).with_state(state);
    (app, store)
}

pub const BOUNDARY: &str = "media-gateway-test-boundary";

/// Single-part `multipart/form-data` body.
pub fn multipart_body(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

pub async fn body_bytes(resp: Response<Body>) -> Bytes {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body")
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).expect("json body")
}
