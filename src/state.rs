//! Shared application state, assembled once from `AppConfig`.

use crate::{
    config::{AppConfig, StoreBackend},
    services::{
        authz::{Authorizer, DenyAllAuthorizer, RemoteAuthorizer},
        delivery::DeliveryUrlResolver,
        media_service::MediaService,
        memory_store::MemoryStore,
        object_store::{ObjectStore, UrlSigner},
        s3_store::{S3Settings, S3Store},
    },
};
use anyhow::{Context, Result};
use reqwest::Url;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub media: MediaService,
    pub authz: Arc<dyn Authorizer>,
}

impl AppState {
    pub fn new(media: MediaService, authz: Arc<dyn Authorizer>) -> Self {
        Self { media, authz }
    }

    /// Build the store, signers and authorizer described by `cfg`. The store
    /// is returned as well so the caller can run the bucket bootstrap on it.
    pub fn from_config(cfg: &AppConfig) -> Result<(Self, Arc<dyn ObjectStore>)> {
        let public_origin = cfg
            .public_base_url
            .as_deref()
            .map(origin_of)
            .transpose()
            .context("parsing public base URL")?;

        let (store, signer, public_signer): (
            Arc<dyn ObjectStore>,
            Arc<dyn UrlSigner>,
            Option<Arc<dyn UrlSigner>>,
        ) = match cfg.backend {
            StoreBackend::S3 => {
                let settings = S3Settings {
                    region: cfg.region.clone(),
                    access_key: cfg.access_key.clone(),
                    secret_key: cfg.secret_key.clone(),
                    bucket: cfg.bucket.clone(),
                };
                let store = S3Store::new(&settings, &cfg.endpoint);
                let public = public_origin.as_deref().map(|origin| {
                    Arc::new(S3Store::new(&settings, origin)) as Arc<dyn UrlSigner>
                });
                let signer: Arc<dyn UrlSigner> = Arc::new(store.clone());
                let store: Arc<dyn ObjectStore> = Arc::new(store);
                (store, signer, public)
            }
            StoreBackend::Memory => {
                warn!("using the in-memory backend; objects are lost on restart");
                let store = MemoryStore::new(&cfg.bucket, &cfg.endpoint);
                let public = public_origin
                    .as_deref()
                    .map(|origin| Arc::new(store.signer_for(origin)) as Arc<dyn UrlSigner>);
                let signer: Arc<dyn UrlSigner> = Arc::new(store.signer());
                let store: Arc<dyn ObjectStore> = Arc::new(store);
                (store, signer, public)
            }
        };

        if let Some(origin) = &public_origin {
            info!(origin = %origin, "presigning delivery URLs for the public host");
        }
        if let Some(cdn) = &cfg.cdn_url {
            info!(cdn = %cdn, "serving delivery URLs from the CDN");
        }

        let resolver = DeliveryUrlResolver::new(signer)
            .with_cdn(cfg.cdn_url.clone())
            .with_public_signer(public_signer);
        let media = MediaService::new(store.clone(), resolver);

        let authz: Arc<dyn Authorizer> = match cfg.authz_url.as_deref() {
            Some(url) => Arc::new(
                RemoteAuthorizer::new(url, cfg.request_timeout())
                    .context("building authorization client")?,
            ),
            None => {
                warn!("no authorization service configured; protected routes will answer 401");
                Arc::new(DenyAllAuthorizer)
            }
        };

        Ok((Self::new(media, authz), store))
    }
}

/// Scheme, host and port of `raw`; paths and queries are dropped since a
/// signature only binds the host.
fn origin_of(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid URL `{raw}`"))?;
    let host = url
        .host_str()
        .with_context(|| format!("URL `{raw}` has no host"))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}
