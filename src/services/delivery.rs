//! Delivery URL resolution: CDN passthrough or presigned GET.
//!
//! A presigned URL's signature covers the host it was issued for, so the host
//! of an issued URL can never be rewritten afterwards. When clients reach the
//! store through a different hostname than the gateway does, a second signer
//! bound to that public host is configured instead.

use crate::services::object_store::{StorageResult, UrlSigner};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::warn;

/// Expiry used when the caller does not ask for one (10 minutes).
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(600);

/// Longest expiry a presigned URL may carry (7 days).
pub const MAX_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    Cdn,
    PublicSigner,
    Signer,
}

#[derive(Clone, Debug)]
pub struct DeliveryUrl {
    pub url: String,
    pub source: UrlSource,
    /// Effective expiry after clamping. CDN URLs do not expire but still
    /// report what the caller asked for.
    pub expires_in: Duration,
}

#[derive(Clone)]
pub struct DeliveryUrlResolver {
    cdn_base: Option<String>,
    public_signer: Option<Arc<dyn UrlSigner>>,
    signer: Arc<dyn UrlSigner>,
}

impl DeliveryUrlResolver {
    pub fn new(signer: Arc<dyn UrlSigner>) -> Self {
        Self {
            cdn_base: None,
            public_signer: None,
            signer,
        }
    }

    /// Serve `{cdn_base}/{key}` instead of signing. Blank values are ignored.
    pub fn with_cdn(mut self, cdn_base: Option<String>) -> Self {
        self.cdn_base = cdn_base
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty());
        self
    }

    pub fn with_public_signer(mut self, signer: Option<Arc<dyn UrlSigner>>) -> Self {
        self.public_signer = signer;
        self
    }

    /// Cap at [`MAX_URL_EXPIRY`]; a zero expiry means "default".
    pub fn clamp_expiry(expiry: Duration) -> Duration {
        if expiry.is_zero() {
            DEFAULT_URL_EXPIRY
        } else {
            expiry.min(MAX_URL_EXPIRY)
        }
    }

    /// CDN base first, then the public signer, then the internal signer.
    pub async fn resolve(&self, key: &str, expiry: Duration) -> StorageResult<DeliveryUrl> {
        let expires_in = Self::clamp_expiry(expiry);

        if let Some(base) = &self.cdn_base {
            return Ok(DeliveryUrl {
                url: format!("{base}/{key}"),
                source: UrlSource::Cdn,
                expires_in,
            });
        }

        if let Some(public) = &self.public_signer {
            match public.presign_get(key, expires_in).await {
                Ok(url) => {
                    return Ok(DeliveryUrl {
                        url,
                        source: UrlSource::PublicSigner,
                        expires_in,
                    });
                }
                Err(err) => {
                    warn!(key, error = %err, "public presign failed, falling back to internal signer");
                }
            }
        }

        let url = self.signer.presign_get(key, expires_in).await?;
        Ok(DeliveryUrl {
            url,
            source: UrlSource::Signer,
            expires_in,
        })
    }
}

/// Parse the `expires` query value (seconds). Missing, malformed or
/// non-positive values fall back to the default; large ones are capped.
pub fn parse_expires(raw: Option<&str>) -> Duration {
    match raw.map(str::trim).and_then(|v| v.parse::<i64>().ok()) {
        Some(secs) if secs > 0 => {
            DeliveryUrlResolver::clamp_expiry(Duration::from_secs(secs as u64))
        }
        _ => DEFAULT_URL_EXPIRY,
    }
}
