//! Authorization collaborator.
//!
//! The gateway never decides access itself. It forwards the caller's token
//! and the resource it wants to act on to an external service and acts on
//! the allow/deny answer plus the identity behind the token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// What the caller wants to be allowed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTarget {
    /// Any valid identity will do.
    Authenticated,
    /// Modify the attachments of a post.
    EditPost(String),
}

impl AccessTarget {
    fn kind(&self) -> &'static str {
        match self {
            AccessTarget::Authenticated => "session",
            AccessTarget::EditPost(_) => "post_edit",
        }
    }

    fn id(&self) -> Option<&str> {
        match self {
            AccessTarget::Authenticated => None,
            AccessTarget::EditPost(post_id) => Some(post_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    /// Identity the token belongs to, when the service could resolve one.
    #[serde(default)]
    pub identity: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid or expired credentials")]
    InvalidCredentials,
    #[error("authorization service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn check(
        &self,
        token: &str,
        target: &AccessTarget,
    ) -> Result<AccessDecision, AuthzError>;
}

#[derive(Serialize)]
struct AccessRequest<'a> {
    token: &'a str,
    resource: ResourceRef<'a>,
}

#[derive(Serialize)]
struct ResourceRef<'a> {
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

/// Asks an HTTP authorization service: `POST {base}/v1/access`.
#[derive(Clone)]
pub struct RemoteAuthorizer {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteAuthorizer {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/access", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Authorizer for RemoteAuthorizer {
    async fn check(
        &self,
        token: &str,
        target: &AccessTarget,
    ) -> Result<AccessDecision, AuthzError> {
        let request = AccessRequest {
            token,
            resource: ResourceRef {
                kind: target.kind(),
                id: target.id(),
            },
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "authorization request failed");
                AuthzError::Unavailable(e.to_string())
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthzError::InvalidCredentials);
        }
        if !status.is_success() {
            warn!(%status, "authorization service returned an error");
            return Err(AuthzError::Unavailable(format!("status {status}")));
        }

        let decision = resp
            .json::<AccessDecision>()
            .await
            .map_err(|e| AuthzError::Unavailable(format!("unable to decode decision: {e}")))?;
        debug!(kind = target.kind(), allowed = decision.allowed, "access decision");
        Ok(decision)
    }
}

/// Used when no authorization service is configured: every protected call is
/// refused as unauthenticated.
pub struct DenyAllAuthorizer;

#[async_trait]
impl Authorizer for DenyAllAuthorizer {
    async fn check(
        &self,
        _token: &str,
        _target: &AccessTarget,
    ) -> Result<AccessDecision, AuthzError> {
        Err(AuthzError::InvalidCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    async fn access(Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
        match body["token"].as_str() {
            Some("alice-token") => {
                let allowed = body["resource"]["kind"] == "session"
                    || body["resource"]["id"] == "p1";
                Ok(Json(json!({ "allowed": allowed, "identity": "alice" })))
            }
            Some("broken") => Err(StatusCode::BAD_GATEWAY),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }

    async fn spawn_authz() -> String {
        let app = Router::new().route("/v1/access", post(access));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn remote_decisions_carry_identity() {
        let base = spawn_authz().await;
        let authz = RemoteAuthorizer::new(&base, Duration::from_secs(5)).unwrap();

        let session = authz
            .check("alice-token", &AccessTarget::Authenticated)
            .await
            .unwrap();
        assert!(session.allowed);
        assert_eq!(session.identity.as_deref(), Some("alice"));

        let own = authz
            .check("alice-token", &AccessTarget::EditPost("p1".into()))
            .await
            .unwrap();
        assert!(own.allowed);

        let other = authz
            .check("alice-token", &AccessTarget::EditPost("p2".into()))
            .await
            .unwrap();
        assert!(!other.allowed);
    }

    #[tokio::test]
    async fn remote_401_means_invalid_credentials() {
        let base = spawn_authz().await;
        let authz = RemoteAuthorizer::new(&base, Duration::from_secs(5)).unwrap();
        let err = authz
            .check("stolen", &AccessTarget::Authenticated)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidCredentials));
    }

    #[tokio::test]
    async fn remote_failures_are_unavailable() {
        let base = spawn_authz().await;
        let authz = RemoteAuthorizer::new(&base, Duration::from_secs(5)).unwrap();
        let err = authz
            .check("broken", &AccessTarget::Authenticated)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Unavailable(_)));
    }

    #[tokio::test]
    async fn deny_all_rejects_everything() {
        let err = DenyAllAuthorizer
            .check("anything", &AccessTarget::Authenticated)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidCredentials));
    }
}
