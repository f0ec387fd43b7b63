//! Caller credentials and the permission checks built on them.

use crate::{
    errors::AppError,
    services::authz::{AccessTarget, Authorizer},
};
use axum::{
    extract::{FromRequestParts, Query},
    http::{header, request::Parts},
};
use serde::Deserialize;
use tracing::debug;

/// Opaque token taken from `Authorization: Bearer …`, or from `?token=` when
/// the header is absent (browsers cannot set headers on `<img>` requests).
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.strip_prefix("Bearer ")
                    .or_else(|| v.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let token = match from_header {
            Some(token) => Some(token),
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
                .filter(|t| !t.trim().is_empty()),
        };

        token
            .map(BearerToken)
            .ok_or_else(|| AppError::unauthorized("missing credentials"))
    }
}

/// The identity behind `token`. Denied or anonymous sessions are 401.
pub async fn require_identity(
    authz: &dyn Authorizer,
    token: &BearerToken,
) -> Result<String, AppError> {
    let decision = authz.check(&token.0, &AccessTarget::Authenticated).await?;
    match decision.identity {
        Some(identity) if decision.allowed => Ok(identity),
        _ => Err(AppError::unauthorized("invalid or expired credentials")),
    }
}

/// Edit permission on a post's attachments.
pub async fn require_post_edit(
    authz: &dyn Authorizer,
    token: &BearerToken,
    post_id: &str,
) -> Result<(), AppError> {
    let decision = authz
        .check(&token.0, &AccessTarget::EditPost(post_id.to_string()))
        .await?;
    if decision.allowed {
        Ok(())
    } else {
        debug!(post_id, identity = ?decision.identity, "post edit denied");
        Err(AppError::forbidden("You are not allowed to perform this action"))
    }
}

/// Only the user themself may change their profile image.
pub async fn require_owner(
    authz: &dyn Authorizer,
    token: &BearerToken,
    user_id: &str,
) -> Result<(), AppError> {
    let identity = require_identity(authz, token).await?;
    if identity == user_id {
        Ok(())
    } else {
        debug!(user_id, identity = %identity, "profile change by another user denied");
        Err(AppError::forbidden("You are not allowed to perform this action"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubAuthorizer;
    use axum::http::{Request, StatusCode};

    async fn extract(req: Request<()>) -> Result<BearerToken, AppError> {
        let (mut parts, _) = req.into_parts();
        BearerToken::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn header_token_wins_over_query() {
        let req = Request::get("/x?token=query")
            .header("Authorization", "Bearer header")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.unwrap().0, "header");
    }

    #[tokio::test]
    async fn query_token_is_a_fallback() {
        let req = Request::get("/x?expires=60&token=query").body(()).unwrap();
        assert_eq!(extract(req).await.unwrap().0, "query");
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let req = Request::get("/x").body(()).unwrap();
        assert_eq!(extract(req).await.unwrap_err().status, StatusCode::UNAUTHORIZED);

        let req = Request::get("/x")
            .header("Authorization", "Basic abc")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.unwrap_err().status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ownership_and_edit_checks() {
        let authz = StubAuthorizer;
        let alice = BearerToken("alice-token".into());
        let bob = BearerToken("bob-token".into());

        assert_eq!(require_identity(&authz, &alice).await.unwrap(), "alice");
        require_owner(&authz, &alice, "alice").await.unwrap();
        assert_eq!(
            require_owner(&authz, &bob, "alice").await.unwrap_err().status,
            StatusCode::FORBIDDEN
        );

        require_post_edit(&authz, &alice, "p1").await.unwrap();
        assert_eq!(
            require_post_edit(&authz, &bob, "p1").await.unwrap_err().status,
            StatusCode::FORBIDDEN
        );

        let stranger = BearerToken("nope".into());
        assert_eq!(
            require_identity(&authz, &stranger).await.unwrap_err().status,
            StatusCode::UNAUTHORIZED
        );
    }
}
