use crate::services::{
    authz::AuthzError, media_service::UploadError, object_store::StorageError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Missing or invalid credentials.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    /// Valid credentials, insufficient rights.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            return AppError::not_found("file not found");
        }
        tracing::error!(error = %err, "storage operation failed");
        AppError::internal(err.to_string())
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::InvalidCredentials => AppError::unauthorized(err.to_string()),
            AuthzError::Unavailable(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Read(_) => AppError::bad_request(err.to_string()),
            UploadError::Store { .. } => AppError::internal(err.to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::bad_request(format!("invalid multipart payload: {}", err.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_status() {
        let missing: AppError = StorageError::ObjectNotFound { key: "k".into() }.into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let backend: AppError = StorageError::backend("put", "k", "timeout").into();
        assert_eq!(backend.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn upload_errors_tell_client_and_store_failures_apart() {
        let read: AppError = UploadError::Read(std::io::Error::other("reset")).into();
        assert_eq!(read.status, StatusCode::BAD_REQUEST);

        let store: AppError = UploadError::Store {
            key: "k".into(),
            source: StorageError::backend("put", "k", "timeout"),
        }
        .into();
        assert_eq!(store.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.message.starts_with("upload failed"));
    }

    #[test]
    fn authz_errors_map_to_status() {
        let invalid: AppError = AuthzError::InvalidCredentials.into();
        assert_eq!(invalid.status, StatusCode::UNAUTHORIZED);

        let down: AppError = AuthzError::Unavailable("refused".into()).into();
        assert_eq!(down.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
