//! Profile image handlers: one `profiles/{userId}/profile` object per user.
//! Uploading and updating are the same write; only the status code differs.

use crate::{
    errors::AppError,
    handlers::{
        auth::{BearerToken, require_identity, require_owner},
        object_handlers::{
            ExpiresQuery, delete_object, ensure_segments_safe, head_object, object_meta,
            object_url, stream_object, upload_file_field,
        },
    },
    services::keys::Resource,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Older clients send the image as `file`.
const PROFILE_FIELDS: &[&str] = &["profile_pic", "file"];

fn profile_key(user_id: &str) -> Result<String, AppError> {
    ensure_segments_safe(&[user_id])?;
    Ok(Resource::ProfileImage { user_id }.object_key())
}

async fn write_profile(
    state: &AppState,
    user_id: &str,
    token: &BearerToken,
    multipart: &mut Multipart,
    status: StatusCode,
) -> Result<Response, AppError> {
    let key = profile_key(user_id)?;
    require_owner(state.authz.as_ref(), token, user_id).await?;

    let uploaded = upload_file_field(&state.media, multipart, PROFILE_FIELDS, |_| key).await?;
    Ok((status, Json(uploaded)).into_response())
}

/// `POST /profiles/{userId}/profile`
pub async fn upload_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    token: BearerToken,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    write_profile(&state, &user_id, &token, &mut multipart, StatusCode::CREATED).await
}

/// `PUT /profiles/{userId}/profile`
pub async fn update_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    token: BearerToken,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    write_profile(&state, &user_id, &token, &mut multipart, StatusCode::OK).await
}

/// `GET /profiles/{userId}/profile`
pub async fn get_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    stream_object(&state.media, &profile_key(&user_id)?).await
}

/// `HEAD /profiles/{userId}/profile`
pub async fn head_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    token: BearerToken,
) -> Result<Response, AppError> {
    let key = profile_key(&user_id)?;
    require_identity(state.authz.as_ref(), &token).await?;
    head_object(&state.media, &key).await
}

/// `GET /profiles/{userId}/profile/meta`
pub async fn profile_meta(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ExpiresQuery>,
) -> Result<Response, AppError> {
    object_meta(&state.media, &profile_key(&user_id)?, &query).await
}

/// `GET /profiles/{userId}/profile/url`
pub async fn profile_url(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ExpiresQuery>,
) -> Result<Response, AppError> {
    object_url(&state.media, &profile_key(&user_id)?, &query).await
}

/// `DELETE /profiles/{userId}/profile`
pub async fn delete_profile_image(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    token: BearerToken,
) -> Result<Response, AppError> {
    let key = profile_key(&user_id)?;
    require_owner(state.authz.as_ref(), &token, &user_id).await?;
    delete_object(&state.media, &key).await
}
