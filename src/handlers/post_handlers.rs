//! Post attachment handlers: `posts/{postId}/{fileName}` objects.
//!
//! Reads of a single file are public; uploads, replacements and deletes need
//! edit permission on the post, listing and HEAD need any valid session.

use crate::{
    errors::AppError,
    handlers::{
        auth::{BearerToken, require_identity, require_post_edit},
        object_handlers::{
            ExpiresQuery, delete_object, ensure_segments_safe, head_object, object_meta,
            object_url, stream_object, upload_file_field,
        },
    },
    services::keys::{Resource, post_prefix},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

const FILE_FIELD: &str = "file";

fn file_key(post_id: &str, file_name: &str) -> Result<String, AppError> {
    ensure_segments_safe(&[post_id, file_name])?;
    Ok(Resource::PostFile { post_id, file_name }.object_key())
}

/// `POST /posts/{id}`: store a new attachment under a generated name.
pub async fn upload_post_file(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    token: BearerToken,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    ensure_segments_safe(&[&post_id])?;
    require_post_edit(state.authz.as_ref(), &token, &post_id).await?;

    let uploaded = upload_file_field(&state.media, &mut multipart, &[FILE_FIELD], |original| {
        Resource::PostAttachment {
            post_id: &post_id,
            original_name: original,
        }
        .object_key()
    })
    .await?;

    Ok((StatusCode::CREATED, Json(uploaded)).into_response())
}

/// `PUT /posts/{id}/{fileName}`: replace an attachment in place.
pub async fn replace_post_file(
    State(state): State<AppState>,
    Path((post_id, file_name)): Path<(String, String)>,
    token: BearerToken,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let key = file_key(&post_id, &file_name)?;
    require_post_edit(state.authz.as_ref(), &token, &post_id).await?;

    let uploaded =
        upload_file_field(&state.media, &mut multipart, &[FILE_FIELD], |_| key).await?;
    Ok((StatusCode::OK, Json(uploaded)).into_response())
}

/// `GET /posts/{id}`: every attachment of the post.
pub async fn list_post_files(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    token: BearerToken,
) -> Result<Response, AppError> {
    ensure_segments_safe(&[&post_id])?;
    require_identity(state.authz.as_ref(), &token).await?;

    let files = state.media.list(&post_prefix(&post_id)).await?;
    Ok(Json(json!({ "files": files })).into_response())
}

/// `GET /posts/{id}/{fileName}`
pub async fn get_post_file(
    State(state): State<AppState>,
    Path((post_id, file_name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let key = file_key(&post_id, &file_name)?;
    stream_object(&state.media, &key).await
}

/// `HEAD /posts/{id}/{fileName}`
pub async fn head_post_file(
    State(state): State<AppState>,
    Path((post_id, file_name)): Path<(String, String)>,
    token: BearerToken,
) -> Result<Response, AppError> {
    let key = file_key(&post_id, &file_name)?;
    require_identity(state.authz.as_ref(), &token).await?;
    head_object(&state.media, &key).await
}

/// `GET /posts/{id}/{fileName}/meta`
pub async fn post_file_meta(
    State(state): State<AppState>,
    Path((post_id, file_name)): Path<(String, String)>,
    Query(query): Query<ExpiresQuery>,
) -> Result<Response, AppError> {
    let key = file_key(&post_id, &file_name)?;
    object_meta(&state.media, &key, &query).await
}

/// `GET /posts/{id}/{fileName}/url`
pub async fn post_file_url(
    State(state): State<AppState>,
    Path((post_id, file_name)): Path<(String, String)>,
    Query(query): Query<ExpiresQuery>,
) -> Result<Response, AppError> {
    let key = file_key(&post_id, &file_name)?;
    object_url(&state.media, &key, &query).await
}

/// `DELETE /posts/{id}/{fileName}`
pub async fn delete_post_file(
    State(state): State<AppState>,
    Path((post_id, file_name)): Path<(String, String)>,
    token: BearerToken,
) -> Result<Response, AppError> {
    let key = file_key(&post_id, &file_name)?;
    require_post_edit(state.authz.as_ref(), &token, &post_id).await?;
    delete_object(&state.media, &key).await
}
