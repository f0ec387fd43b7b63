//! Defines routes for the media storage API.
//!
//! ## Structure
//! Everything below lives under `/api/v2/storage`.
//!
//! - **Post attachments**
//!   - `POST   /posts/{id}` — upload (edit permission)
//!   - `GET    /posts/{id}` — list attachments (authenticated)
//!   - `GET    /posts/{id}/{fileName}` — stream (public)
//!   - `HEAD   /posts/{id}/{fileName}` — headers only (authenticated)
//!   - `PUT    /posts/{id}/{fileName}` — replace in place (edit permission)
//!   - `DELETE /posts/{id}/{fileName}` — delete (edit permission)
//!   - `GET    /posts/{id}/{fileName}/meta` — JSON metadata + URL (public)
//!   - `GET    /posts/{id}/{fileName}/url` — delivery URL (public)
//!
//! - **Profile images**
//!   - `POST|PUT|DELETE /profiles/{userId}/profile` — owner only
//!   - `GET    /profiles/{userId}/profile` — stream (public)
//!   - `HEAD   /profiles/{userId}/profile` — headers only (authenticated)
//!   - `GET    /profiles/{userId}/profile/meta`, `/url` — public
//!
//! Health probes `/healthz` and `/readyz` are mounted at the root.

use crate::{
    config::AppConfig,
    handlers::{
        health_handlers::{healthz, readyz},
        post_handlers::{
            delete_post_file, get_post_file, head_post_file, list_post_files, post_file_meta,
            post_file_url, replace_post_file, upload_post_file,
        },
        profile_handlers::{
            delete_profile_image, get_profile_image, head_profile_image, profile_meta,
            profile_url, update_profile_image, upload_profile_image,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, MatchedPath, Request},
    http::StatusCode,
    routing::get,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub const API_BASE: &str = "/api/v2/storage";

fn storage_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/posts/{id}",
            get(list_post_files).post(upload_post_file),
        )
        .route(
            "/posts/{id}/{file_name}",
            get(get_post_file)
                .head(head_post_file)
                .put(replace_post_file)
                .delete(delete_post_file),
        )
        .route("/posts/{id}/{file_name}/meta", get(post_file_meta))
        .route("/posts/{id}/{file_name}/url", get(post_file_url))
        .route(
            "/profiles/{user_id}/profile",
            get(get_profile_image)
                .head(head_profile_image)
                .post(upload_profile_image)
                .put(update_profile_image)
                .delete(delete_profile_image),
        )
        .route("/profiles/{user_id}/profile/meta", get(profile_meta))
        .route("/profiles/{user_id}/profile/url", get(profile_url))
}

/// Build the full router: storage API, health probes and request layers.
pub fn routes(cfg: &AppConfig) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest(API_BASE, storage_routes())
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            cfg.request_timeout(),
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    // Path only: the query may carry a `token`.
                    let path = req.uri().path();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, path, matched_path)
                })
                .on_failure(()),
        )
}
