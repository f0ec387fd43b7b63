//! HTTP handlers, grouped by the kind of object they serve.

pub mod auth;
pub mod health_handlers;
pub mod object_handlers;
pub mod post_handlers;
pub mod profile_handlers;
