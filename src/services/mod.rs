//! Storage, ingest and access services behind the HTTP handlers.
//!
//! `object_store` defines the store seam; `s3_store` and `memory_store`
//! implement it. `media_service` ties the store to the key policy, image
//! metadata extraction and delivery URL resolution.

pub mod authz;
pub mod blurhash;
pub mod bootstrap;
pub mod delivery;
pub mod image_metadata;
pub mod keys;
pub mod media_service;
pub mod memory_store;
pub mod object_store;
pub mod s3_store;
