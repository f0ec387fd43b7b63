//! Core data models for the media gateway.
//!
//! These entities describe stored objects and the image attributes derived
//! from them at ingest. They serialize naturally as JSON via `serde`.

pub mod metadata;
pub mod object;
