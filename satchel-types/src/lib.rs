//! Core type definitions for Satchel.
//!
//! This crate defines the fundamental, model-agnostic types used throughout
//! the replica core:
//! - Element identifiers (timestamp-ordered generated ids, canonical custom ids)
//! - Compound ids for list- and blob-backed entities
//! - Wall-clock timestamps with day arithmetic for retention windows
//!
//! All model-specific types (entity kinds, field schemas, cardinalities)
//! belong in `satchel-model`, not here.

mod ids;
mod timestamp;

pub use ids::{
    CustomId, ElementId, GeneratedId, IdTuple, CUSTOM_MAX_ID, CUSTOM_MIN_ID, GENERATED_ID_LENGTH,
};
pub use timestamp::Timestamp;

/// Groups are identified by server-generated ids.
pub type GroupId = GeneratedId;

/// Batches in a group's event log are identified by server-generated ids,
/// so batch-id order is creation order.
pub type BatchId = GeneratedId;

/// Users are identified by server-generated ids.
pub type UserId = GeneratedId;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid generated id: {0}")]
    InvalidGeneratedId(String),

    #[error("invalid custom id: {0}")]
    InvalidCustomId(String),
}
