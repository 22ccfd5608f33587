//! Error types for the offline cache.

use satchel_model::TypeRef;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors raised by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] satchel_model::ModelError),

    #[error(transparent)]
    Id(#[from] satchel_types::Error),

    #[error("type {0} is not persistable")]
    NotPersistable(TypeRef),

    #[error("entity key does not match the {0} persistence kind")]
    InvalidKey(TypeRef),

    #[error("range lower bound '{lower}' exceeds upper bound '{upper}'")]
    InvalidRange { lower: String, upper: String },

    #[error("cache handler rejected the mutation: {0}")]
    HandlerRejected(String),

    #[error("connection lock poisoned")]
    Lock,
}
