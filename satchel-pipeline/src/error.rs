//! Error types for the instance pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors raised while mapping instances between forms.
///
/// Per-field decryption failures are NOT represented here; they are
/// recorded in the instance's `crypto_errors` side channel so a single
/// undecryptable field never discards the rest of the instance.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Model(#[from] satchel_model::ModelError),

    #[error(transparent)]
    Id(#[from] satchel_types::Error),

    #[error(transparent)]
    Crypto(#[from] satchel_crypto::CryptoError),

    #[error("{type_name}: required field '{field}' is missing")]
    MissingValue { type_name: String, field: String },

    #[error("{type_name}: unknown field '{field}'")]
    UnknownField { type_name: String, field: String },

    #[error("{type_name}: field '{field}' violates its cardinality: {reason}")]
    InvalidCardinality {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("field '{field}' has an invalid wire value: {reason}")]
    InvalidWireValue { field: String, reason: String },

    #[error("{type_name} has encrypted fields but no session key was provided")]
    MissingSessionKey { type_name: String },

    #[error("field '{field}' is final and cannot be modified")]
    FinalFieldModified { field: String },
}
