//! Error types for the crypto layer.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Errors raised by encryption and decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}
