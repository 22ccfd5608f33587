//! Field-level encryption primitives for Satchel.
//!
//! Entity fields are encrypted one by one under a per-group session key
//! with AES-256-GCM. Every encryption draws a fresh random nonce; the
//! nonce is carried in front of the ciphertext so a field value is a
//! single self-contained base64 string on the wire and in the cache.

mod cipher;
mod error;
mod key;

pub use cipher::{decrypt, decrypt_string, encrypt, encrypt_string, EncryptedBytes, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{SessionKey, KEY_SIZE};
