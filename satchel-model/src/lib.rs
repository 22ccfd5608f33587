//! Runtime metamodel for Satchel.
//!
//! Entities are not compiled into the core: they are described at runtime
//! by a [`TypeModel`]: scalar fields with kind/cardinality/encryption
//! flags plus associations to other modeled types. The instance pipeline,
//! the offline cache and the sync engine all interpret these models
//! instead of carrying per-entity code.
//!
//! A [`TypeModelProvider`] resolves a [`TypeRef`] to the model, keeping
//! the client-side and server-side model sets apart (the server may run a
//! newer model version than the client was compiled against).

mod metamodel;
mod provider;

pub use metamodel::{
    AppName, AssociationKind, AttributeId, Cardinality, ElementKind, IdKind, ModelAssociation,
    ModelValue, TypeId, TypeModel, TypeRef, ValueKind,
};
pub use provider::TypeModelProvider;

/// Result type alias using the crate's error type.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Errors raised while building or resolving type models.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown type {0}")]
    UnknownType(TypeRef),

    #[error("type {type_ref} has no attribute {attribute}")]
    UnknownAttribute { type_ref: TypeRef, attribute: String },

    #[error("invalid type model '{name}': {reason}")]
    InvalidModel { name: String, reason: String },

    #[error("model deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}
