//! The composed instance pipeline.

use crate::crypto_mapper::CryptoMapper;
use crate::error::PipelineResult;
use crate::instance::{AppInstance, ClientShape, ServerShape, UntypedInstance};
use crate::model_mapper::ModelMapper;
use crate::type_mapper::TypeMapper;
use satchel_crypto::SessionKey;
use satchel_model::{TypeModelProvider, TypeRef};
use std::sync::Arc;
use tracing::debug;

/// Which model set a mapper interprets instances under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSide {
    Client,
    Server,
}

/// Composes the three mappers over a shared model provider.
///
/// Outgoing instances are interpreted under the client models, incoming
/// ones under the server models.
#[derive(Clone)]
pub struct InstancePipeline {
    provider: Arc<TypeModelProvider>,
}

impl InstancePipeline {
    #[must_use]
    pub fn new(provider: Arc<TypeModelProvider>) -> Self {
        Self { provider }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<TypeModelProvider> {
        &self.provider
    }

    /// Maps an application instance to its wire form, encrypting every
    /// field the model marks encrypted.
    pub fn encrypt_for_wire(
        &self,
        type_ref: &TypeRef,
        app: &AppInstance,
        key: Option<&SessionKey>,
    ) -> PipelineResult<UntypedInstance> {
        let model = self.provider.client_model(type_ref)?;
        let parsed = ModelMapper::new(&self.provider, ModelSide::Client)
            .from_app::<ClientShape>(model, app)?;
        let encrypted =
            CryptoMapper::new(&self.provider, ModelSide::Client).encrypt(model, parsed, key)?;
        TypeMapper::new(&self.provider, ModelSide::Client).to_wire(model, &encrypted)
    }

    /// Maps an updated application instance to its wire form. Changes to
    /// final fields are rejected; final encrypted fields re-emit the
    /// ciphertext retained from `prior`.
    pub fn encrypt_update_for_wire(
        &self,
        type_ref: &TypeRef,
        prior: &AppInstance,
        next: &AppInstance,
        key: Option<&SessionKey>,
    ) -> PipelineResult<UntypedInstance> {
        let model = self.provider.client_model(type_ref)?;
        let parsed = ModelMapper::new(&self.provider, ModelSide::Client)
            .from_app_update::<ClientShape>(model, prior, next)?;
        let encrypted =
            CryptoMapper::new(&self.provider, ModelSide::Client).encrypt(model, parsed, key)?;
        TypeMapper::new(&self.provider, ModelSide::Client).to_wire(model, &encrypted)
    }

    /// Maps a wire instance to its application form, decrypting encrypted
    /// fields. Per-field decryption failures land in the result's
    /// `crypto_errors`; the instance itself is always produced.
    pub fn decrypt_from_wire(
        &self,
        type_ref: &TypeRef,
        wire: &UntypedInstance,
        key: Option<&SessionKey>,
    ) -> PipelineResult<AppInstance> {
        let model = self.provider.server_model(type_ref)?;
        let encrypted = TypeMapper::new(&self.provider, ModelSide::Server)
            .from_wire::<ServerShape>(model, wire)?;
        let parsed =
            CryptoMapper::new(&self.provider, ModelSide::Server).decrypt(model, encrypted, key)?;
        let app = ModelMapper::new(&self.provider, ModelSide::Server).to_app(model, parsed)?;
        if !app.crypto_errors.is_empty() {
            debug!(
                type_ref = %type_ref,
                failed_fields = app.crypto_errors.len(),
                "instance decoded with field crypto errors"
            );
        }
        Ok(app)
    }
}
