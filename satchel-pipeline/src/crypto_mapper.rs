//! Field-level encryption and decryption of typed instances.
//!
//! Runs between the type mapper and the model mapper. Aggregated
//! instances are encrypted under their owner's session key, recursing
//! field by field.
//!
//! Decryption failures never abort the instance: the failing field
//! resolves to null and the reason is recorded in the instance's
//! `crypto_errors` side channel. Encryption is stricter; an encrypted
//! field without a session key is a hard error.

use crate::codec;
use crate::error::{PipelineError, PipelineResult};
use crate::instance::{
    EncryptedParsedInstance, InstanceValues, ParsedInstance, ParsedValue, Shape,
};
use crate::pipeline::ModelSide;
use satchel_crypto::{decrypt_string, encrypt_string, SessionKey};
use satchel_model::{AssociationKind, TypeModel, TypeModelProvider, TypeRef};
use tracing::warn;

pub struct CryptoMapper<'a> {
    provider: &'a TypeModelProvider,
    side: ModelSide,
}

impl<'a> CryptoMapper<'a> {
    #[must_use]
    pub fn new(provider: &'a TypeModelProvider, side: ModelSide) -> Self {
        Self { provider, side }
    }

    fn model(&self, type_ref: &TypeRef) -> PipelineResult<&'a TypeModel> {
        let resolved = match self.side {
            ModelSide::Client => self.provider.client_model(type_ref),
            ModelSide::Server => self.provider.server_model(type_ref),
        };
        resolved.map_err(Into::into)
    }

    pub fn decrypt<S: Shape>(
        &self,
        model: &TypeModel,
        instance: EncryptedParsedInstance<S>,
        key: Option<&SessionKey>,
    ) -> PipelineResult<ParsedInstance<S>> {
        Ok(ParsedInstance::new(self.decrypt_values(
            model,
            instance.values,
            key,
        )?))
    }

    pub fn encrypt<S: Shape>(
        &self,
        model: &TypeModel,
        instance: ParsedInstance<S>,
        key: Option<&SessionKey>,
    ) -> PipelineResult<EncryptedParsedInstance<S>> {
        Ok(EncryptedParsedInstance::new(self.encrypt_values(
            model,
            instance.values,
            key,
        )?))
    }

    fn decrypt_values(
        &self,
        model: &TypeModel,
        mut values: InstanceValues,
        key: Option<&SessionKey>,
    ) -> PipelineResult<InstanceValues> {
        for (id, value) in &model.values {
            if !value.encrypted {
                continue;
            }
            let Some(field) = values.fields.get(id) else {
                continue;
            };
            let ParsedValue::String(ciphertext) = field else {
                continue;
            };
            let ciphertext = ciphertext.clone();

            let decrypted = match key {
                None => Err("session key unavailable".to_string()),
                Some(key) => decrypt_string(key, &ciphertext)
                    .map_err(|e| e.to_string())
                    .and_then(|plaintext| codec::decode_scalar(value.kind, &plaintext)),
            };

            match decrypted {
                Ok(parsed) => {
                    if value.is_final {
                        values.retained_ciphertexts.insert(*id, ciphertext);
                    }
                    values.fields.insert(*id, parsed);
                }
                Err(reason) => {
                    warn!(
                        type_name = %model.name,
                        field = %value.name,
                        %reason,
                        "field decryption failed"
                    );
                    values.fields.insert(*id, ParsedValue::Null);
                    values.crypto_errors.insert(*id, reason);
                }
            }
        }

        for (id, assoc) in &model.associations {
            if assoc.kind != AssociationKind::Aggregation {
                continue;
            }
            let Some(ParsedValue::Aggregates(nested)) = values.fields.remove(id) else {
                continue;
            };
            let nested_model = self.model(&assoc.ref_type())?;
            let decrypted = nested
                .into_iter()
                .map(|v| self.decrypt_values(nested_model, v, key))
                .collect::<PipelineResult<Vec<_>>>()?;
            values.fields.insert(*id, ParsedValue::Aggregates(decrypted));
        }

        Ok(values)
    }

    fn encrypt_values(
        &self,
        model: &TypeModel,
        mut values: InstanceValues,
        key: Option<&SessionKey>,
    ) -> PipelineResult<InstanceValues> {
        for (id, value) in &model.values {
            if !value.encrypted {
                continue;
            }
            let Some(field) = values.fields.get(id) else {
                continue;
            };
            if matches!(field, ParsedValue::Null) {
                continue;
            }

            // Final encrypted fields re-emit their original ciphertext so
            // they stay byte-stable across updates.
            if value.is_final {
                if let Some(retained) = values.retained_ciphertexts.get(id) {
                    let retained = retained.clone();
                    values.fields.insert(*id, ParsedValue::String(retained));
                    continue;
                }
            }

            let Some(key) = key else {
                return Err(PipelineError::MissingSessionKey {
                    type_name: model.name.clone(),
                });
            };
            let plaintext = codec::encode_scalar(value.kind, field).map_err(|reason| {
                PipelineError::InvalidWireValue {
                    field: value.name.clone(),
                    reason,
                }
            })?;
            let ciphertext = encrypt_string(key, &plaintext)?;
            values.fields.insert(*id, ParsedValue::String(ciphertext));
        }

        for (id, assoc) in &model.associations {
            if assoc.kind != AssociationKind::Aggregation {
                continue;
            }
            let Some(ParsedValue::Aggregates(nested)) = values.fields.remove(id) else {
                continue;
            };
            let nested_model = self.model(&assoc.ref_type())?;
            let encrypted = nested
                .into_iter()
                .map(|v| self.encrypt_values(nested_model, v, key))
                .collect::<PipelineResult<Vec<_>>>()?;
            values.fields.insert(*id, ParsedValue::Aggregates(encrypted));
        }

        Ok(values)
    }
}
