//! Resolution of type references to type models.
//!
//! The provider keeps two model sets: the client-side models the
//! application was built against and the server-side models the backend
//! currently speaks. They usually coincide, but during rollout the server
//! set may be newer, and instances decoded from the wire must be
//! interpreted under the server's definitions.

use crate::{ModelError, ModelResult, TypeModel, TypeRef};
use std::collections::HashMap;

/// Maps type references to their runtime models.
#[derive(Debug, Default, Clone)]
pub struct TypeModelProvider {
    client: HashMap<TypeRef, TypeModel>,
    server: HashMap<TypeRef, TypeModel>,
}

impl TypeModelProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model in the client set.
    pub fn register_client(&mut self, model: TypeModel) -> ModelResult<()> {
        model.validate()?;
        self.client.insert(model.type_ref(), model);
        Ok(())
    }

    /// Registers a model in the server set.
    pub fn register_server(&mut self, model: TypeModel) -> ModelResult<()> {
        model.validate()?;
        self.server.insert(model.type_ref(), model);
        Ok(())
    }

    /// Registers a model in both sets; the common case when client and
    /// server run the same model version.
    pub fn register(&mut self, model: TypeModel) -> ModelResult<()> {
        self.register_client(model.clone())?;
        self.register_server(model)
    }

    /// Loads a JSON array of type models into both sets.
    pub fn register_json(&mut self, json: &str) -> ModelResult<()> {
        let models: Vec<TypeModel> = serde_json::from_str(json)?;
        for model in models {
            self.register(model)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn resolve_client_type_ref(&self, type_ref: &TypeRef) -> Option<&TypeModel> {
        self.client.get(type_ref)
    }

    #[must_use]
    pub fn resolve_server_type_ref(&self, type_ref: &TypeRef) -> Option<&TypeModel> {
        self.server.get(type_ref)
    }

    /// Resolves from the client set, as an error rather than an option.
    pub fn client_model(&self, type_ref: &TypeRef) -> ModelResult<&TypeModel> {
        self.resolve_client_type_ref(type_ref)
            .ok_or_else(|| ModelError::UnknownType(type_ref.clone()))
    }

    /// Resolves from the server set, as an error rather than an option.
    pub fn server_model(&self, type_ref: &TypeRef) -> ModelResult<&TypeModel> {
        self.resolve_server_type_ref(type_ref)
            .ok_or_else(|| ModelError::UnknownType(type_ref.clone()))
    }

    /// All client-side models of persistent kinds.
    pub fn persistent_client_models(&self) -> impl Iterator<Item = &TypeModel> {
        self.client.values().filter(|m| m.kind.is_persistent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cardinality, ElementKind, ModelValue, ValueKind};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn minimal_model(app: &str, type_id: u64) -> TypeModel {
        let id_value = ModelValue {
            id: 1,
            name: "_id".to_string(),
            kind: ValueKind::GeneratedId,
            cardinality: Cardinality::One,
            is_final: true,
            encrypted: false,
        };
        TypeModel {
            id: type_id,
            app: app.to_string(),
            version: 1,
            since: 1,
            name: format!("Type{type_id}"),
            kind: ElementKind::Element,
            encrypted: false,
            values: BTreeMap::from([(1, id_value)]),
            associations: BTreeMap::new(),
        }
    }

    #[test]
    fn register_resolves_in_both_sets() {
        let mut provider = TypeModelProvider::new();
        provider.register(minimal_model("test", 3)).unwrap();

        let type_ref = TypeRef::new("test", 3);
        assert!(provider.resolve_client_type_ref(&type_ref).is_some());
        assert!(provider.resolve_server_type_ref(&type_ref).is_some());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let provider = TypeModelProvider::new();
        let missing = TypeRef::new("test", 999);
        assert!(matches!(
            provider.client_model(&missing),
            Err(ModelError::UnknownType(_))
        ));
    }

    #[test]
    fn server_set_can_diverge_from_client_set() {
        let mut provider = TypeModelProvider::new();
        provider.register_client(minimal_model("test", 3)).unwrap();

        let mut newer = minimal_model("test", 3);
        newer.version = 2;
        provider.register_server(newer).unwrap();

        let type_ref = TypeRef::new("test", 3);
        assert_eq!(provider.client_model(&type_ref).unwrap().version, 1);
        assert_eq!(provider.server_model(&type_ref).unwrap().version, 2);
    }
}
