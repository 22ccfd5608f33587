//! The metamodel: runtime descriptions of entity types.
//!
//! Every persisted or transferred compound type is described by a
//! [`TypeModel`]. Attribute ids are stable across model versions (a
//! rename changes `name`, never `id`), which is what lets stored data
//! keyed by attribute id survive upgrades.

use crate::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Namespace a model belongs to (e.g. "sys", "mail").
pub type AppName = String;

/// Unique id of a type within its app.
pub type TypeId = u64;

/// Unique id of a field or association within its type.
pub type AttributeId = u64;

/// Address of a compound type: app namespace plus type id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    pub app: AppName,
    pub type_id: TypeId,
}

impl TypeRef {
    #[must_use]
    pub fn new(app: impl Into<AppName>, type_id: TypeId) -> Self {
        Self {
            app: app.into(),
            type_id,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app, self.type_id)
    }
}

/// How (and whether) instances of a type are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Entity addressed by a single element id.
    Element,
    /// Entity addressed by (list id, element id); belongs to a list.
    ListElement,
    /// Entity addressed by (archive id, element id); payload lives in the
    /// blob store.
    BlobElement,
    /// Structure embedded in another type; never persisted on its own.
    Aggregated,
    /// Service input/output; transient, never persisted.
    DataTransfer,
}

impl ElementKind {
    /// Whether instances of this kind are stored in the offline cache.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            ElementKind::Element | ElementKind::ListElement | ElementKind::BlobElement
        )
    }
}

/// The basic data type held by a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Number,
    Bytes,
    Date,
    Boolean,
    GeneratedId,
    CustomId,
    CompressedString,
}

/// How many values a field or association can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Optional.
    ZeroOrOne,
    /// Exactly one.
    One,
    /// An ordered sequence; empty is valid and distinct from absent.
    Any,
}

/// Runtime representation of the relationship an association expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// References an [`ElementKind::Element`] by id.
    ElementAssociation,
    /// References a whole list (of list elements) by list id.
    ListAssociation,
    /// References a list element with a generated id by (list id, element id).
    ListElementAssociationGenerated,
    /// References a list element with a custom id by (list id, element id).
    ListElementAssociationCustom,
    /// References a [`ElementKind::BlobElement`] by (archive id, element id).
    BlobElementAssociation,
    /// Embeds instances of an [`ElementKind::Aggregated`] type inline.
    Aggregation,
}

/// Which id encoding a type's elements use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Generated,
    Custom,
}

/// A scalar field on a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelValue {
    pub id: AttributeId,
    pub name: String,
    pub kind: ValueKind,
    pub cardinality: Cardinality,
    /// Whether the client may change the field after creation.
    pub is_final: bool,
    /// Whether the field is encrypted with the instance's session key
    /// before leaving the client.
    pub encrypted: bool,
}

/// An association field on a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAssociation {
    pub id: AttributeId,
    pub name: String,
    pub kind: AssociationKind,
    pub cardinality: Cardinality,
    /// App the referenced type is defined in.
    pub ref_app: AppName,
    /// Type id of the referenced type.
    pub ref_type_id: TypeId,
    pub is_final: bool,
    /// The referenced entity exists only to describe this one and is
    /// removed together with it (detail blobs, attachments, membership
    /// markers). Drives eviction cascades.
    pub dependent: bool,
}

impl ModelAssociation {
    #[must_use]
    pub fn ref_type(&self) -> TypeRef {
        TypeRef::new(self.ref_app.clone(), self.ref_type_id)
    }
}

/// Runtime description of one compound type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeModel {
    pub id: TypeId,
    pub app: AppName,
    /// Model version this definition belongs to.
    pub version: u32,
    /// Model version the type first appeared in.
    pub since: u32,
    pub name: String,
    pub kind: ElementKind,
    /// Whether the type carries encrypted fields. Aggregates do not track
    /// this themselves; see [`TypeModel::is_encrypted`].
    pub encrypted: bool,
    pub values: BTreeMap<AttributeId, ModelValue>,
    pub associations: BTreeMap<AttributeId, ModelAssociation>,
}

impl TypeModel {
    #[must_use]
    pub fn type_ref(&self) -> TypeRef {
        TypeRef::new(self.app.clone(), self.id)
    }

    /// Whether instances of this type may contain encrypted fields.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        if self.kind == ElementKind::Aggregated {
            self.values.values().any(|v| v.encrypted)
        } else {
            self.encrypted
        }
    }

    /// The id encoding this type's elements use, decided by the `_id`
    /// value's kind. Defaults to generated ids.
    #[must_use]
    pub fn id_kind(&self) -> IdKind {
        match self.values.values().find(|v| v.name == "_id").map(|v| v.kind) {
            Some(ValueKind::CustomId) => IdKind::Custom,
            _ => IdKind::Generated,
        }
    }

    pub fn value(&self, attribute_id: AttributeId) -> ModelResult<&ModelValue> {
        self.values
            .get(&attribute_id)
            .ok_or_else(|| ModelError::UnknownAttribute {
                type_ref: self.type_ref(),
                attribute: attribute_id.to_string(),
            })
    }

    pub fn association(&self, attribute_id: AttributeId) -> ModelResult<&ModelAssociation> {
        self.associations
            .get(&attribute_id)
            .ok_or_else(|| ModelError::UnknownAttribute {
                type_ref: self.type_ref(),
                attribute: attribute_id.to_string(),
            })
    }

    /// Looks an attribute id up by its human-readable name, over values
    /// and associations.
    pub fn attribute_id_by_name(&self, name: &str) -> ModelResult<AttributeId> {
        if let Some((id, _)) = self.values.iter().find(|(_, v)| v.name == name) {
            return Ok(*id);
        }
        if let Some((id, _)) = self.associations.iter().find(|(_, a)| a.name == name) {
            return Ok(*id);
        }
        Err(ModelError::UnknownAttribute {
            type_ref: self.type_ref(),
            attribute: name.to_string(),
        })
    }

    /// Checks the structural invariants of the model: attribute ids are
    /// unique across values and associations, and `Any` never appears on
    /// a scalar value.
    pub fn validate(&self) -> ModelResult<()> {
        for (id, value) in &self.values {
            if *id != value.id {
                return Err(self.invalid(format!(
                    "value '{}' keyed under {id} but carries id {}",
                    value.name, value.id
                )));
            }
            if value.cardinality == Cardinality::Any {
                return Err(self.invalid(format!(
                    "scalar value '{}' may not have cardinality Any",
                    value.name
                )));
            }
            if self.associations.contains_key(id) {
                return Err(self.invalid(format!("attribute id {id} used by a value and an association")));
            }
        }
        for (id, assoc) in &self.associations {
            if *id != assoc.id {
                return Err(self.invalid(format!(
                    "association '{}' keyed under {id} but carries id {}",
                    assoc.name, assoc.id
                )));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> ModelError {
        ModelError::InvalidModel {
            name: self.name.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn value(id: AttributeId, name: &str, kind: ValueKind, cardinality: Cardinality) -> ModelValue {
        ModelValue {
            id,
            name: name.to_string(),
            kind,
            cardinality,
            is_final: false,
            encrypted: false,
        }
    }

    fn model_with(values: Vec<ModelValue>, associations: Vec<ModelAssociation>) -> TypeModel {
        TypeModel {
            id: 7,
            app: "test".to_string(),
            version: 1,
            since: 1,
            name: "Thing".to_string(),
            kind: ElementKind::Element,
            encrypted: false,
            values: values.into_iter().map(|v| (v.id, v)).collect(),
            associations: associations.into_iter().map(|a| (a.id, a)).collect(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_models() {
        let model = model_with(
            vec![value(1, "_id", ValueKind::GeneratedId, Cardinality::One)],
            vec![],
        );
        assert!(model.validate().is_ok());
    }

    #[test]
    fn validate_rejects_any_on_scalars() {
        let model = model_with(
            vec![value(1, "tags", ValueKind::String, Cardinality::Any)],
            vec![],
        );
        assert!(model.validate().is_err());
    }

    #[test]
    fn validate_rejects_shared_attribute_ids() {
        let model = model_with(
            vec![value(1, "_id", ValueKind::GeneratedId, Cardinality::One)],
            vec![ModelAssociation {
                id: 1,
                name: "other".to_string(),
                kind: AssociationKind::ElementAssociation,
                cardinality: Cardinality::One,
                ref_app: "test".to_string(),
                ref_type_id: 9,
                is_final: false,
                dependent: false,
            }],
        );
        assert!(model.validate().is_err());
    }

    #[test]
    fn id_kind_follows_the_id_value() {
        let generated = model_with(
            vec![value(1, "_id", ValueKind::GeneratedId, Cardinality::One)],
            vec![],
        );
        assert_eq!(generated.id_kind(), IdKind::Generated);

        let custom = model_with(
            vec![value(1, "_id", ValueKind::CustomId, Cardinality::One)],
            vec![],
        );
        assert_eq!(custom.id_kind(), IdKind::Custom);
    }

    #[test]
    fn aggregates_report_encryption_from_their_fields() {
        let mut model = model_with(
            vec![ModelValue {
                id: 2,
                name: "body".to_string(),
                kind: ValueKind::String,
                cardinality: Cardinality::One,
                is_final: false,
                encrypted: true,
            }],
            vec![],
        );
        model.kind = ElementKind::Aggregated;
        model.encrypted = false;
        assert!(model.is_encrypted());
    }
}
