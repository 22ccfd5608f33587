//! Instance representations at the pipeline's three stages.

use satchel_model::AttributeId;
use satchel_types::{ElementId, IdTuple, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Wire form of an instance: attribute-id strings mapped to raw values.
///
/// No type or cardinality checking has been applied. This is also the
/// form persisted in the offline cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UntypedInstance(pub BTreeMap<String, UntypedValue>);

impl UntypedInstance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attribute_id: AttributeId, value: UntypedValue) {
        self.0.insert(attribute_id.to_string(), value);
    }

    #[must_use]
    pub fn get(&self, attribute_id: AttributeId) -> Option<&UntypedValue> {
        self.0.get(&attribute_id.to_string())
    }
}

/// A raw wire value.
///
/// Association values are always arrays, even for single-target
/// cardinalities. Id tuples travel as two-element string arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UntypedValue {
    String(String),
    Strings(Vec<String>),
    IdTuples(Vec<[String; 2]>),
    Aggregates(Vec<UntypedInstance>),
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    Null,
    String(String),
    Number(i64),
    Bytes(Vec<u8>),
    Date(Timestamp),
    Bool(bool),
    Id(ElementId),
    IdTuple(IdTuple),
    /// Association targets (ids or id tuples), in wire order.
    Array(Vec<ParsedValue>),
    /// Nested aggregated instances.
    Aggregates(Vec<InstanceValues>),
}

/// The field map of one typed instance plus its side channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceValues {
    pub fields: BTreeMap<AttributeId, ParsedValue>,
    /// Fields that failed to decrypt, with the failure reason. The field
    /// itself resolves to [`ParsedValue::Null`].
    pub crypto_errors: BTreeMap<AttributeId, String>,
    /// Original ciphertext of final encrypted fields, spliced back
    /// verbatim when the instance is re-encrypted for an update so final
    /// fields stay byte-stable on the wire.
    pub retained_ciphertexts: BTreeMap<AttributeId, String>,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ClientShape {}
    impl Sealed for super::ServerShape {}
}

/// Marker for which model set a typed instance was interpreted under.
pub trait Shape: sealed::Sealed {}

/// Instances built from application data under the client models.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientShape;
impl Shape for ClientShape {}

/// Instances decoded from the wire under the server models.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerShape;
impl Shape for ServerShape {}

/// A typed instance whose encrypted fields have been decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInstance<S: Shape> {
    pub values: InstanceValues,
    _shape: PhantomData<S>,
}

impl<S: Shape> ParsedInstance<S> {
    #[must_use]
    pub fn new(values: InstanceValues) -> Self {
        Self {
            values,
            _shape: PhantomData,
        }
    }
}

/// A typed instance whose encrypted fields still hold ciphertext.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedParsedInstance<S: Shape> {
    pub values: InstanceValues,
    _shape: PhantomData<S>,
}

impl<S: Shape> EncryptedParsedInstance<S> {
    #[must_use]
    pub fn new(values: InstanceValues) -> Self {
        Self {
            values,
            _shape: PhantomData,
        }
    }
}

/// Application form of an instance: field-name keyed, cardinality
/// flattened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppInstance {
    pub fields: BTreeMap<String, AppValue>,
    /// Field names that failed to decrypt, with the failure reason.
    pub crypto_errors: BTreeMap<String, String>,
    /// Ciphertext of final encrypted fields, by name. Carried so update
    /// round trips re-emit final fields unchanged.
    pub retained_ciphertexts: BTreeMap<String, String>,
}

impl AppInstance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: AppValue) -> &mut Self {
        self.fields.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AppValue> {
        self.fields.get(name)
    }
}

/// A typed application field value.
#[derive(Debug, Clone, PartialEq)]
pub enum AppValue {
    Null,
    String(String),
    Number(i64),
    Bytes(Vec<u8>),
    Date(Timestamp),
    Bool(bool),
    Id(ElementId),
    IdTuple(IdTuple),
    Ids(Vec<ElementId>),
    IdTuples(Vec<IdTuple>),
    Aggregates(Vec<AppInstance>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untyped_value_json_shapes() {
        let json = r#"{"1":"hello","2":["a","b"],"3":[["l1","e1"]],"4":[{"5":"x"}]}"#;
        let instance: UntypedInstance = serde_json::from_str(json).unwrap();

        assert_eq!(instance.get(1), Some(&UntypedValue::String("hello".into())));
        assert_eq!(
            instance.get(2),
            Some(&UntypedValue::Strings(vec!["a".into(), "b".into()]))
        );
        assert_eq!(
            instance.get(3),
            Some(&UntypedValue::IdTuples(vec![["l1".into(), "e1".into()]]))
        );
        assert!(matches!(instance.get(4), Some(UntypedValue::Aggregates(v)) if v.len() == 1));
    }

    #[test]
    fn untyped_instance_json_roundtrip() {
        let mut instance = UntypedInstance::new();
        instance.insert(7, UntypedValue::String("payload".into()));
        instance.insert(8, UntypedValue::Strings(vec![]));

        let json = serde_json::to_string(&instance).unwrap();
        let back: UntypedInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, instance);
    }
}
