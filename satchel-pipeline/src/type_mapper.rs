//! Mapping between wire form and typed form.
//!
//! The type mapper decodes scalar encodings and enforces cardinality; it
//! never touches encryption. Encrypted fields pass through as opaque
//! ciphertext strings for the crypto mapper to handle.

use crate::codec;
use crate::error::{PipelineError, PipelineResult};
use crate::instance::{
    EncryptedParsedInstance, InstanceValues, ParsedValue, Shape, UntypedInstance, UntypedValue,
};
use crate::pipeline::ModelSide;
use satchel_model::{
    AssociationKind, Cardinality, ElementKind, ModelAssociation, ModelValue, TypeModel,
    TypeModelProvider, TypeRef, ValueKind,
};
use satchel_types::{CustomId, ElementId, GeneratedId, IdTuple};

pub struct TypeMapper<'a> {
    provider: &'a TypeModelProvider,
    side: ModelSide,
}

impl<'a> TypeMapper<'a> {
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

    pub fn from_wire<S: Shape>(
        &self,
        model: &TypeModel,
        wire: &UntypedInstance,
    ) -> PipelineResult<EncryptedParsedInstance<S>> {
        Ok(EncryptedParsedInstance::new(
            self.values_from_wire(model, wire)?,
        ))
    }

    pub fn to_wire<S: Shape>(
        &self,
        model: &TypeModel,
        instance: &EncryptedParsedInstance<S>,
    ) -> PipelineResult<UntypedInstance> {
        self.values_to_wire(model, &instance.values)
    }

    fn values_from_wire(
        &self,
        model: &TypeModel,
        wire: &UntypedInstance,
    ) -> PipelineResult<InstanceValues> {
        let mut out = InstanceValues::default();

        for (id, value) in &model.values {
            let parsed = match wire.get(*id) {
                None => match value.cardinality {
                    Cardinality::One => {
                        return Err(PipelineError::MissingValue {
                            type_name: model.name.clone(),
                            field: value.name.clone(),
                        });
                    }
                    _ => ParsedValue::Null,
                },
                Some(raw) => self.decode_value(model, value, raw)?,
            };
            out.fields.insert(*id, parsed);
        }

        for (id, assoc) in &model.associations {
            let parsed = self.decode_association(model, assoc, wire.get(*id))?;
            out.fields.insert(*id, parsed);
        }

        Ok(out)
    }

    fn decode_value(
        &self,
        model: &TypeModel,
        value: &ModelValue,
        raw: &UntypedValue,
    ) -> PipelineResult<ParsedValue> {
        // The _id of list and blob elements is a two-element array on the
        // wire: [list-or-archive id, element id].
        if value.name == "_id"
            && matches!(model.kind, ElementKind::ListElement | ElementKind::BlobElement)
        {
            return match raw {
                UntypedValue::Strings(parts) if parts.len() == 2 => {
                    let list_id = GeneratedId::parse(&parts[0])?;
                    let element_id = match value.kind {
                        ValueKind::CustomId => ElementId::Custom(CustomId::new(parts[1].clone())),
                        _ => ElementId::Generated(GeneratedId::parse(&parts[1])?),
                    };
                    Ok(ParsedValue::IdTuple(IdTuple::new(list_id, element_id)))
                }
                _ => Err(PipelineError::InvalidWireValue {
                    field: value.name.clone(),
                    reason: "expected a two-element id array".to_string(),
                }),
            };
        }

        let UntypedValue::String(s) = raw else {
            return Err(PipelineError::InvalidWireValue {
                field: value.name.clone(),
                reason: "expected a string".to_string(),
            });
        };

        if value.encrypted {
            // Ciphertext stays opaque until the crypto mapper runs.
            return Ok(ParsedValue::String(s.clone()));
        }

        codec::decode_scalar(value.kind, s).map_err(|reason| PipelineError::InvalidWireValue {
            field: value.name.clone(),
            reason,
        })
    }

    fn decode_association(
        &self,
        model: &TypeModel,
        assoc: &ModelAssociation,
        raw: Option<&UntypedValue>,
    ) -> PipelineResult<ParsedValue> {
        if assoc.kind == AssociationKind::Aggregation {
            let nested_model = self.model(&assoc.ref_type())?;
            let nested = match raw {
                None => Vec::new(),
                Some(UntypedValue::Aggregates(list)) => list
                    .iter()
                    .map(|w| self.values_from_wire(nested_model, w))
                    .collect::<PipelineResult<Vec<_>>>()?,
                Some(UntypedValue::Strings(list)) if list.is_empty() => Vec::new(),
                Some(_) => {
                    return Err(PipelineError::InvalidWireValue {
                        field: assoc.name.clone(),
                        reason: "expected nested instances".to_string(),
                    });
                }
            };
            self.check_cardinality(model, &assoc.name, assoc.cardinality, nested.len())?;
            return Ok(ParsedValue::Aggregates(nested));
        }

        let targets: Vec<ParsedValue> = match (assoc.kind, raw) {
            (_, None) => Vec::new(),
            (
                AssociationKind::ElementAssociation | AssociationKind::ListAssociation,
                Some(UntypedValue::Strings(ids)),
            ) => ids
                .iter()
                .map(|s| self.decode_single_id(assoc, s))
                .collect::<PipelineResult<Vec<_>>>()?,
            (
                AssociationKind::ListElementAssociationGenerated
                | AssociationKind::ListElementAssociationCustom
                | AssociationKind::BlobElementAssociation,
                Some(UntypedValue::IdTuples(tuples)),
            ) => tuples
                .iter()
                .map(|[list, element]| {
                    let list_id = GeneratedId::parse(list)?;
                    let element_id =
                        if assoc.kind == AssociationKind::ListElementAssociationCustom {
                            ElementId::Custom(CustomId::new(element.clone()))
                        } else {
                            ElementId::Generated(GeneratedId::parse(element)?)
                        };
                    Ok(ParsedValue::IdTuple(IdTuple::new(list_id, element_id)))
                })
                .collect::<PipelineResult<Vec<_>>>()?,
            (_, Some(UntypedValue::Strings(list))) if list.is_empty() => Vec::new(),
            (_, Some(_)) => {
                return Err(PipelineError::InvalidWireValue {
                    field: assoc.name.clone(),
                    reason: "association value has the wrong shape".to_string(),
                });
            }
        };

        self.check_cardinality(model, &assoc.name, assoc.cardinality, targets.len())?;
        Ok(ParsedValue::Array(targets))
    }

    fn decode_single_id(
        &self,
        assoc: &ModelAssociation,
        raw: &str,
    ) -> PipelineResult<ParsedValue> {
        let id = if assoc.kind == AssociationKind::ListAssociation {
            // List ids are always generated.
            ElementId::Generated(GeneratedId::parse(raw)?)
        } else {
            match GeneratedId::parse(raw) {
                Ok(generated) => ElementId::Generated(generated),
                Err(_) => ElementId::Custom(CustomId::new(raw)),
            }
        };
        Ok(ParsedValue::Id(id))
    }

    fn check_cardinality(
        &self,
        model: &TypeModel,
        field: &str,
        cardinality: Cardinality,
        count: usize,
    ) -> PipelineResult<()> {
        let ok = match cardinality {
            Cardinality::One => count == 1,
            Cardinality::ZeroOrOne => count <= 1,
            Cardinality::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(PipelineError::InvalidCardinality {
                type_name: model.name.clone(),
                field: field.to_string(),
                reason: format!("{cardinality:?} cardinality with {count} targets"),
            })
        }
    }

    fn values_to_wire(
        &self,
        model: &TypeModel,
        values: &InstanceValues,
    ) -> PipelineResult<UntypedInstance> {
        let mut wire = UntypedInstance::new();

        for (id, value) in &model.values {
            let field = values.fields.get(id).unwrap_or(&ParsedValue::Null);
            match field {
                ParsedValue::Null => {
                    if value.cardinality == Cardinality::One {
                        return Err(PipelineError::MissingValue {
                            type_name: model.name.clone(),
                            field: value.name.clone(),
                        });
                    }
                    // Absent optionals are omitted from the wire.
                }
                ParsedValue::IdTuple(tuple) => {
                    wire.insert(
                        *id,
                        UntypedValue::Strings(vec![
                            tuple.list_id.as_str().to_string(),
                            tuple.element_id.canonical().to_string(),
                        ]),
                    );
                }
                _ if value.encrypted => {
                    let ParsedValue::String(ciphertext) = field else {
                        return Err(PipelineError::InvalidWireValue {
                            field: value.name.clone(),
                            reason: "encrypted field is not ciphertext".to_string(),
                        });
                    };
                    wire.insert(*id, UntypedValue::String(ciphertext.clone()));
                }
                _ => {
                    let encoded = codec::encode_scalar(value.kind, field).map_err(|reason| {
                        PipelineError::InvalidWireValue {
                            field: value.name.clone(),
                            reason,
                        }
                    })?;
                    wire.insert(*id, UntypedValue::String(encoded));
                }
            }
        }

        for (id, assoc) in &model.associations {
            let field = values.fields.get(id);
            let encoded = self.encode_association(model, assoc, field)?;
            wire.insert(*id, encoded);
        }

        Ok(wire)
    }

    fn encode_association(
        &self,
        model: &TypeModel,
        assoc: &ModelAssociation,
        field: Option<&ParsedValue>,
    ) -> PipelineResult<UntypedValue> {
        match field {
            None | Some(ParsedValue::Null) => {
                self.check_cardinality(model, &assoc.name, assoc.cardinality, 0)?;
                Ok(UntypedValue::Strings(Vec::new()))
            }
            Some(ParsedValue::Aggregates(nested)) => {
                self.check_cardinality(model, &assoc.name, assoc.cardinality, nested.len())?;
                let nested_model = self.model(&assoc.ref_type())?;
                let encoded = nested
                    .iter()
                    .map(|values| self.values_to_wire(nested_model, values))
                    .collect::<PipelineResult<Vec<_>>>()?;
                Ok(UntypedValue::Aggregates(encoded))
            }
            Some(ParsedValue::Array(targets)) => {
                self.check_cardinality(model, &assoc.name, assoc.cardinality, targets.len())?;
                if targets
                    .iter()
                    .all(|t| matches!(t, ParsedValue::IdTuple(_)))
                    && !targets.is_empty()
                {
                    let tuples = targets
                        .iter()
                        .map(|t| match t {
                            ParsedValue::IdTuple(tuple) => [
                                tuple.list_id.as_str().to_string(),
                                tuple.element_id.canonical().to_string(),
                            ],
                            _ => unreachable!(),
                        })
                        .collect();
                    Ok(UntypedValue::IdTuples(tuples))
                } else {
                    let ids = targets
                        .iter()
                        .map(|t| match t {
                            ParsedValue::Id(id) => Ok(id.canonical().to_string()),
                            other => Err(PipelineError::InvalidWireValue {
                                field: assoc.name.clone(),
                                reason: format!("unexpected association target {other:?}"),
                            }),
                        })
                        .collect::<PipelineResult<Vec<_>>>()?;
                    Ok(UntypedValue::Strings(ids))
                }
            }
            Some(other) => Err(PipelineError::InvalidWireValue {
                field: assoc.name.clone(),
                reason: format!("association value has the wrong shape: {other:?}"),
            }),
        }
    }
}
