//! Mapping between typed form and application form.
//!
//! Attribute ids become field names, single-target cardinalities are
//! flattened, and aggregates become nested application instances. The
//! reverse direction rejects unknown field names and, on the update
//! path, any change to a final field.

use crate::error::{PipelineError, PipelineResult};
use crate::instance::{AppInstance, AppValue, InstanceValues, ParsedInstance, ParsedValue, Shape};
use crate::pipeline::ModelSide;
use satchel_model::{
    AssociationKind, Cardinality, ModelAssociation, TypeModel, TypeModelProvider, TypeRef,
};
use satchel_types::{ElementId, IdTuple};
use std::collections::BTreeMap;

pub struct ModelMapper<'a> {
    provider: &'a TypeModelProvider,
    side: ModelSide,
}

impl<'a> ModelMapper<'a> {
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

    pub fn to_app<S: Shape>(
        &self,
        model: &TypeModel,
        instance: ParsedInstance<S>,
    ) -> PipelineResult<AppInstance> {
        self.values_to_app(model, instance.values)
    }

    pub fn from_app<S: Shape>(
        &self,
        model: &TypeModel,
        app: &AppInstance,
    ) -> PipelineResult<ParsedInstance<S>> {
        Ok(ParsedInstance::new(self.values_from_app(model, app)?))
    }

    /// Maps an updated instance, rejecting changes to final fields.
    /// Retained ciphertexts of the prior instance carry over so final
    /// encrypted fields re-encrypt byte-identically.
    pub fn from_app_update<S: Shape>(
        &self,
        model: &TypeModel,
        prior: &AppInstance,
        next: &AppInstance,
    ) -> PipelineResult<ParsedInstance<S>> {
        for value in model.values.values().filter(|v| v.is_final) {
            if prior.fields.get(&value.name) != next.fields.get(&value.name) {
                return Err(PipelineError::FinalFieldModified {
                    field: value.name.clone(),
                });
            }
        }
        for assoc in model.associations.values().filter(|a| a.is_final) {
            if prior.fields.get(&assoc.name) != next.fields.get(&assoc.name) {
                return Err(PipelineError::FinalFieldModified {
                    field: assoc.name.clone(),
                });
            }
        }

        let mut parsed = self.values_from_app(model, next)?;
        for (name, ciphertext) in &prior.retained_ciphertexts {
            let id = model.attribute_id_by_name(name)?;
            parsed
                .retained_ciphertexts
                .entry(id)
                .or_insert_with(|| ciphertext.clone());
        }
        Ok(ParsedInstance::new(parsed))
    }

    fn values_to_app(
        &self,
        model: &TypeModel,
        mut values: InstanceValues,
    ) -> PipelineResult<AppInstance> {
        let mut app = AppInstance::new();

        for (id, value) in &model.values {
            let field = values.fields.remove(id).unwrap_or(ParsedValue::Null);
            let mapped = match field {
                ParsedValue::Null => AppValue::Null,
                ParsedValue::String(s) => AppValue::String(s),
                ParsedValue::Number(n) => AppValue::Number(n),
                ParsedValue::Bytes(b) => AppValue::Bytes(b),
                ParsedValue::Date(d) => AppValue::Date(d),
                ParsedValue::Bool(b) => AppValue::Bool(b),
                ParsedValue::Id(id) => AppValue::Id(id),
                ParsedValue::IdTuple(tuple) => AppValue::IdTuple(tuple),
                other => {
                    return Err(PipelineError::InvalidWireValue {
                        field: value.name.clone(),
                        reason: format!("unexpected scalar value {other:?}"),
                    });
                }
            };
            app.set(value.name.clone(), mapped);
        }

        for (id, assoc) in &model.associations {
            let field = values.fields.remove(id);
            let mapped = self.association_to_app(assoc, field)?;
            app.set(assoc.name.clone(), mapped);
        }

        app.crypto_errors = map_keys_to_names(model, values.crypto_errors)?;
        app.retained_ciphertexts = map_keys_to_names(model, values.retained_ciphertexts)?;
        Ok(app)
    }

    fn association_to_app(
        &self,
        assoc: &ModelAssociation,
        field: Option<ParsedValue>,
    ) -> PipelineResult<AppValue> {
        if assoc.kind == AssociationKind::Aggregation {
            let nested = match field {
                Some(ParsedValue::Aggregates(nested)) => nested,
                None | Some(ParsedValue::Null) => Vec::new(),
                Some(other) => {
                    return Err(PipelineError::InvalidWireValue {
                        field: assoc.name.clone(),
                        reason: format!("unexpected aggregate value {other:?}"),
                    });
                }
            };
            let nested_model = self.model(&assoc.ref_type())?;
            let instances = nested
                .into_iter()
                .map(|v| self.values_to_app(nested_model, v))
                .collect::<PipelineResult<Vec<_>>>()?;
            return Ok(AppValue::Aggregates(instances));
        }

        let targets = match field {
            Some(ParsedValue::Array(targets)) => targets,
            None | Some(ParsedValue::Null) => Vec::new(),
            Some(other) => {
                return Err(PipelineError::InvalidWireValue {
                    field: assoc.name.clone(),
                    reason: format!("unexpected association value {other:?}"),
                });
            }
        };

        // Single-target cardinalities flatten to the target itself.
        if assoc.cardinality != Cardinality::Any {
            return Ok(match targets.into_iter().next() {
                None => AppValue::Null,
                Some(ParsedValue::Id(id)) => AppValue::Id(id),
                Some(ParsedValue::IdTuple(tuple)) => AppValue::IdTuple(tuple),
                Some(other) => {
                    return Err(PipelineError::InvalidWireValue {
                        field: assoc.name.clone(),
                        reason: format!("unexpected association target {other:?}"),
                    });
                }
            });
        }

        let tuple_targets = matches!(
            assoc.kind,
            AssociationKind::ListElementAssociationGenerated
                | AssociationKind::ListElementAssociationCustom
                | AssociationKind::BlobElementAssociation
        );
        if tuple_targets {
            let tuples = targets
                .into_iter()
                .map(|t| match t {
                    ParsedValue::IdTuple(tuple) => Ok(tuple),
                    other => Err(PipelineError::InvalidWireValue {
                        field: assoc.name.clone(),
                        reason: format!("unexpected association target {other:?}"),
                    }),
                })
                .collect::<PipelineResult<Vec<IdTuple>>>()?;
            Ok(AppValue::IdTuples(tuples))
        } else {
            let ids = targets
                .into_iter()
                .map(|t| match t {
                    ParsedValue::Id(id) => Ok(id),
                    other => Err(PipelineError::InvalidWireValue {
                        field: assoc.name.clone(),
                        reason: format!("unexpected association target {other:?}"),
                    }),
                })
                .collect::<PipelineResult<Vec<ElementId>>>()?;
            Ok(AppValue::Ids(ids))
        }
    }

    fn values_from_app(
        &self,
        model: &TypeModel,
        app: &AppInstance,
    ) -> PipelineResult<InstanceValues> {
        for name in app.fields.keys() {
            if model.attribute_id_by_name(name).is_err() {
                return Err(PipelineError::UnknownField {
                    type_name: model.name.clone(),
                    field: name.clone(),
                });
            }
        }

        let mut values = InstanceValues::default();

        for (id, value) in &model.values {
            let field = app.fields.get(&value.name);
            let parsed = match field {
                None | Some(AppValue::Null) => {
                    if value.cardinality == Cardinality::One {
                        return Err(PipelineError::MissingValue {
                            type_name: model.name.clone(),
                            field: value.name.clone(),
                        });
                    }
                    ParsedValue::Null
                }
                Some(AppValue::String(s)) => ParsedValue::String(s.clone()),
                Some(AppValue::Number(n)) => ParsedValue::Number(*n),
                Some(AppValue::Bytes(b)) => ParsedValue::Bytes(b.clone()),
                Some(AppValue::Date(d)) => ParsedValue::Date(*d),
                Some(AppValue::Bool(b)) => ParsedValue::Bool(*b),
                Some(AppValue::Id(element_id)) => ParsedValue::Id(element_id.clone()),
                Some(AppValue::IdTuple(tuple)) => ParsedValue::IdTuple(tuple.clone()),
                Some(other) => {
                    return Err(PipelineError::InvalidWireValue {
                        field: value.name.clone(),
                        reason: format!("unexpected scalar value {other:?}"),
                    });
                }
            };
            values.fields.insert(*id, parsed);
        }

        for (id, assoc) in &model.associations {
            let field = app.fields.get(&assoc.name);
            let parsed = self.association_from_app(model, assoc, field)?;
            values.fields.insert(*id, parsed);
        }

        for (name, ciphertext) in &app.retained_ciphertexts {
            let id = model.attribute_id_by_name(name)?;
            values.retained_ciphertexts.insert(id, ciphertext.clone());
        }

        Ok(values)
    }

    fn association_from_app(
        &self,
        model: &TypeModel,
        assoc: &ModelAssociation,
        field: Option<&AppValue>,
    ) -> PipelineResult<ParsedValue> {
        if assoc.kind == AssociationKind::Aggregation {
            let nested = match field {
                None | Some(AppValue::Null) => &[][..],
                Some(AppValue::Aggregates(nested)) => nested.as_slice(),
                Some(other) => {
                    return Err(PipelineError::InvalidWireValue {
                        field: assoc.name.clone(),
                        reason: format!("unexpected aggregate value {other:?}"),
                    });
                }
            };
            check_cardinality(model, &assoc.name, assoc.cardinality, nested.len())?;
            let nested_model = self.model(&assoc.ref_type())?;
            let mapped = nested
                .iter()
                .map(|instance| self.values_from_app(nested_model, instance))
                .collect::<PipelineResult<Vec<_>>>()?;
            return Ok(ParsedValue::Aggregates(mapped));
        }

        let targets: Vec<ParsedValue> = match field {
            None | Some(AppValue::Null) => Vec::new(),
            Some(AppValue::Id(id)) => vec![ParsedValue::Id(id.clone())],
            Some(AppValue::IdTuple(tuple)) => vec![ParsedValue::IdTuple(tuple.clone())],
            Some(AppValue::Ids(ids)) => {
                ids.iter().cloned().map(ParsedValue::Id).collect()
            }
            Some(AppValue::IdTuples(tuples)) => {
                tuples.iter().cloned().map(ParsedValue::IdTuple).collect()
            }
            Some(other) => {
                return Err(PipelineError::InvalidWireValue {
                    field: assoc.name.clone(),
                    reason: format!("unexpected association value {other:?}"),
                });
            }
        };
        check_cardinality(model, &assoc.name, assoc.cardinality, targets.len())?;
        Ok(ParsedValue::Array(targets))
    }
}

fn map_keys_to_names(
    model: &TypeModel,
    map: BTreeMap<satchel_model::AttributeId, String>,
) -> PipelineResult<BTreeMap<String, String>> {
    map.into_iter()
        .map(|(id, v)| {
            let name = model
                .value(id)
                .map(|value| value.name.clone())
                .or_else(|_| model.association(id).map(|a| a.name.clone()))?;
            Ok((name, v))
        })
        .collect()
}

fn check_cardinality(
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
