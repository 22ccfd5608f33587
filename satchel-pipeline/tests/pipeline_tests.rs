//! End-to-end tests for the instance pipeline over a small note model.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use satchel_crypto::{encrypt_string, SessionKey};
use satchel_model::{
    AssociationKind, Cardinality, ElementKind, ModelAssociation, ModelValue, TypeModel,
    TypeModelProvider, TypeRef, ValueKind,
};
use satchel_pipeline::{
    AppInstance, AppValue, InstancePipeline, PipelineError, UntypedInstance, UntypedValue,
};
use satchel_types::{CustomId, ElementId, GeneratedId, IdTuple, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;

const NOTE_TYPE: u64 = 10;
const BODY_TYPE: u64 = 20;

const ID_ATTR: u64 = 1;
const SUBJECT_ATTR: u64 = 2;
const SENT_DATE_ATTR: u64 = 3;
const CONFIDENTIAL_ATTR: u64 = 4;
const SERIAL_ATTR: u64 = 5;
const BODY_ATTR: u64 = 6;
const ATTACHMENTS_ATTR: u64 = 7;

fn value(
    id: u64,
    name: &str,
    kind: ValueKind,
    cardinality: Cardinality,
    encrypted: bool,
    is_final: bool,
) -> (u64, ModelValue) {
    (
        id,
        ModelValue {
            id,
            name: name.to_string(),
            kind,
            cardinality,
            is_final,
            encrypted,
        },
    )
}

fn note_model() -> TypeModel {
    TypeModel {
        id: NOTE_TYPE,
        app: "notes".to_string(),
        version: 1,
        since: 1,
        name: "Note".to_string(),
        kind: ElementKind::ListElement,
        encrypted: true,
        values: BTreeMap::from([
            value(ID_ATTR, "_id", ValueKind::GeneratedId, Cardinality::One, false, true),
            value(SUBJECT_ATTR, "subject", ValueKind::String, Cardinality::ZeroOrOne, true, false),
            value(SENT_DATE_ATTR, "sentDate", ValueKind::Date, Cardinality::One, false, false),
            value(CONFIDENTIAL_ATTR, "confidential", ValueKind::Boolean, Cardinality::ZeroOrOne, true, false),
            value(SERIAL_ATTR, "serial", ValueKind::Number, Cardinality::ZeroOrOne, true, true),
        ]),
        associations: BTreeMap::from([
            (
                BODY_ATTR,
                ModelAssociation {
                    id: BODY_ATTR,
                    name: "body".to_string(),
                    kind: AssociationKind::Aggregation,
                    cardinality: Cardinality::One,
                    ref_app: "notes".to_string(),
                    ref_type_id: BODY_TYPE,
                    is_final: false,
                    dependent: true,
                },
            ),
            (
                ATTACHMENTS_ATTR,
                ModelAssociation {
                    id: ATTACHMENTS_ATTR,
                    name: "attachments".to_string(),
                    kind: AssociationKind::BlobElementAssociation,
                    cardinality: Cardinality::Any,
                    ref_app: "notes".to_string(),
                    ref_type_id: 30,
                    is_final: false,
                    dependent: true,
                },
            ),
        ]),
    }
}

fn body_model() -> TypeModel {
    TypeModel {
        id: BODY_TYPE,
        app: "notes".to_string(),
        version: 1,
        since: 1,
        name: "NoteBody".to_string(),
        kind: ElementKind::Aggregated,
        encrypted: true,
        values: BTreeMap::from([
            value(1, "_id", ValueKind::CustomId, Cardinality::One, false, true),
            value(2, "text", ValueKind::String, Cardinality::ZeroOrOne, true, false),
        ]),
        associations: BTreeMap::new(),
    }
}

fn pipeline() -> InstancePipeline {
    let mut provider = TypeModelProvider::new();
    provider.register(note_model()).unwrap();
    provider.register(body_model()).unwrap();
    InstancePipeline::new(Arc::new(provider))
}

fn note_type_ref() -> TypeRef {
    TypeRef::new("notes", NOTE_TYPE)
}

fn id_tuple() -> IdTuple {
    IdTuple::new(
        GeneratedId::from_timestamp(Timestamp::from_millis(1_700_000_000_000), 1),
        GeneratedId::from_timestamp(Timestamp::from_millis(1_700_000_100_000), 2),
    )
}

fn app_note(subject: &str) -> AppInstance {
    let mut body = AppInstance::new();
    body.set("_id", AppValue::Id(ElementId::Custom(CustomId::new("agg1"))));
    body.set("text", AppValue::String("the full text".to_string()));

    let mut note = AppInstance::new();
    note.set("_id", AppValue::IdTuple(id_tuple()));
    note.set("subject", AppValue::String(subject.to_string()));
    note.set("sentDate", AppValue::Date(Timestamp::from_millis(1_700_000_000_000)));
    note.set("confidential", AppValue::Bool(true));
    note.set("serial", AppValue::Number(77));
    note.set("body", AppValue::Aggregates(vec![body]));
    note.set("attachments", AppValue::IdTuples(vec![]));
    note
}

#[test]
fn encrypt_decrypt_roundtrip() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let note = app_note("hello");

    let wire = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap();
    let back = pipeline
        .decrypt_from_wire(&note_type_ref(), &wire, Some(&key))
        .unwrap();

    assert!(back.crypto_errors.is_empty());
    assert_eq!(back.fields, note.fields);
}

#[test]
fn encrypted_fields_are_ciphertext_on_the_wire() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let note = app_note("hello");

    let wire = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap();

    match wire.get(SUBJECT_ATTR) {
        Some(UntypedValue::String(s)) => assert_ne!(s, "hello"),
        other => panic!("unexpected wire value {other:?}"),
    }
    // Unencrypted scalar stays readable.
    assert_eq!(
        wire.get(SENT_DATE_ATTR),
        Some(&UntypedValue::String("1700000000000".to_string()))
    );
}

#[test]
fn corrupt_ciphertext_is_recorded_not_fatal() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let note = app_note("hello");

    let mut wire = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap();
    wire.insert(
        SUBJECT_ATTR,
        UntypedValue::String("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string()),
    );

    let back = pipeline
        .decrypt_from_wire(&note_type_ref(), &wire, Some(&key))
        .unwrap();

    assert_eq!(back.get("subject"), Some(&AppValue::Null));
    assert!(back.crypto_errors.contains_key("subject"));
    // Everything else decoded normally.
    assert_eq!(back.get("confidential"), Some(&AppValue::Bool(true)));
}

#[test]
fn missing_key_on_decrypt_records_errors_for_every_encrypted_field() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let note = app_note("hello");

    let wire = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap();
    let back = pipeline
        .decrypt_from_wire(&note_type_ref(), &wire, None)
        .unwrap();

    for field in ["subject", "confidential", "serial"] {
        assert!(back.crypto_errors.contains_key(field), "missing {field}");
        assert_eq!(back.get(field), Some(&AppValue::Null));
    }
    // The unencrypted field is still there.
    assert_eq!(
        back.get("sentDate"),
        Some(&AppValue::Date(Timestamp::from_millis(1_700_000_000_000)))
    );
}

#[test]
fn missing_key_on_encrypt_is_a_hard_error() {
    let pipeline = pipeline();
    let note = app_note("hello");

    let err = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, None)
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingSessionKey { .. }));
}

#[test]
fn required_field_missing_is_a_hard_error() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let mut note = app_note("hello");
    note.fields.remove("sentDate");

    let err = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingValue { .. }));
}

#[test]
fn unknown_field_name_is_rejected() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let mut note = app_note("hello");
    note.set("color", AppValue::String("red".to_string()));

    let err = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownField { .. }));
}

#[test]
fn final_field_change_is_rejected_on_update() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let prior = app_note("hello");
    let mut next = prior.clone();
    next.set("serial", AppValue::Number(78));

    let err = pipeline
        .encrypt_update_for_wire(&note_type_ref(), &prior, &next, Some(&key))
        .unwrap_err();
    assert!(matches!(err, PipelineError::FinalFieldModified { ref field } if field == "serial"));
}

#[test]
fn final_encrypted_field_stays_byte_stable_across_updates() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let note = app_note("hello");

    let wire = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap();
    let Some(UntypedValue::String(original_serial)) = wire.get(SERIAL_ATTR).cloned() else {
        panic!("serial missing from wire");
    };

    // Decrypt, change a non-final field, re-encrypt as an update.
    let prior = pipeline
        .decrypt_from_wire(&note_type_ref(), &wire, Some(&key))
        .unwrap();
    assert!(prior.retained_ciphertexts.contains_key("serial"));
    let mut next = prior.clone();
    next.set("subject", AppValue::String("renamed".to_string()));

    let updated = pipeline
        .encrypt_update_for_wire(&note_type_ref(), &prior, &next, Some(&key))
        .unwrap();

    assert_eq!(
        updated.get(SERIAL_ATTR),
        Some(&UntypedValue::String(original_serial))
    );
    // The modified field got fresh ciphertext.
    assert_ne!(updated.get(SUBJECT_ATTR), wire.get(SUBJECT_ATTR));
}

#[test]
fn empty_any_association_is_preserved_as_empty() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let note = app_note("hello");

    let wire = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap();
    assert_eq!(
        wire.get(ATTACHMENTS_ATTR),
        Some(&UntypedValue::Strings(vec![]))
    );

    let back = pipeline
        .decrypt_from_wire(&note_type_ref(), &wire, Some(&key))
        .unwrap();
    assert_eq!(back.get("attachments"), Some(&AppValue::IdTuples(vec![])));
}

#[test]
fn one_cardinality_aggregate_must_be_present() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let mut note = app_note("hello");
    note.set("body", AppValue::Aggregates(vec![]));

    let err = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidCardinality { .. }));
}

#[test]
fn list_element_id_travels_as_tuple() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let note = app_note("hello");
    let tuple = id_tuple();

    let wire = pipeline
        .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
        .unwrap();
    assert_eq!(
        wire.get(ID_ATTR),
        Some(&UntypedValue::Strings(vec![
            tuple.list_id.as_str().to_string(),
            tuple.element_id.canonical().to_string(),
        ]))
    );
}

#[test]
fn hand_built_wire_instance_decodes() {
    let pipeline = pipeline();
    let key = SessionKey::generate();
    let tuple = id_tuple();

    let mut body = UntypedInstance::new();
    body.insert(1, UntypedValue::String("agg1".to_string()));
    body.insert(2, UntypedValue::String(encrypt_string(&key, "text").unwrap()));

    let mut wire = UntypedInstance::new();
    wire.insert(
        ID_ATTR,
        UntypedValue::Strings(vec![
            tuple.list_id.as_str().to_string(),
            tuple.element_id.canonical().to_string(),
        ]),
    );
    wire.insert(
        SUBJECT_ATTR,
        UntypedValue::String(encrypt_string(&key, "from the server").unwrap()),
    );
    wire.insert(SENT_DATE_ATTR, UntypedValue::String("1700000000000".to_string()));
    wire.insert(BODY_ATTR, UntypedValue::Aggregates(vec![body]));

    let back = pipeline
        .decrypt_from_wire(&note_type_ref(), &wire, Some(&key))
        .unwrap();

    assert_eq!(back.get("_id"), Some(&AppValue::IdTuple(tuple)));
    assert_eq!(
        back.get("subject"),
        Some(&AppValue::String("from the server".to_string()))
    );
    let Some(AppValue::Aggregates(bodies)) = back.get("body") else {
        panic!("body missing");
    };
    assert_eq!(
        bodies[0].get("text"),
        Some(&AppValue::String("text".to_string()))
    );
}

proptest! {
    #[test]
    fn subject_roundtrips_through_the_pipeline(subject in "[^\u{0}]{0,200}") {
        let pipeline = pipeline();
        let key = SessionKey::generate();
        let note = app_note(&subject);

        let wire = pipeline
            .encrypt_for_wire(&note_type_ref(), &note, Some(&key))
            .unwrap();
        let back = pipeline
            .decrypt_from_wire(&note_type_ref(), &wire, Some(&key))
            .unwrap();

        prop_assert_eq!(back.get("subject"), Some(&AppValue::String(subject)));
    }
}
