//! Scalar encoding between wire strings and typed values.
//!
//! Numbers and dates travel as decimal strings, booleans as "0"/"1",
//! bytes as base64. Compressed strings are treated as plain strings; the
//! stored form is the uncompressed text.

use crate::instance::ParsedValue;
use base64::{engine::general_purpose::STANDARD, Engine};
use satchel_model::ValueKind;
use satchel_types::{CustomId, ElementId, GeneratedId, Timestamp};

/// Decodes one wire string into a typed value. Errors carry only the
/// reason; callers add the field name.
pub fn decode_scalar(kind: ValueKind, raw: &str) -> Result<ParsedValue, String> {
    match kind {
        ValueKind::String | ValueKind::CompressedString => {
            Ok(ParsedValue::String(raw.to_string()))
        }
        ValueKind::Number => raw
            .parse::<i64>()
            .map(ParsedValue::Number)
            .map_err(|e| format!("not a number: {e}")),
        ValueKind::Date => raw
            .parse::<u64>()
            .map(|ms| ParsedValue::Date(Timestamp::from_millis(ms)))
            .map_err(|e| format!("not a date: {e}")),
        ValueKind::Boolean => match raw {
            "0" => Ok(ParsedValue::Bool(false)),
            "1" => Ok(ParsedValue::Bool(true)),
            other => Err(format!("not a boolean: '{other}'")),
        },
        ValueKind::Bytes => STANDARD
            .decode(raw)
            .map(ParsedValue::Bytes)
            .map_err(|e| format!("invalid base64: {e}")),
        ValueKind::GeneratedId => GeneratedId::parse(raw)
            .map(|id| ParsedValue::Id(ElementId::Generated(id)))
            .map_err(|e| e.to_string()),
        ValueKind::CustomId => Ok(ParsedValue::Id(ElementId::Custom(CustomId::new(raw)))),
    }
}

/// Encodes one typed value as a wire string.
pub fn encode_scalar(kind: ValueKind, value: &ParsedValue) -> Result<String, String> {
    match (kind, value) {
        (ValueKind::String | ValueKind::CompressedString, ParsedValue::String(s)) => Ok(s.clone()),
        (ValueKind::Number, ParsedValue::Number(n)) => Ok(n.to_string()),
        (ValueKind::Date, ParsedValue::Date(ts)) => Ok(ts.as_millis().to_string()),
        (ValueKind::Boolean, ParsedValue::Bool(b)) => Ok(if *b { "1" } else { "0" }.to_string()),
        (ValueKind::Bytes, ParsedValue::Bytes(bytes)) => Ok(STANDARD.encode(bytes)),
        (ValueKind::GeneratedId | ValueKind::CustomId, ParsedValue::Id(id)) => {
            Ok(id.canonical().to_string())
        }
        (kind, other) => Err(format!("value {other:?} does not match kind {kind:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrips() {
        let cases = [
            (ValueKind::String, ParsedValue::String("hi".into())),
            (ValueKind::Number, ParsedValue::Number(-42)),
            (ValueKind::Date, ParsedValue::Date(Timestamp::from_millis(1_700_000_000_000))),
            (ValueKind::Boolean, ParsedValue::Bool(true)),
            (ValueKind::Bytes, ParsedValue::Bytes(vec![0, 1, 254, 255])),
        ];
        for (kind, value) in cases {
            let encoded = encode_scalar(kind, &value).unwrap();
            assert_eq!(decode_scalar(kind, &encoded).unwrap(), value);
        }
    }

    #[test]
    fn booleans_use_zero_and_one() {
        assert_eq!(
            encode_scalar(ValueKind::Boolean, &ParsedValue::Bool(false)).unwrap(),
            "0"
        );
        assert!(decode_scalar(ValueKind::Boolean, "true").is_err());
    }

    #[test]
    fn mismatched_kind_is_an_error() {
        assert!(encode_scalar(ValueKind::Number, &ParsedValue::String("x".into())).is_err());
        assert!(decode_scalar(ValueKind::Number, "abc").is_err());
    }

    #[test]
    fn generated_id_decodes_to_element_id() {
        let id = GeneratedId::from_timestamp(Timestamp::from_millis(1000), 0);
        let decoded = decode_scalar(ValueKind::GeneratedId, id.as_str()).unwrap();
        assert_eq!(decoded, ParsedValue::Id(ElementId::Generated(id)));
    }
}
