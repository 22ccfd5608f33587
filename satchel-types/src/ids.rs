//! Identifier types used throughout the Satchel core.
//!
//! Generated ids embed a millisecond timestamp so that the lexicographic
//! order of their canonical encoding equals chronological order. This is
//! what makes string comparison over stored ids (SQL `<`/`>`) correct for
//! range tracking and time-window eviction.

use crate::{Error, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Length of a canonical generated id (16 lowercase hex chars of a u64).
pub const GENERATED_ID_LENGTH: usize = 16;

/// Bits reserved below the timestamp for a per-process counter, so ids
/// created within the same millisecond still order by creation.
const COUNTER_BITS: u32 = 22;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Sorts below every canonical custom id.
pub const CUSTOM_MIN_ID: &str = "";

/// Sorts above every canonical custom id ('~' is greater than any hex
/// digit or the `/` separator in ASCII).
pub const CUSTOM_MAX_ID: &str = "~";

static NEXT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A server-generated, time-ordered element id.
///
/// Canonical encoding: 16 lowercase hex chars of `(millis << 22) | counter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratedId(String);

impl GeneratedId {
    /// Creates a new id from the current wall clock, monotonic per process.
    #[must_use]
    pub fn new() -> Self {
        let counter = NEXT_COUNTER.fetch_add(1, AtomicOrdering::Relaxed) & COUNTER_MASK;
        Self::from_timestamp(Timestamp::now(), counter)
    }

    /// Creates an id whose timestamp component is `ts`.
    #[must_use]
    pub fn from_timestamp(ts: Timestamp, counter: u64) -> Self {
        let value = (ts.as_millis() << COUNTER_BITS) | (counter & COUNTER_MASK);
        Self(format!("{value:016x}"))
    }

    /// Parses a canonical encoding, validating length and charset.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.len() != GENERATED_ID_LENGTH
            || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(Error::InvalidGeneratedId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The timestamp this id was derived from.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        // parse cannot fail for a validated canonical encoding
        let value = u64::from_str_radix(&self.0, 16).unwrap_or(0);
        Timestamp::from_millis(value >> COUNTER_BITS)
    }

    /// The smallest possible generated id.
    #[must_use]
    pub fn min_id() -> Self {
        Self("0".repeat(GENERATED_ID_LENGTH))
    }

    /// The largest possible generated id.
    #[must_use]
    pub fn max_id() -> Self {
        Self("f".repeat(GENERATED_ID_LENGTH))
    }

    /// The canonical string encoding.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GeneratedId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GeneratedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneratedId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// An opaque element id chosen by the writer rather than the server.
///
/// Custom ids are compared under their canonical byte encoding. The
/// compound time-ordered form (`from_time_and_inner`) encodes a
/// receive-timestamp prefix so lists of such entries stay chronologically
/// ordered, followed by the inner id they point at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomId(String);

impl CustomId {
    /// Wraps a free-form opaque id.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Builds the compound time-ordered encoding: zero-padded hex
    /// timestamp, `/`, inner id. Lexicographic order over these equals
    /// (timestamp, inner id) order.
    #[must_use]
    pub fn from_time_and_inner(ts: Timestamp, inner: &str) -> Self {
        Self(format!("{:016x}/{}", ts.as_millis(), inner))
    }

    /// Splits a compound encoding back into its timestamp and inner id.
    /// Returns `None` for free-form custom ids.
    #[must_use]
    pub fn time_and_inner(&self) -> Option<(Timestamp, &str)> {
        let (prefix, inner) = self.0.split_once('/')?;
        if prefix.len() != GENERATED_ID_LENGTH {
            return None;
        }
        let millis = u64::from_str_radix(prefix, 16).ok()?;
        Some((Timestamp::from_millis(millis), inner))
    }

    /// The canonical string encoding.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An element id of either kind.
///
/// Ordering is over the canonical encoding; within one list all element
/// ids are of the same kind, so cross-kind comparison never decides
/// anything that matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementId {
    Generated(GeneratedId),
    Custom(CustomId),
}

impl ElementId {
    /// The canonical string encoding used for storage and ordering.
    #[must_use]
    pub fn canonical(&self) -> &str {
        match self {
            ElementId::Generated(id) => id.as_str(),
            ElementId::Custom(id) => id.as_str(),
        }
    }
}

impl PartialOrd for ElementId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ElementId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(other.canonical())
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl From<GeneratedId> for ElementId {
    fn from(id: GeneratedId) -> Self {
        ElementId::Generated(id)
    }
}

impl From<CustomId> for ElementId {
    fn from(id: CustomId) -> Self {
        ElementId::Custom(id)
    }
}

/// Compound id of a list- or blob-backed entity: the containing list (or
/// archive) plus the element within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdTuple {
    pub list_id: GeneratedId,
    pub element_id: ElementId,
}

impl IdTuple {
    #[must_use]
    pub fn new(list_id: GeneratedId, element_id: impl Into<ElementId>) -> Self {
        Self {
            list_id,
            element_id: element_id.into(),
        }
    }
}

impl fmt::Display for IdTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.list_id, self.element_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn generated_id_orders_by_timestamp() {
        let early = GeneratedId::from_timestamp(Timestamp::from_millis(1_000), 0);
        let late = GeneratedId::from_timestamp(Timestamp::from_millis(2_000), 0);
        assert!(early < late);
        assert!(early.as_str() < late.as_str());
    }

    #[test]
    fn generated_id_counter_breaks_ties() {
        let a = GeneratedId::from_timestamp(Timestamp::from_millis(1_000), 1);
        let b = GeneratedId::from_timestamp(Timestamp::from_millis(1_000), 2);
        assert!(a < b);
        assert_eq!(a.timestamp(), b.timestamp());
    }

    #[test]
    fn generated_id_timestamp_round_trip() {
        let ts = Timestamp::from_millis(1_640_995_200_000);
        let id = GeneratedId::from_timestamp(ts, 42);
        assert_eq!(id.timestamp(), ts);
    }

    #[test]
    fn parse_rejects_bad_encodings() {
        assert!(GeneratedId::parse("short").is_err());
        assert!(GeneratedId::parse("00000000000000zz").is_err());
        assert!(GeneratedId::parse("0123456789abcdef").is_ok());
    }

    #[test]
    fn min_max_bound_everything() {
        let id = GeneratedId::new();
        assert!(GeneratedId::min_id() < id);
        assert!(id < GeneratedId::max_id());
    }

    #[test]
    fn custom_id_compound_encoding_orders_by_time() {
        let a = CustomId::from_time_and_inner(Timestamp::from_millis(1_000), "zzz");
        let b = CustomId::from_time_and_inner(Timestamp::from_millis(2_000), "aaa");
        assert!(a < b);

        let (ts, inner) = a.time_and_inner().unwrap();
        assert_eq!(ts, Timestamp::from_millis(1_000));
        assert_eq!(inner, "zzz");
    }

    #[test]
    fn custom_bounds_sort_around_compound_ids() {
        let id = CustomId::from_time_and_inner(Timestamp::from_millis(u32::MAX as u64), "x");
        assert!(CUSTOM_MIN_ID < id.as_str());
        assert!(id.as_str() < CUSTOM_MAX_ID);
    }

    #[test]
    fn element_id_orders_across_canonical_encoding() {
        let a: ElementId = GeneratedId::from_timestamp(Timestamp::from_millis(1), 0).into();
        let b: ElementId = GeneratedId::from_timestamp(Timestamp::from_millis(2), 0).into();
        assert!(a < b);
    }
}
