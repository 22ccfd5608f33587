//! Wall-clock timestamps.
//!
//! Milliseconds since the Unix epoch. Retention windows and generated-id
//! derivation both work in this unit, so the type carries the small amount
//! of day arithmetic the eviction engine needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Shifts by whole days; negative shifts saturate at the epoch.
    #[must_use]
    pub fn shifted_by_days(&self, days: i64) -> Self {
        if days >= 0 {
            Self(self.0.saturating_add(days as u64 * MILLIS_PER_DAY))
        } else {
            Self(self.0.saturating_sub(days.unsigned_abs() * MILLIS_PER_DAY))
        }
    }

    #[must_use]
    pub fn saturating_sub_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_sub(millis))
    }

    /// Elapsed milliseconds since `earlier`, zero if `earlier` is later.
    #[must_use]
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
