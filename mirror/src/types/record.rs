use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bail;
use crate::error::{ErrorKind, MirrorError, MirrorResult};

/// Number of bits of a [`RecordId`] holding the per-second counter.
const COUNTER_BITS: u32 = 24;

/// Mask selecting the counter bits.
const COUNTER_MASK: u32 = (1 << COUNTER_BITS) - 1;

/// Largest integer form of a [`RecordId`].
const MAX_ID: u64 = (1 << (32 + COUNTER_BITS)) - 1;

/// Number of hex digits of a rendered [`RecordId`].
const HEX_WIDTH: usize = 14;

/// Identity of a customer record, totally ordered by creation time.
///
/// The identity is the concatenation of a creation timestamp in seconds and a 24 bit counter
/// that disambiguates records created within the same second. Its integer form
/// ([`RecordId::as_u64`]) uses 56 bits, so it always fits a positive `BIGINT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u64", try_from = "u64")]
pub struct RecordId(u64);

impl RecordId {
    /// Builds an identity from its timestamp and counter components.
    ///
    /// Only the low 24 bits of `counter` are kept.
    pub fn new(timestamp: u32, counter: u32) -> Self {
        Self(((timestamp as u64) << COUNTER_BITS) | (counter & COUNTER_MASK) as u64)
    }

    /// Returns the creation timestamp component, in seconds since the Unix epoch.
    pub fn timestamp(&self) -> u32 {
        (self.0 >> COUNTER_BITS) as u32
    }

    /// Returns the counter component.
    pub fn counter(&self) -> u32 {
        (self.0 as u32) & COUNTER_MASK
    }

    /// Returns the integer form of the identity, time component followed by counter bits.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the identity as stored in a `BIGINT` column.
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    /// Rebuilds an identity from its `BIGINT` form.
    pub fn from_i64(value: i64) -> MirrorResult<Self> {
        let value = u64::try_from(value).map_err(|_| invalid_id(value.to_string()))?;
        Self::try_from(value)
    }
}

fn invalid_id(value: String) -> MirrorError {
    crate::mirror_error!(
        ErrorKind::InvalidData,
        "Record identity is out of range",
        value
    )
}

impl From<RecordId> for u64 {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

impl TryFrom<u64> for RecordId {
    type Error = MirrorError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > MAX_ID {
            return Err(invalid_id(value.to_string()));
        }

        Ok(Self(value))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$x}", self.0, width = HEX_WIDTH)
    }
}

impl FromStr for RecordId {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HEX_WIDTH {
            bail!(
                ErrorKind::InvalidData,
                "Record identity has an invalid length",
                format!("expected {HEX_WIDTH} hex digits, got `{s}`")
            );
        }

        let value = u64::from_str_radix(s, 16)?;
        RecordId::try_from(value)
    }
}

/// Issues strictly increasing [`RecordId`]s for newly created records.
///
/// An id takes the creation second of its record and the next free counter value within that
/// second. When a second runs out of counter values, or the clock goes backwards, the id
/// continues right after the last issued one, carrying into the timestamp component.
#[derive(Debug, Default)]
pub struct RecordIdGenerator {
    last: AtomicU64,
}

impl RecordIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator whose first id is greater than `last`.
    pub fn starting_after(last: RecordId) -> Self {
        Self {
            last: AtomicU64::new(last.as_u64()),
        }
    }

    /// Returns the next identity for a record created at `created_at`.
    pub fn next_id(&self, created_at: DateTime<Utc>) -> RecordId {
        let floor = RecordId::new(created_at.timestamp().clamp(0, u32::MAX as i64) as u32, 0);
        let next = |last: u64| (last + 1).max(floor.as_u64()).min(MAX_ID);

        // The closure never returns `None`, so both arms carry the previous value.
        let previous = match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(next(last)))
        {
            Ok(previous) | Err(previous) => previous,
        };

        RecordId(next(previous))
    }
}

/// Postal address of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: String,
    pub postcode: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

/// Customer record as stored in the source. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub address: Address,
    pub created_at: DateTime<Utc>,
}

/// Customer record whose personally identifiable fields were replaced by pseudonyms.
///
/// Only [`crate::anonymizer::Anonymizer`] can build values of this type, so anything accepting
/// an [`AnonymizedRecord`] is guaranteed to never see real PII.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnonymizedRecord(Record);

impl AnonymizedRecord {
    pub(crate) fn new(record: Record) -> Self {
        Self(record)
    }

    pub fn id(&self) -> RecordId {
        self.0.id
    }

    /// Returns the anonymized fields.
    pub fn as_record(&self) -> &Record {
        &self.0
    }
}
