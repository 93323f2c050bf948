//! Field records and the small value types that describe writes to them.

use bytes::Bytes;

/// One field of a container: value, optimistic version and absolute expiry.
///
/// `expire_at` is milliseconds since the Unix epoch, `0` meaning no TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub value: Bytes,
    pub version: u64,
    pub expire_at: u64,
}

impl FieldRecord {
    /// A record as it exists right before its first write: version 0, no TTL.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            version: 0,
            expire_at: 0,
        }
    }

    pub fn has_ttl(&self) -> bool {
        self.expire_at > 0
    }

    /// Returns true if the record has a TTL that has elapsed at `now`.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expire_at > 0 && self.expire_at <= now
    }

    /// Milliseconds left before expiry, clamped at zero. `None` without TTL.
    pub fn remaining_ms(&self, now: u64) -> Option<u64> {
        self.has_ttl()
            .then(|| self.expire_at.saturating_sub(now))
    }
}

/// Unit in which a caller expresses TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    /// Converts an amount in this unit to milliseconds.
    pub fn to_millis(self, amount: u64) -> Option<u64> {
        match self {
            TimeUnit::Seconds => amount.checked_mul(1000),
            TimeUnit::Milliseconds => Some(amount),
        }
    }

    /// Converts milliseconds to this unit. Seconds round half up.
    pub fn from_millis(self, ms: u64) -> u64 {
        match self {
            TimeUnit::Seconds => ms.saturating_add(500) / 1000,
            TimeUnit::Milliseconds => ms,
        }
    }
}

/// A point in time given relative to now or as an absolute timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireTime {
    /// Milliseconds from now
    After(u64),
    /// Milliseconds since the Unix epoch
    At(u64),
}

impl ExpireTime {
    /// Builds an expire time from an amount in `unit`.
    pub fn relative(amount: u64, unit: TimeUnit) -> Option<Self> {
        unit.to_millis(amount).map(ExpireTime::After)
    }

    pub fn absolute(amount: u64, unit: TimeUnit) -> Option<Self> {
        unit.to_millis(amount).map(ExpireTime::At)
    }

    /// Resolves to an absolute `expire_at`.
    ///
    /// Zero, relative or absolute, resolves to `1`: a timestamp that is
    /// already in the past but still distinct from "no TTL".
    pub fn resolve(self, now: u64) -> u64 {
        match self {
            ExpireTime::After(0) | ExpireTime::At(0) => 1,
            ExpireTime::After(ms) => now.saturating_add(ms),
            ExpireTime::At(at) => at,
        }
    }
}

/// What a value write does to the field's TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtlUpdate {
    /// Drop any TTL
    #[default]
    Clear,
    /// Keep the current TTL
    Keep,
    /// Replace the TTL
    Set(ExpireTime),
}

impl TtlUpdate {
    pub fn resolve(self, current_expire_at: u64, now: u64) -> u64 {
        match self {
            TtlUpdate::Clear => 0,
            TtlUpdate::Keep => current_expire_at,
            TtlUpdate::Set(time) => time.resolve(now),
        }
    }
}

/// Existence condition of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    #[default]
    Always,
    /// Only create (NX)
    IfAbsent,
    /// Only update (XX)
    IfPresent,
}

/// Result of a single-field set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Created,
    Updated,
    ConditionNotMet,
}

/// Result of a TTL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    KeyMissing,
    FieldMissing,
    NoExpiry,
    Remaining(u64),
}

impl TtlStatus {
    /// The integer reply for this status.
    pub fn reply_code(self) -> i64 {
        match self {
            TtlStatus::KeyMissing => -2,
            TtlStatus::FieldMissing => -3,
            TtlStatus::NoExpiry => -1,
            TtlStatus::Remaining(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }
}

/// A field as returned to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldView {
    pub value: Bytes,
    pub version: u64,
}

impl From<&FieldRecord> for FieldView {
    fn from(record: &FieldRecord) -> Self {
        Self {
            value: record.value.clone(),
            version: record.version,
        }
    }
}
