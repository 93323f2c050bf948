//! The field store of one container.
//!
//! A `FieldStore` owns the records and a per-container ordered set of
//! `(expire_at, field)`. Every mutation that changes an expiry returns an
//! [`ExpireChange`] so the caller can mirror it into the database index in
//! the same step.
//!
//! Write operations treat a record whose TTL has elapsed as absent: its
//! version is not checked and the write starts from version 0. On a primary
//! such records are already gone by the time a write reaches the store; on a
//! replica this is how a client write overwrites an expired field in place.

use super::glob::GlobPattern;
use super::record::{ExpireTime, FieldRecord, SetCondition, TtlUpdate};
use super::version::VersionPolicy;
use crate::error::{HashError, Result};
use crate::index::ExpireChange;
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

/// Options of a single-field value write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub condition: SetCondition,
    pub version: VersionPolicy,
    pub ttl: TtlUpdate,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(mut self, condition: SetCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_version(mut self, version: VersionPolicy) -> Self {
        self.version = version;
        self
    }

    pub fn with_ttl(mut self, ttl: TtlUpdate) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Options of a numeric increment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IncrOptions<T> {
    pub bounds: Bounds<T>,
    pub version: VersionPolicy,
    pub ttl: TtlUpdate,
}

impl<T: PartialOrd + Copy> IncrOptions<T> {
    pub fn new() -> Self {
        Self {
            bounds: Bounds::unbounded(),
            version: VersionPolicy::None,
            ttl: TtlUpdate::Clear,
        }
    }

    pub fn with_bounds(mut self, min: Option<T>, max: Option<T>) -> Self {
        self.bounds = Bounds::new(min, max);
        self
    }

    pub fn with_version(mut self, version: VersionPolicy) -> Self {
        self.version = version;
        self
    }

    pub fn with_ttl(mut self, ttl: TtlUpdate) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Optional inclusive bounds on the result of an increment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy> Bounds<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => Err(HashError::Syntax),
            _ => Ok(()),
        }
    }

    fn contains(&self, value: T) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// What a successful write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// True if the write created the field
    pub created: bool,
    pub version: u64,
    pub expire_at: u64,
    pub change: ExpireChange,
}

/// One step of a [`FieldStore::scan`] walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Where the next call resumes; 0 when the walk is complete
    pub cursor: u64,
    /// Live fields visited by this step
    pub fields: Vec<Bytes>,
    /// Expired fields visited by this step
    pub expired: Vec<Bytes>,
}

/// Fields of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldStore {
    records: HashMap<Bytes, FieldRecord>,
    expiring: BTreeSet<(u64, Bytes)>,
    /// `(scan_position, field)` of every record
    positions: BTreeSet<(u64, Bytes)>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records that have not expired at `now`.
    pub fn len_live(&self, now: u64) -> usize {
        let expired = self
            .expiring
            .iter()
            .take_while(|(at, _)| *at <= now)
            .count();
        self.records.len() - expired
    }

    /// Returns the raw record, expired or not.
    pub fn get(&self, field: &[u8]) -> Option<&FieldRecord> {
        self.records.get(field)
    }

    /// Returns the record if it exists and has not expired.
    pub fn get_live(&self, field: &[u8], now: u64) -> Option<&FieldRecord> {
        self.records.get(field).filter(|r| !r.is_expired(now))
    }

    /// Earliest expiry among the fields.
    pub fn min_expire(&self) -> Option<u64> {
        self.expiring.first().map(|(at, _)| *at)
    }

    /// The field that expires first.
    pub fn earliest(&self) -> Option<(u64, &Bytes)> {
        self.expiring.first().map(|(at, field)| (*at, field))
    }

    /// Every field with a TTL, in expiry order.
    pub fn expiring(&self) -> impl Iterator<Item = (u64, &Bytes)> + '_ {
        self.expiring.iter().map(|(at, field)| (*at, field))
    }

    /// Up to `limit` fields already expired at `now`, earliest first.
    pub fn expired(&self, now: u64, limit: usize) -> Vec<(u64, Bytes)> {
        self.expiring
            .iter()
            .take_while(|(at, _)| *at <= now)
            .take(limit)
            .map(|(at, field)| (*at, field.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &FieldRecord)> + '_ {
        self.records.iter()
    }

    /// Records that have not expired at `now`.
    pub fn iter_live(&self, now: u64) -> impl Iterator<Item = (&Bytes, &FieldRecord)> + '_ {
        self.records.iter().filter(move |(_, r)| !r.is_expired(now))
    }

    /// Stores a record verbatim, replacing any previous one.
    pub fn put(&mut self, field: Bytes, record: FieldRecord) -> ExpireChange {
        let min_before = self.min_expire();
        let new_expire_at = record.expire_at;
        let old_expire_at = match self.records.insert(field.clone(), record) {
            Some(old) => old.expire_at,
            None => {
                self.positions.insert((scan_position(&field), field.clone()));
                0
            }
        };
        self.move_expiry(&field, old_expire_at, new_expire_at);
        self.change(field, old_expire_at, new_expire_at, min_before)
    }

    /// Removes a record unconditionally.
    pub fn remove(&mut self, field: &[u8]) -> Option<(FieldRecord, ExpireChange)> {
        let min_before = self.min_expire();
        let (field, record) = self.records.remove_entry(field)?;
        self.positions.remove(&(scan_position(&field), field.clone()));
        self.move_expiry(&field, record.expire_at, 0);
        let change = self.change(field, record.expire_at, 0, min_before);
        Some((record, change))
    }

    /// Sets a record's absolute expiry. `0` clears it.
    pub fn put_expire_at(&mut self, field: &[u8], expire_at: u64) -> Option<ExpireChange> {
        let min_before = self.min_expire();
        let (field, record) = self.records.get_key_value(field)?;
        let field = field.clone();
        let old_expire_at = record.expire_at;
        if let Some(record) = self.records.get_mut(&field) {
            record.expire_at = expire_at;
        }
        self.move_expiry(&field, old_expire_at, expire_at);
        Some(self.change(field, old_expire_at, expire_at, min_before))
    }

    /// Sets a value with the version gate and TTL rules.
    ///
    /// Returns `Ok(None)` if the existence condition is not met.
    pub fn set(
        &mut self,
        field: Bytes,
        value: Bytes,
        options: &SetOptions,
        now: u64,
    ) -> Result<Option<Applied>> {
        let policy = options.version.validate()?;
        let current = self.get_live(&field, now);

        match (options.condition, current.is_some()) {
            (SetCondition::IfAbsent, true) | (SetCondition::IfPresent, false) => return Ok(None),
            _ => {}
        }

        let current_version = current.map(|r| r.version);
        let current_expire_at = current.map_or(0, |r| r.expire_at);
        policy.check(current_version)?;

        let record = FieldRecord {
            value,
            version: policy.next(current_version.unwrap_or(0)),
            expire_at: options.ttl.resolve(current_expire_at, now),
        };
        Ok(Some(self.commit(field, record, current_version.is_none())))
    }

    /// Adds `delta` to an integer field, creating it at 0 if absent.
    pub fn incr_by(
        &mut self,
        field: Bytes,
        delta: i64,
        bounds: Bounds<i64>,
        policy: VersionPolicy,
        ttl: TtlUpdate,
        now: u64,
    ) -> Result<(i64, Applied)> {
        let policy = policy.validate()?;
        bounds.validate()?;

        let current = self.get_live(&field, now);
        let base = match current {
            Some(record) => parse_integer(&record.value)?,
            None => 0,
        };
        let current_version = current.map(|r| r.version);
        let current_expire_at = current.map_or(0, |r| r.expire_at);
        policy.check(current_version)?;

        let result = base.checked_add(delta).ok_or(HashError::Overflow)?;
        if !bounds.contains(result) {
            return Err(HashError::Overflow);
        }

        let record = FieldRecord {
            value: Bytes::from(result.to_string()),
            version: policy.next(current_version.unwrap_or(0)),
            expire_at: ttl.resolve(current_expire_at, now),
        };
        Ok((result, self.commit(field, record, current_version.is_none())))
    }

    /// Adds `delta` to a float field, creating it at 0 if absent.
    ///
    /// Returns the stored textual value.
    pub fn incr_by_float(
        &mut self,
        field: Bytes,
        delta: f64,
        bounds: Bounds<f64>,
        policy: VersionPolicy,
        ttl: TtlUpdate,
        now: u64,
    ) -> Result<(Bytes, Applied)> {
        let policy = policy.validate()?;
        if !delta.is_finite() {
            return Err(HashError::NotFloat);
        }
        bounds.validate()?;

        let current = self.get_live(&field, now);
        let base = match current {
            Some(record) => parse_float(&record.value)?,
            None => 0.0,
        };
        let current_version = current.map(|r| r.version);
        let current_expire_at = current.map_or(0, |r| r.expire_at);
        policy.check(current_version)?;

        let result = base + delta;
        if !result.is_finite() || !bounds.contains(result) {
            return Err(HashError::Overflow);
        }

        let value = Bytes::from(format_float(result));
        let record = FieldRecord {
            value: value.clone(),
            version: policy.next(current_version.unwrap_or(0)),
            expire_at: ttl.resolve(current_expire_at, now),
        };
        Ok((value, self.commit(field, record, current_version.is_none())))
    }

    /// Deletes a live field if the policy allows it.
    ///
    /// Returns `Ok(None)` if the field is absent or expired.
    pub fn delete(
        &mut self,
        field: &[u8],
        policy: VersionPolicy,
        now: u64,
    ) -> Result<Option<(FieldRecord, ExpireChange)>> {
        let policy = policy.validate()?;
        let Some(current) = self.get_live(field, now) else {
            return Ok(None);
        };
        policy.check(Some(current.version))?;
        Ok(self.remove(field))
    }

    /// Sets the TTL of a live field and bumps its version per `policy`.
    ///
    /// Returns `Ok(None)` if the field is absent or expired.
    pub fn set_expire(
        &mut self,
        field: &[u8],
        time: ExpireTime,
        policy: VersionPolicy,
        now: u64,
    ) -> Result<Option<Applied>> {
        let policy = policy.validate()?;
        let Some(current) = self.get_live(field, now) else {
            return Ok(None);
        };
        policy.check(Some(current.version))?;
        let version = policy.next(current.version);
        let expire_at = time.resolve(now);

        let Some(change) = self.put_expire_at(field, expire_at) else {
            return Ok(None);
        };
        if let Some(record) = self.records.get_mut(field) {
            record.version = version;
        }
        Ok(Some(Applied {
            created: false,
            version,
            expire_at,
            change,
        }))
    }

    /// Drops the TTL of a live field. Returns `None` if there was nothing to drop.
    pub fn persist(&mut self, field: &[u8], now: u64) -> Option<ExpireChange> {
        let current = self.get_live(field, now)?;
        if !current.has_ttl() {
            return None;
        }
        self.put_expire_at(field, 0)
    }

    /// Forces the version of a live field. Returns false if it is absent.
    pub fn set_version(&mut self, field: &[u8], version: u64, now: u64) -> Result<bool> {
        if version == 0 {
            return Err(HashError::Syntax);
        }
        match self.records.get_mut(field) {
            Some(record) if !record.is_expired(now) => {
                record.version = version;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Iterates fields by stable hash position.
    ///
    /// Visits the fields whose hash is at least `cursor`, in hash order, at
    /// least `count` of them (a group of equal hashes is never split). Live
    /// fields matching `pattern` are returned; visited fields that have
    /// expired are reported separately so the caller can reclaim them. The
    /// returned cursor is `0` once the walk is complete.
    pub fn scan(
        &self,
        cursor: u64,
        count: usize,
        pattern: Option<&GlobPattern>,
        now: u64,
    ) -> ScanPage {
        let count = count.max(1);
        let mut walk = self.positions.range((cursor, Bytes::new())..).peekable();
        let mut visited: Vec<&Bytes> = Vec::with_capacity(count);
        let mut last = None;
        while let Some(&entry) = walk.peek() {
            let (hash, field) = entry;
            if visited.len() >= count && last != Some(*hash) {
                break;
            }
            last = Some(*hash);
            visited.push(field);
            walk.next();
        }

        let mut page = ScanPage {
            cursor: walk.peek().map_or(0, |(hash, _)| *hash),
            fields: Vec::new(),
            expired: Vec::new(),
        };
        for field in visited {
            if pattern.is_some_and(|p| !p.matches(field)) {
                continue;
            }
            match self.records.get(field) {
                Some(record) if record.is_expired(now) => page.expired.push(field.clone()),
                Some(_) => page.fields.push(field.clone()),
                None => {}
            }
        }
        page
    }

    fn commit(&mut self, field: Bytes, record: FieldRecord, created: bool) -> Applied {
        let version = record.version;
        let expire_at = record.expire_at;
        let change = self.put(field, record);
        Applied {
            created,
            version,
            expire_at,
            change,
        }
    }

    fn move_expiry(&mut self, field: &Bytes, old_expire_at: u64, new_expire_at: u64) {
        if old_expire_at == new_expire_at {
            return;
        }
        if old_expire_at > 0 {
            self.expiring.remove(&(old_expire_at, field.clone()));
        }
        if new_expire_at > 0 {
            self.expiring.insert((new_expire_at, field.clone()));
        }
    }

    fn change(
        &self,
        field: Bytes,
        old_expire_at: u64,
        new_expire_at: u64,
        min_before: Option<u64>,
    ) -> ExpireChange {
        ExpireChange {
            field,
            old_expire_at,
            new_expire_at,
            min_before,
            min_after: self.min_expire(),
        }
    }
}

/// Stable 64-bit position of a field for `scan`.
///
/// `DefaultHasher::new` uses fixed keys, so positions do not change while
/// the process runs.
pub fn scan_position(field: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    field.hash(&mut hasher);
    hasher.finish()
}

fn parse_integer(value: &[u8]) -> Result<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(HashError::NotInteger)
}

fn parse_float(value: &[u8]) -> Result<f64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or(HashError::NotFloat)
}

/// Shortest decimal form, without exponent or trailing zeros.
fn format_float(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}
