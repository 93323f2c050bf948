//! Field-TTL Hash Engine
//!
//! This module implements the engine behind the field-TTL hash type: numbered
//! databases of containers, one expire index per database, expiry counters,
//! the active cycle state, the rename/move coordinator and the replication
//! sink every effect is written to.
//!
//! ## Design Decisions
//!
//! 1. **Serialized access**: every operation takes `&mut self`. The expire
//!    timer shares the engine behind a mutex and runs whole ticks under it.
//! 2. **Passive check first**: a command checks the fields it touches before
//!    reading or writing them. Writes also clear a few already-expired fields
//!    of the container.
//! 3. **Index in lockstep**: every expiry change of a record is mirrored into
//!    the database index before the operation returns.
//! 4. **Absolute propagation**: emitted commands carry absolute versions and
//!    absolute timestamps, so replicas never consult their own clock.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          HashEngine                          │
//! │  ┌──────────┐ ┌──────────┐         ┌──────────┐              │
//! │  │ db 0     │ │ db 1     │   ...   │ db N-1   │  Database    │
//! │  ├──────────┤ ├──────────┤         ├──────────┤              │
//! │  │ index 0  │ │ index 1  │   ...   │ index N-1│  ExpireIndex │
//! │  └──────────┘ └──────────┘         └──────────┘              │
//! │        │                                                     │
//! │        ▼ every effect                                        │
//! │  ReplicationSink  (FSET, FDEL, FPEXPIREAT, FPERSIST, DEL)    │
//! └──────────────────────────────────────────────────────────────┘
//!                ▲
//!                │ Arc<Mutex<HashEngine>>
//!        ┌───────┴────────┐
//!        │  ExpireTimer   │
//!        │ (Tokio task)   │
//!        └────────────────┘
//! ```

use super::container::{Container, XorDigest};
use super::expire::{
    render_info, ActiveExpireCycle, CycleState, CycleStats, DbContext, ExpireCounters, ExpireTrigger, Role,
};
use super::fields::{IncrOptions, SetOptions};
use super::glob::GlobPattern;
use super::keyspace::{Database, Value};
use super::record::{ExpireTime, FieldView, SetOutcome, TimeUnit, TtlStatus, TtlUpdate};
use super::rename::{Relocation, RenameMoveCoordinator};
use super::snapshot;
use super::version::VersionPolicy;
use crate::clock::{Clock, SystemClock};
use crate::config::ExpireConfig;
use crate::error::{HashError, Result};
use crate::index::{ExpireIndex, IndexEntry, IndexRegistry};
use crate::replication::{NullSink, ReplicatedCommand, ReplicationSink};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fields visited by a scan step when the caller does not say.
pub const DEFAULT_SCAN_COUNT: usize = 10;

/// One entry of [`HashEngine::set_fields_checked`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub field: Bytes,
    pub value: Bytes,
    /// Expected current version; 0 skips the check
    pub version: u64,
    /// Time to live in milliseconds
    pub ttl_ms: u64,
}

impl FieldUpdate {
    pub fn new(field: Bytes, value: Bytes, version: u64, ttl_ms: u64) -> Self {
        Self {
            field,
            value,
            version,
            ttl_ms,
        }
    }
}

/// The field-TTL hash engine.
///
/// # Example
///
/// ```
/// use ttlhash::storage::{HashEngine, SetOptions, SetOutcome};
/// use bytes::Bytes;
///
/// let mut engine = HashEngine::default();
/// let key = Bytes::from("user:1");
///
/// let outcome = engine
///     .set_field(0, &key, Bytes::from("name"), Bytes::from("ada"), &SetOptions::new())
///     .unwrap();
/// assert_eq!(outcome, SetOutcome::Created);
///
/// let field = engine.get_field(0, &key, b"name").unwrap();
/// assert_eq!(field.value, Bytes::from("ada"));
/// assert_eq!(field.version, 1);
/// ```
pub struct HashEngine {
    config: ExpireConfig,
    clock: Arc<dyn Clock>,
    role: Role,

    /// Key space, one entry per database
    databases: Vec<Database>,

    /// Expire index per database
    indexes: IndexRegistry,

    /// Expired-field counters per database
    counters: Vec<ExpireCounters>,

    cycle: ActiveExpireCycle,
    relocations: RenameMoveCoordinator,
    sink: Box<dyn ReplicationSink>,
}

impl std::fmt::Debug for HashEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashEngine")
            .field("strategy", &self.indexes.strategy())
            .field("role", &self.role)
            .field("databases", &self.databases.len())
            .field("index_entries", &self.indexes.total_entries())
            .field("cycle", &self.cycle.stats())
            .finish()
    }
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new(ExpireConfig::default(), Arc::new(SystemClock))
    }
}

impl HashEngine {
    /// Creates an engine with empty databases and a sink that drops
    /// everything.
    pub fn new(config: ExpireConfig, clock: Arc<dyn Clock>) -> Self {
        let databases = config.databases.max(1);
        Self {
            databases: (0..databases).map(|_| Database::new()).collect(),
            indexes: IndexRegistry::new(config.strategy, databases),
            counters: vec![ExpireCounters::default(); databases],
            cycle: ActiveExpireCycle::new(),
            relocations: RenameMoveCoordinator::new(),
            sink: Box::new(NullSink),
            role: Role::Primary,
            clock,
            config,
        }
    }

    /// Replaces the replication sink.
    pub fn with_sink(mut self, sink: impl ReplicationSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &ExpireConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        if self.role != role {
            info!(from = ?self.role, to = ?role, "Role changed");
            self.role = role;
        }
    }

    /// Number of databases.
    pub fn databases(&self) -> usize {
        self.databases.len()
    }

    /// Current time in milliseconds according to the engine's clock.
    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn check_db(&self, db: usize) -> Result<()> {
        if db < self.databases.len() {
            Ok(())
        } else {
            Err(HashError::InvalidDb(db))
        }
    }

    /// Borrows database `db` together with everything that follows its changes.
    pub(crate) fn context(&mut self, db: usize) -> Result<DbContext<'_>> {
        self.check_db(db)?;
        Ok(DbContext {
            db,
            now: self.clock.now_ms(),
            role: self.role,
            data: &mut self.databases[db],
            index: self.indexes.index_mut(db),
            counters: &mut self.counters[db],
            sink: &mut *self.sink,
        })
    }

    fn container(&self, db: usize, key: &[u8]) -> Result<Option<&Container>> {
        self.check_db(db)?;
        self.databases[db].container(key)
    }

    // ========================================================================
    // FIELD WRITES
    // ========================================================================

    /// Sets a field value.
    ///
    /// The container is created if it does not exist. An unmet existence
    /// condition is not an error and reports [`SetOutcome::ConditionNotMet`].
    pub fn set_field(
        &mut self,
        db: usize,
        key: &Bytes,
        field: Bytes,
        value: Bytes,
        options: &SetOptions,
    ) -> Result<SetOutcome> {
        options.version.validate()?;
        let passive_limit = self.config.keys_per_passive_loop;

        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        ctx.passive_sweep(key, passive_limit)?;
        ctx.expire_if_needed(key, &field)?;

        let applied = ctx.write(key, |fields, now| {
            fields.set(field.clone(), value.clone(), options, now)
        })?;
        let Some(applied) = applied else {
            return Ok(SetOutcome::ConditionNotMet);
        };

        ctx.sync_index(key, &applied.change);
        ctx.emit(ReplicatedCommand::Set {
            key: key.clone(),
            field,
            value,
            version: applied.version,
            expire_at: applied.expire_at,
        });
        Ok(if applied.created {
            SetOutcome::Created
        } else {
            SetOutcome::Updated
        })
    }

    /// Sets several fields, bumping each version and keeping existing TTLs.
    pub fn set_fields(&mut self, db: usize, key: &Bytes, entries: Vec<(Bytes, Bytes)>) -> Result<()> {
        let options = SetOptions::new().with_ttl(TtlUpdate::Keep);
        let passive_limit = self.config.keys_per_passive_loop;

        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        ctx.passive_sweep(key, passive_limit)?;

        for (field, value) in entries {
            ctx.expire_if_needed(key, &field)?;
            let applied = ctx.write(key, |fields, now| {
                fields.set(field.clone(), value.clone(), &options, now)
            })?;
            if let Some(applied) = applied {
                ctx.sync_index(key, &applied.change);
                ctx.emit(ReplicatedCommand::Set {
                    key: key.clone(),
                    field,
                    value,
                    version: applied.version,
                    expire_at: applied.expire_at,
                });
            }
        }
        Ok(())
    }

    /// Sets several fields with a version check and a TTL each.
    ///
    /// Every version is checked before anything is written; one mismatch
    /// fails the whole call with [`HashError::VersionConflict`]. Expired
    /// fields found while checking are reclaimed either way.
    pub fn set_fields_checked(
        &mut self,
        db: usize,
        key: &Bytes,
        entries: Vec<FieldUpdate>,
    ) -> Result<()> {
        let passive_limit = self.config.keys_per_passive_loop;

        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        ctx.passive_sweep(key, passive_limit)?;

        for entry in &entries {
            let current = ctx.live_field(key, &entry.field)?.map(|r| r.version);
            VersionPolicy::Match(entry.version).check(current)?;
        }

        for entry in entries {
            let options =
                SetOptions::new().with_ttl(TtlUpdate::Set(ExpireTime::After(entry.ttl_ms)));
            let applied = ctx.write(key, |fields, now| {
                fields.set(entry.field.clone(), entry.value.clone(), &options, now)
            })?;
            if let Some(applied) = applied {
                ctx.sync_index(key, &applied.change);
                ctx.emit(ReplicatedCommand::Set {
                    key: key.clone(),
                    field: entry.field,
                    value: entry.value,
                    version: applied.version,
                    expire_at: applied.expire_at,
                });
            }
        }
        Ok(())
    }

    /// Adds `delta` to an integer field and returns the new value.
    ///
    /// A missing field starts at 0. Overflow and bound violations fail with
    /// [`HashError::Overflow`] and leave the container untouched.
    pub fn incr_by(
        &mut self,
        db: usize,
        key: &Bytes,
        field: Bytes,
        delta: i64,
        options: &IncrOptions<i64>,
    ) -> Result<i64> {
        options.version.validate()?;
        options.bounds.validate()?;
        let passive_limit = self.config.keys_per_passive_loop;

        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        ctx.passive_sweep(key, passive_limit)?;
        ctx.expire_if_needed(key, &field)?;

        let (result, applied) = ctx.write(key, |fields, now| {
            fields.incr_by(
                field.clone(),
                delta,
                options.bounds,
                options.version,
                options.ttl,
                now,
            )
        })?;

        ctx.sync_index(key, &applied.change);
        ctx.emit(ReplicatedCommand::Set {
            key: key.clone(),
            field,
            value: Bytes::from(result.to_string()),
            version: applied.version,
            expire_at: applied.expire_at,
        });
        Ok(result)
    }

    /// Adds `delta` to a float field and returns the stored text.
    pub fn incr_by_float(
        &mut self,
        db: usize,
        key: &Bytes,
        field: Bytes,
        delta: f64,
        options: &IncrOptions<f64>,
    ) -> Result<Bytes> {
        options.version.validate()?;
        options.bounds.validate()?;
        if !delta.is_finite() {
            return Err(HashError::NotFloat);
        }
        let passive_limit = self.config.keys_per_passive_loop;

        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        ctx.passive_sweep(key, passive_limit)?;
        ctx.expire_if_needed(key, &field)?;

        let (value, applied) = ctx.write(key, |fields, now| {
            fields.incr_by_float(
                field.clone(),
                delta,
                options.bounds,
                options.version,
                options.ttl,
                now,
            )
        })?;

        ctx.sync_index(key, &applied.change);
        ctx.emit(ReplicatedCommand::Set {
            key: key.clone(),
            field,
            value: value.clone(),
            version: applied.version,
            expire_at: applied.expire_at,
        });
        Ok(value)
    }

    /// Forces the version of a live field. Returns false if it is absent.
    pub fn set_version(&mut self, db: usize, key: &Bytes, field: &[u8], version: u64) -> Result<bool> {
        if version == 0 {
            return Err(HashError::Syntax);
        }
        let passive_limit = self.config.keys_per_passive_loop;

        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        ctx.passive_sweep(key, passive_limit)?;
        if ctx.expire_if_needed(key, field)? {
            return Ok(false);
        }

        let now = ctx.now;
        let Some(container) = ctx.data.container_mut(key)? else {
            return Ok(false);
        };
        if !container.fields_mut().set_version(field, version, now)? {
            return Ok(false);
        }
        ctx.emit(ReplicatedCommand::SetVersion {
            key: key.clone(),
            field: Bytes::copy_from_slice(field),
            version,
        });
        Ok(true)
    }

    /// Sets the TTL of a live field.
    ///
    /// Returns false if the key or field does not exist. The version moves
    /// according to `policy`.
    pub fn set_expire(
        &mut self,
        db: usize,
        key: &Bytes,
        field: &[u8],
        time: ExpireTime,
        policy: VersionPolicy,
    ) -> Result<bool> {
        let policy = policy.validate()?;

        let mut ctx = self.context(db)?;
        if ctx.data.container(key)?.is_none() || ctx.expire_if_needed(key, field)? {
            return Ok(false);
        }

        let now = ctx.now;
        let Some(container) = ctx.data.container_mut(key)? else {
            return Ok(false);
        };
        let Some(applied) = container.fields_mut().set_expire(field, time, policy, now)? else {
            return Ok(false);
        };

        ctx.sync_index(key, &applied.change);
        ctx.emit(ReplicatedCommand::ExpireAt {
            key: key.clone(),
            field: applied.change.field.clone(),
            expire_at: applied.expire_at,
            version: applied.version,
        });
        Ok(true)
    }

    /// Drops the TTL of a live field. Returns false if there was none.
    pub fn persist(&mut self, db: usize, key: &Bytes, field: &[u8]) -> Result<bool> {
        let mut ctx = self.context(db)?;
        if ctx.data.container(key)?.is_none() || ctx.expire_if_needed(key, field)? {
            return Ok(false);
        }

        let now = ctx.now;
        let Some(container) = ctx.data.container_mut(key)? else {
            return Ok(false);
        };
        let Some(change) = container.fields_mut().persist(field, now) else {
            return Ok(false);
        };

        ctx.sync_index(key, &change);
        ctx.emit(ReplicatedCommand::Persist {
            key: key.clone(),
            field: change.field,
        });
        Ok(true)
    }

    // ========================================================================
    // FIELD DELETES
    // ========================================================================

    /// Deletes a field if `policy` allows it. Returns false if it was absent.
    pub fn delete_field(
        &mut self,
        db: usize,
        key: &Bytes,
        field: &[u8],
        policy: VersionPolicy,
    ) -> Result<bool> {
        let policy = policy.validate()?;
        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        let deleted = delete_one(&mut ctx, key, field, policy)?;
        ctx.remove_if_empty(key);
        Ok(deleted)
    }

    /// Deletes several fields and returns how many existed.
    pub fn delete_fields(&mut self, db: usize, key: &Bytes, fields: &[Bytes]) -> Result<usize> {
        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        let mut deleted = 0;
        for field in fields {
            if delete_one(&mut ctx, key, field, VersionPolicy::None)? {
                deleted += 1;
            }
        }
        ctx.remove_if_empty(key);
        Ok(deleted)
    }

    /// Deletes the fields whose version matches; mismatching entries are
    /// skipped. Returns how many were deleted.
    pub fn delete_fields_checked(
        &mut self,
        db: usize,
        key: &Bytes,
        entries: &[(Bytes, u64)],
    ) -> Result<usize> {
        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        let mut deleted = 0;
        for (field, version) in entries {
            match delete_one(&mut ctx, key, field, VersionPolicy::Match(*version)) {
                Ok(true) => deleted += 1,
                Ok(false) | Err(HashError::VersionConflict) => {}
                Err(e) => return Err(e),
            }
        }
        ctx.remove_if_empty(key);
        Ok(deleted)
    }

    // ========================================================================
    // FIELD READS
    // ========================================================================

    /// Returns a live field.
    ///
    /// Fails with [`HashError::NotFound`] if the key or field is missing or
    /// the field has expired.
    pub fn get_field(&mut self, db: usize, key: &Bytes, field: &[u8]) -> Result<FieldView> {
        let mut ctx = self.context(db)?;
        let view = ctx.live_field(key, field)?.map(FieldView::from);
        view.ok_or(HashError::NotFound)
    }

    /// Returns several fields; missing ones are `None`.
    pub fn get_fields(
        &mut self,
        db: usize,
        key: &Bytes,
        fields: &[Bytes],
    ) -> Result<Vec<Option<FieldView>>> {
        let mut ctx = self.context(db)?;
        ctx.data.check_type(key)?;
        let mut views = Vec::with_capacity(fields.len());
        for field in fields {
            views.push(ctx.live_field(key, field)?.map(FieldView::from));
        }
        Ok(views)
    }

    pub fn get_version(&mut self, db: usize, key: &Bytes, field: &[u8]) -> Result<u64> {
        self.get_field(db, key, field).map(|view| view.version)
    }

    pub fn exists(&mut self, db: usize, key: &Bytes, field: &[u8]) -> Result<bool> {
        let mut ctx = self.context(db)?;
        let exists = ctx.live_field(key, field)?.is_some();
        Ok(exists)
    }

    /// Length of a field value, 0 if the field is missing.
    pub fn strlen(&mut self, db: usize, key: &Bytes, field: &[u8]) -> Result<usize> {
        let mut ctx = self.context(db)?;
        let len = ctx.live_field(key, field)?.map_or(0, |r| r.value.len());
        Ok(len)
    }

    /// Remaining TTL of a field in `unit`.
    pub fn ttl(&mut self, db: usize, key: &Bytes, field: &[u8], unit: TimeUnit) -> Result<TtlStatus> {
        let mut ctx = self.context(db)?;
        if ctx.data.container(key)?.is_none() {
            return Ok(TtlStatus::KeyMissing);
        }
        let now = ctx.now;
        let status = match ctx.live_field(key, field)? {
            None => TtlStatus::FieldMissing,
            Some(record) => match record.remaining_ms(now) {
                None => TtlStatus::NoExpiry,
                Some(ms) => TtlStatus::Remaining(unit.from_millis(ms)),
            },
        };
        Ok(status)
    }

    /// Number of fields that have not expired.
    pub fn len_live(&self, db: usize, key: &[u8]) -> Result<usize> {
        let now = self.now();
        Ok(self
            .container(db, key)?
            .map_or(0, |container| container.fields().len_live(now)))
    }

    /// Number of fields including expired ones not yet reclaimed.
    pub fn len_total(&self, db: usize, key: &[u8]) -> Result<usize> {
        Ok(self
            .container(db, key)?
            .map_or(0, |container| container.fields().len()))
    }

    /// Names of the live fields, in no particular order.
    pub fn field_names(&self, db: usize, key: &[u8]) -> Result<Vec<Bytes>> {
        let now = self.now();
        Ok(self.container(db, key)?.map_or_else(Vec::new, |container| {
            container
                .fields()
                .iter_live(now)
                .map(|(field, _)| field.clone())
                .collect()
        }))
    }

    /// Values of the live fields, in no particular order.
    pub fn values(&self, db: usize, key: &[u8]) -> Result<Vec<Bytes>> {
        let now = self.now();
        Ok(self.container(db, key)?.map_or_else(Vec::new, |container| {
            container
                .fields()
                .iter_live(now)
                .map(|(_, record)| record.value.clone())
                .collect()
        }))
    }

    /// Every live field with its value and version.
    pub fn get_all(&self, db: usize, key: &[u8]) -> Result<Vec<(Bytes, FieldView)>> {
        let now = self.now();
        Ok(self.container(db, key)?.map_or_else(Vec::new, |container| {
            container
                .fields()
                .iter_live(now)
                .map(|(field, record)| (field.clone(), FieldView::from(record)))
                .collect()
        }))
    }

    /// One step of a cursor walk over the fields of `key`.
    ///
    /// Returns the next cursor (0 when complete) and the live fields visited
    /// with their values. Expired fields met on the way are reclaimed.
    pub fn scan(
        &mut self,
        db: usize,
        key: &Bytes,
        cursor: u64,
        pattern: Option<&GlobPattern>,
        count: usize,
    ) -> Result<(u64, Vec<(Bytes, Bytes)>)> {
        let mut ctx = self.context(db)?;
        let page = match ctx.data.container(key)? {
            Some(container) => container.fields().scan(cursor, count, pattern, ctx.now),
            None => return Ok((0, Vec::new())),
        };

        if ctx.role.is_writable() {
            for field in &page.expired {
                ctx.delete_and_propagate(key, field, ExpireTrigger::Passive)?;
            }
        }

        let entries = match ctx.data.container(key)? {
            Some(container) => page
                .fields
                .into_iter()
                .filter_map(|field| {
                    let value = container.fields().get(&field)?.value.clone();
                    Some((field, value))
                })
                .collect(),
            None => Vec::new(),
        };
        Ok((page.cursor, entries))
    }

    // ========================================================================
    // EXPIRATION
    // ========================================================================

    /// Runs one tick of the active cycle and returns the fields deleted.
    ///
    /// Visits up to `dbs_per_active_loop` databases round-robin, skipping
    /// empty ones. Does nothing on a replica.
    pub fn active_expire_cycle(&mut self) -> Result<usize> {
        if !self.role.is_writable() {
            return Ok(0);
        }

        let started = Instant::now();
        self.cycle.begin();
        let result = self.visit_databases();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.cycle.finish(result.is_ok().then_some(elapsed_ms));
        result
    }

    fn visit_databases(&mut self) -> Result<usize> {
        let databases = self.databases.len();
        let budget = self.config.keys_per_active_loop;
        let mut expired = 0;

        for _ in 0..self.config.dbs_per_active_loop.min(databases) {
            let db = self.cycle.next_db(databases);
            if self.databases[db].is_empty() {
                continue;
            }
            expired += self.context(db)?.active_expire(budget)?;
        }
        Ok(expired)
    }

    /// Deletes up to `budget` expired fields of one database.
    pub fn active_expire(&mut self, db: usize, budget: usize) -> Result<usize> {
        if !self.role.is_writable() {
            self.check_db(db)?;
            return Ok(0);
        }
        self.context(db)?.active_expire(budget)
    }

    pub fn counters(&self, db: usize) -> Result<ExpireCounters> {
        self.check_db(db)?;
        Ok(self.counters[db])
    }

    pub fn cycle_stats(&self) -> CycleStats {
        self.cycle.stats()
    }

    pub fn cycle_state(&self) -> CycleState {
        self.cycle.state()
    }

    /// True while an [`ExpireTimer`](super::ExpireTimer) task is pending.
    pub fn timer_armed(&self) -> bool {
        self.cycle.timer_armed()
    }

    pub(crate) fn arm_timer(&mut self) -> bool {
        self.cycle.arm_timer()
    }

    pub(crate) fn disarm_timer(&mut self) {
        self.cycle.disarm_timer();
    }

    /// The expiration report: settings, cycle timing and per-database counters.
    pub fn info(&self) -> String {
        render_info(&self.config, &self.cycle.stats(), &self.counters)
    }

    /// The expire index of `db`.
    pub fn index(&self, db: usize) -> Result<&ExpireIndex> {
        self.check_db(db)?;
        Ok(self.indexes.index(db))
    }

    /// Checks that the index of `db` holds exactly the entries its
    /// containers call for.
    pub fn verify_index(&self, db: usize) -> Result<()> {
        self.check_db(db)?;
        let mut expected: Vec<IndexEntry> = Vec::new();
        for container in self.databases[db].containers() {
            let key = container.key();
            match self.indexes.index(db) {
                ExpireIndex::Coarse(_) => {
                    if let Some(at) = container.fields().min_expire() {
                        expected.push(IndexEntry {
                            expire_at: at,
                            key: key.clone(),
                            field: None,
                        });
                    }
                }
                ExpireIndex::Fine(_) => {
                    expected.extend(container.fields().expiring().map(|(at, field)| IndexEntry {
                        expire_at: at,
                        key: key.clone(),
                        field: Some(field.clone()),
                    }));
                }
            }
        }
        expected.sort_by(|a, b| {
            (a.expire_at, &a.key, &a.field).cmp(&(b.expire_at, &b.key, &b.field))
        });

        let actual = self.indexes.index(db).to_vec();
        if actual == expected {
            Ok(())
        } else {
            Err(HashError::Internal(format!(
                "index of db {} has {} entries, containers call for {}",
                db,
                actual.len(),
                expected.len()
            )))
        }
    }

    // ========================================================================
    // KEY LIFECYCLE
    // ========================================================================

    /// Type name of the value under `key`.
    pub fn key_type(&self, db: usize, key: &[u8]) -> Result<Option<&'static str>> {
        self.check_db(db)?;
        Ok(self.databases[db].get(key).map(Value::type_name))
    }

    /// Every key in `db`, in no particular order.
    pub fn keys(&self, db: usize) -> Result<Vec<Bytes>> {
        self.check_db(db)?;
        Ok(self.databases[db].keys().cloned().collect())
    }

    /// Number of keys in `db`.
    pub fn db_size(&self, db: usize) -> Result<usize> {
        self.check_db(db)?;
        Ok(self.databases[db].len())
    }

    /// Stores a value of some other type under `key`, replacing what was there.
    pub fn insert_foreign(
        &mut self,
        db: usize,
        key: Bytes,
        type_name: &'static str,
        payload: Bytes,
    ) -> Result<()> {
        self.delete_key(db, &key)?;
        self.databases[db].insert(key, Value::Other { type_name, payload });
        Ok(())
    }

    /// Deletes a key of any type. Index entries of a container go with it.
    pub fn delete_key(&mut self, db: usize, key: &[u8]) -> Result<bool> {
        self.check_db(db)?;
        let Some(value) = self.databases[db].remove(key) else {
            return Ok(false);
        };
        if let Value::Hash(container) = &value {
            self.indexes
                .index_mut(db)
                .detach(container.key(), container.fields().expiring());
            debug!(db, key = ?container.key(), "Detached deleted container");
        }
        Ok(true)
    }

    /// Renames a key within `db`, replacing any value under `to`.
    pub fn rename_key(&mut self, db: usize, from: &Bytes, to: Bytes) -> Result<()> {
        self.check_db(db)?;
        let is_container = match self.databases[db].get(from) {
            None => return Err(HashError::NotFound),
            Some(value) => value.as_container().is_some(),
        };
        if from == &to {
            return Ok(());
        }

        if is_container {
            self.on_rename_from(db, from.clone())?;
        }
        self.delete_key(db, &to)?;
        if let Some(value) = self.databases[db].remove(from) {
            self.databases[db].insert(to.clone(), value);
        }
        if is_container {
            self.on_rename_to(db, to)?;
        }
        Ok(())
    }

    /// Moves a key to another database. Returns false if it is missing or
    /// the target already holds the key.
    pub fn move_key(&mut self, from_db: usize, key: &Bytes, to_db: usize) -> Result<bool> {
        self.check_db(from_db)?;
        self.check_db(to_db)?;
        if from_db == to_db {
            return Err(HashError::Syntax);
        }
        let is_container = match self.databases[from_db].get(key) {
            None => return Ok(false),
            Some(value) => value.as_container().is_some(),
        };
        if self.databases[to_db].contains(key) {
            return Ok(false);
        }

        if is_container {
            self.on_move_from(from_db, key.clone())?;
        }
        if let Some(value) = self.databases[from_db].remove(key) {
            self.databases[to_db].insert(key.clone(), value);
        }
        if is_container {
            self.on_move_to(to_db, key.clone())?;
        }
        Ok(true)
    }

    /// Copies a key, possibly to another database.
    ///
    /// Returns false if the source is missing, or the destination exists and
    /// `replace` is not set.
    pub fn copy_key(
        &mut self,
        src_db: usize,
        src: &Bytes,
        dst_db: usize,
        dst: Bytes,
        replace: bool,
    ) -> Result<bool> {
        self.check_db(src_db)?;
        self.check_db(dst_db)?;
        if src_db == dst_db && src == &dst {
            return Err(HashError::Syntax);
        }
        let Some(value) = self.databases[src_db].get(src).cloned() else {
            return Ok(false);
        };
        if self.databases[dst_db].contains(&dst) {
            if !replace {
                return Ok(false);
            }
            self.delete_key(dst_db, &dst)?;
        }

        let value = match value {
            Value::Hash(mut container) => {
                container.set_key(dst.clone());
                self.indexes
                    .index_mut(dst_db)
                    .attach(&dst, container.fields().expiring());
                Value::Hash(container)
            }
            other => other,
        };
        self.databases[dst_db].insert(dst, value);
        Ok(true)
    }

    /// Empties one database and resets its index.
    pub fn flush_db(&mut self, db: usize) -> Result<()> {
        self.check_db(db)?;
        self.databases[db].clear();
        self.indexes.reset(db);
        info!(db, "Database flushed");
        Ok(())
    }

    pub fn flush_all(&mut self) {
        for database in &mut self.databases {
            database.clear();
        }
        self.indexes.reset_all();
        info!("All databases flushed");
    }

    /// Swaps the contents, indexes and counters of two databases.
    pub fn swap_db(&mut self, a: usize, b: usize) -> Result<()> {
        self.check_db(a)?;
        self.check_db(b)?;
        if a == b {
            return Ok(());
        }
        self.databases.swap(a, b);
        self.indexes.swap(a, b);
        self.counters.swap(a, b);
        info!(a, b, "Databases swapped");
        Ok(())
    }

    /// Host notification: `key` in `db` is about to be renamed.
    pub fn on_rename_from(&mut self, db: usize, key: Bytes) -> Result<()> {
        self.check_db(db)?;
        self.relocations.rename_from(db, key);
        Ok(())
    }

    /// Host notification: the pending rename landed on `key`.
    pub fn on_rename_to(&mut self, db: usize, key: Bytes) -> Result<()> {
        self.check_db(db)?;
        if let Some(relocation) = self.relocations.rename_to(db, key) {
            self.relocate(relocation);
        }
        Ok(())
    }

    /// Host notification: `key` is about to leave `db`.
    pub fn on_move_from(&mut self, db: usize, key: Bytes) -> Result<()> {
        self.check_db(db)?;
        self.relocations.move_from(db, key);
        Ok(())
    }

    /// Host notification: the pending move landed in `db`.
    pub fn on_move_to(&mut self, db: usize, key: Bytes) -> Result<()> {
        self.check_db(db)?;
        if let Some(relocation) = self.relocations.move_to(db, key) {
            self.relocate(relocation);
        }
        Ok(())
    }

    /// Re-files the index entries of a container that changed key or database.
    fn relocate(&mut self, relocation: Relocation) {
        let Relocation {
            from_db,
            from_key,
            to_db,
            to_key,
        } = relocation;

        let Some(Value::Hash(container)) = self.databases[to_db].get_mut(&to_key) else {
            warn!(db = to_db, key = ?to_key, "Relocated key does not hold a container");
            return;
        };
        container.set_key(to_key.clone());
        if container.fields().min_expire().is_none() {
            return;
        }

        self.indexes
            .index_mut(from_db)
            .detach(&from_key, container.fields().expiring());
        self.indexes
            .index_mut(to_db)
            .attach(&to_key, container.fields().expiring());
        debug!(
            from_db,
            to_db,
            from_key = ?from_key,
            to_key = ?to_key,
            "Relocated index entries"
        );
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Serializes the container under `key`.
    pub fn dump_container(&self, db: usize, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.container(db, key)?.map(snapshot::encode))
    }

    /// Loads a serialized container into `db`, replacing any value under its
    /// key, and rebuilds its index entries. Returns the key.
    pub fn load_container(&mut self, db: usize, payload: &[u8]) -> Result<Bytes> {
        self.check_db(db)?;
        let container = snapshot::decode(payload)?;
        let key = container.key().clone();

        self.delete_key(db, &key)?;
        self.indexes
            .index_mut(db)
            .attach(&key, container.fields().expiring());
        debug!(db, key = ?key, fields = container.fields().len(), "Container loaded");
        self.databases[db].insert(key.clone(), Value::Hash(container));
        Ok(key)
    }

    /// Order-independent digest of a container's fields and values.
    pub fn digest(&self, db: usize, key: &[u8]) -> Result<Option<u64>> {
        Ok(self.container(db, key)?.map(|container| {
            let mut digest = XorDigest::new();
            container.digest(&mut digest);
            digest.value()
        }))
    }

    /// The commands that rebuild a container, skipping expired fields.
    pub fn rewrite(&self, db: usize, key: &[u8]) -> Result<Vec<ReplicatedCommand>> {
        let now = self.now();
        Ok(self
            .container(db, key)?
            .map_or_else(Vec::new, |container| container.rewrite(now)))
    }
}

/// Deletes one field through the passive check and the version gate.
fn delete_one(
    ctx: &mut DbContext<'_>,
    key: &Bytes,
    field: &[u8],
    policy: VersionPolicy,
) -> Result<bool> {
    if ctx.expire_if_needed(key, field)? {
        return Ok(false);
    }
    let now = ctx.now;
    let Some(container) = ctx.data.container_mut(key)? else {
        return Ok(false);
    };
    let Some((_, change)) = container.fields_mut().delete(field, policy, now)? else {
        return Ok(false);
    };
    ctx.sync_index(key, &change);
    ctx.emit(ReplicatedCommand::Delete {
        key: key.clone(),
        field: change.field,
    });
    Ok(true)
}
