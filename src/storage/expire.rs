//! Passive and active field expiration.
//!
//! Both paths end in [`DbContext::delete_and_propagate`]: the record is
//! removed, its index entry follows in the same step, the per-database
//! counter is bumped and a single `FDEL key field` is emitted. A container
//! left empty is removed and `DEL key` is emitted.
//!
//! ```text
//!   command ──▶ passive_sweep ──▶ expire_if_needed ──┐
//!                                                    ├──▶ delete_and_propagate ──▶ sink
//!   timer ───▶ active_expire (index minimum) ────────┘
//! ```
//!
//! A replica never deletes on its own. It reports expired fields as absent
//! and waits for the primary's deletes.

use super::fields::FieldStore;
use super::keyspace::{Database, Value};
use super::record::FieldRecord;
use crate::config::ExpireConfig;
use crate::error::{HashError, Result};
use crate::index::{ExpireChange, ExpireIndex, IndexEntry};
use crate::replication::{ReplicatedCommand, ReplicationSink};
use bytes::Bytes;
use std::fmt::Write as _;
use tracing::{debug, error, trace};

/// Whether this engine may mutate state on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Primary,
    /// Read-only follower: expiration is reported, never applied
    Replica,
}

impl Role {
    pub fn is_writable(self) -> bool {
        self == Role::Primary
    }
}

/// What caused a field to be deleted on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireTrigger {
    Active,
    Passive,
}

/// Expired-field counters of one database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpireCounters {
    pub active: u64,
    pub passive: u64,
}

impl ExpireCounters {
    pub fn record(&mut self, trigger: ExpireTrigger) {
        match trigger {
            ExpireTrigger::Active => self.active += 1,
            ExpireTrigger::Passive => self.passive += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.active + self.passive
    }
}

/// Timing statistics of the active cycle, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Duration of the most recent tick
    pub last_ms: u64,
    /// Longest tick so far
    pub max_ms: u64,
    /// Average over the last complete window of ticks
    pub avg_ms: u64,
    /// Ticks that did work
    pub ticks: u64,
}

/// Ticks averaged together into [`CycleStats::avg_ms`].
pub const AVERAGE_WINDOW: u64 = 10;

/// Where the active cycle is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CycleState {
    #[default]
    Idle,
    /// A tick is visiting databases
    Running,
}

/// Round-robin position, state and timing of the active cycle.
#[derive(Debug, Clone, Default)]
pub struct ActiveExpireCycle {
    cursor: usize,
    state: CycleState,
    /// True while a timer task is pending
    timer_armed: bool,
    stats: CycleStats,
    window_ticks: u64,
    window_total_ms: u64,
}

impl ActiveExpireCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Enters `Running` at the start of a tick.
    pub fn begin(&mut self) {
        self.state = CycleState::Running;
    }

    /// Returns to `Idle`, recording the tick's duration if it completed.
    pub fn finish(&mut self, elapsed_ms: Option<u64>) {
        self.state = CycleState::Idle;
        if let Some(elapsed_ms) = elapsed_ms {
            self.record(elapsed_ms);
        }
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Marks a timer as pending. Returns false if one already is.
    pub fn arm_timer(&mut self) -> bool {
        !std::mem::replace(&mut self.timer_armed, true)
    }

    pub fn disarm_timer(&mut self) {
        self.timer_armed = false;
    }

    /// The database the next tick starts from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Returns the database to visit and advances the cursor past it.
    pub fn next_db(&mut self, databases: usize) -> usize {
        let db = self.cursor % databases.max(1);
        self.cursor = (db + 1) % databases.max(1);
        db
    }

    /// Records the duration of one tick.
    pub fn record(&mut self, elapsed_ms: u64) {
        self.stats.ticks += 1;
        self.stats.last_ms = elapsed_ms;
        self.stats.max_ms = self.stats.max_ms.max(elapsed_ms);

        self.window_total_ms += elapsed_ms;
        self.window_ticks += 1;
        if self.window_ticks == AVERAGE_WINDOW {
            self.stats.avg_ms = self.window_total_ms / self.window_ticks;
            self.window_ticks = 0;
            self.window_total_ms = 0;
        }
    }
}

/// Mutable view of one database and everything that follows its changes.
///
/// Borrowed from the engine for the duration of a single operation.
#[derive(Debug)]
pub(crate) struct DbContext<'a> {
    pub db: usize,
    pub now: u64,
    pub role: Role,
    pub data: &'a mut Database,
    pub index: &'a mut ExpireIndex,
    pub counters: &'a mut ExpireCounters,
    pub sink: &'a mut dyn ReplicationSink,
}

impl DbContext<'_> {
    pub fn emit(&mut self, command: ReplicatedCommand) {
        self.sink.emit(self.db, command);
    }

    /// Mirrors a field mutation of container `key` into the index.
    pub fn sync_index(&mut self, key: &Bytes, change: &ExpireChange) {
        if change.is_noop() {
            return;
        }
        trace!(
            db = self.db,
            key = ?key,
            field = ?change.field,
            old = change.old_expire_at,
            new = change.new_expire_at,
            "Expire index updated"
        );
        self.index.apply(key, change);
    }

    /// Runs a write against the container under `key`, creating it first if
    /// needed. A container created for a write that stored nothing is
    /// dropped again without a trace.
    pub fn write<T>(
        &mut self,
        key: &Bytes,
        op: impl FnOnce(&mut FieldStore, u64) -> Result<T>,
    ) -> Result<T> {
        let existed = self.data.contains(key);
        let now = self.now;
        let container = self.data.container_or_create(key)?;
        let result = op(container.fields_mut(), now);
        if !existed && container.is_empty() {
            self.data.remove(key);
        }
        result
    }

    /// Checks a single field before it is read or written.
    ///
    /// Returns true if the field has expired. On a primary the field is
    /// deleted and the deletion propagated; a replica only reports it.
    pub fn expire_if_needed(&mut self, key: &Bytes, field: &[u8]) -> Result<bool> {
        let expired = match self.data.container(key)? {
            Some(container) => container
                .fields()
                .get(field)
                .is_some_and(|record| record.is_expired(self.now)),
            None => false,
        };
        if expired && self.role.is_writable() {
            self.delete_and_propagate(key, field, ExpireTrigger::Passive)?;
        }
        Ok(expired)
    }

    /// Returns a field for reading once the passive check has run.
    pub fn live_field(&mut self, key: &Bytes, field: &[u8]) -> Result<Option<&FieldRecord>> {
        if self.expire_if_needed(key, field)? {
            return Ok(None);
        }
        Ok(self
            .data
            .container(key)?
            .and_then(|container| container.fields().get(field)))
    }

    /// Deletes up to `limit` already-expired fields of `key`, earliest first.
    pub fn passive_sweep(&mut self, key: &Bytes, limit: usize) -> Result<usize> {
        if !self.role.is_writable() || limit == 0 {
            return Ok(0);
        }
        let expired = match self.data.container(key)? {
            Some(container) => container.fields().expired(self.now, limit),
            None => return Ok(0),
        };
        for (_, field) in &expired {
            self.delete_and_propagate(key, field, ExpireTrigger::Passive)?;
        }
        Ok(expired.len())
    }

    /// Deletes an expired field and propagates the deletion.
    pub fn delete_and_propagate(
        &mut self,
        key: &Bytes,
        field: &[u8],
        trigger: ExpireTrigger,
    ) -> Result<()> {
        let Some(Value::Hash(container)) = self.data.get_mut(key) else {
            return Err(self.invariant(key, "expired field has no container"));
        };
        let Some((record, change)) = container.fields_mut().remove(field) else {
            return Err(self.invariant(key, "expired field is missing from its container"));
        };
        let now_empty = container.is_empty();

        self.sync_index(key, &change);
        self.counters.record(trigger);
        debug!(
            db = self.db,
            key = ?key,
            field = ?change.field,
            expire_at = record.expire_at,
            ?trigger,
            "Field expired"
        );
        self.emit(ReplicatedCommand::Delete {
            key: key.clone(),
            field: change.field,
        });

        if now_empty {
            self.remove_if_empty(key);
        }
        Ok(())
    }

    /// Removes `key` if its container has no fields left and emits `DEL`.
    ///
    /// A replica keeps empty containers until the primary deletes them.
    pub fn remove_if_empty(&mut self, key: &Bytes) -> bool {
        if !self.role.is_writable() || !self.data.remove_if_empty(key) {
            return false;
        }
        debug!(db = self.db, key = ?key, "Removed empty container");
        self.emit(ReplicatedCommand::DeleteKey { key: key.clone() });
        true
    }

    /// Deletes expired fields from the index minimum until the minimum lies
    /// in the future or `budget` fields have been deleted.
    pub fn active_expire(&mut self, budget: usize) -> Result<usize> {
        let mut expired = 0;
        while expired < budget {
            let Some(entry) = self.index.peek_min() else {
                break;
            };
            if entry.expire_at > self.now {
                break;
            }
            let field = match entry.field.clone() {
                Some(field) => field,
                None => self.earliest_field(&entry)?,
            };
            self.delete_and_propagate(&entry.key, &field, ExpireTrigger::Active)?;
            expired += 1;
        }

        if expired > 0 {
            debug!(
                db = self.db,
                expired,
                remaining = self.index.len(),
                "Active expire pass"
            );
        }
        Ok(expired)
    }

    /// Resolves a coarse entry to the field it stands for.
    fn earliest_field(&self, entry: &IndexEntry) -> Result<Bytes> {
        let earliest = self
            .data
            .get(&entry.key)
            .and_then(Value::as_container)
            .and_then(|container| container.fields().earliest());
        match earliest {
            Some((at, field)) if at == entry.expire_at => Ok(field.clone()),
            _ => Err(self.invariant(&entry.key, "index minimum does not match its container")),
        }
    }

    fn invariant(&self, key: &Bytes, what: &str) -> HashError {
        error!(db = self.db, key = ?key, "{}", what);
        HashError::Internal(format!(
            "{} (db {}, key '{}')",
            what,
            self.db,
            String::from_utf8_lossy(key)
        ))
    }
}

/// Renders the expiration report.
///
/// Databases with no expired fields are left out of the detail section.
pub fn render_info(config: &ExpireConfig, stats: &CycleStats, counters: &[ExpireCounters]) -> String {
    let mut out = String::new();
    out.push_str("# Active expire statistics\r\n");
    let _ = write!(
        out,
        "enable_active_expire:{}\r\n\
         active_expire_period:{}\r\n\
         active_expire_keys_per_loop:{}\r\n\
         active_expire_dbs_per_loop:{}\r\n\
         active_expire_last_time_msec:{}\r\n\
         active_expire_max_time_msec:{}\r\n\
         active_expire_avg_time_msec:{}\r\n\
         passive_expire_keys_per_loop:{}\r\n",
        u8::from(config.enable_active_expire),
        config.active_expire_period.as_millis(),
        config.keys_per_active_loop,
        config.dbs_per_active_loop,
        stats.last_ms,
        stats.max_ms,
        stats.avg_ms,
        config.keys_per_passive_loop,
    );

    out.push_str("\r\n# DB detail statistics\r\n");
    for (db, counter) in counters.iter().enumerate() {
        if counter.total() == 0 {
            continue;
        }
        let _ = write!(
            out,
            "db: {}, active_expired_fields: {}, passive_expired_fields: {}\r\n",
            db, counter.active, counter.passive
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_cursor_wraps() {
        let mut cycle = ActiveExpireCycle::new();
        let visited: Vec<usize> = (0..5).map(|_| cycle.next_db(3)).collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1]);
        assert_eq!(cycle.cursor(), 2);
    }

    #[test]
    fn test_cycle_average_every_window() {
        let mut cycle = ActiveExpireCycle::new();
        for ms in 1..AVERAGE_WINDOW {
            cycle.record(ms);
        }
        assert_eq!(cycle.stats().avg_ms, 0);
        assert_eq!(cycle.stats().max_ms, AVERAGE_WINDOW - 1);

        cycle.record(AVERAGE_WINDOW);
        // 1 + 2 + ... + 10 = 55
        assert_eq!(cycle.stats().avg_ms, 5);
        assert_eq!(cycle.stats().last_ms, AVERAGE_WINDOW);
        assert_eq!(cycle.stats().ticks, AVERAGE_WINDOW);

        cycle.record(0);
        assert_eq!(cycle.stats().avg_ms, 5);
        assert_eq!(cycle.stats().max_ms, AVERAGE_WINDOW);
    }

    #[test]
    fn test_cycle_state_transitions() {
        let mut cycle = ActiveExpireCycle::new();
        assert_eq!(cycle.state(), CycleState::Idle);

        cycle.begin();
        assert_eq!(cycle.state(), CycleState::Running);
        cycle.finish(Some(4));
        assert_eq!(cycle.state(), CycleState::Idle);
        assert_eq!(cycle.stats().ticks, 1);

        // A failed tick leaves no timing behind
        cycle.begin();
        cycle.finish(None);
        assert_eq!(cycle.state(), CycleState::Idle);
        assert_eq!(cycle.stats().ticks, 1);
    }

    #[test]
    fn test_timer_armed_once() {
        let mut cycle = ActiveExpireCycle::new();
        assert!(cycle.arm_timer());
        assert!(!cycle.arm_timer());
        assert!(cycle.timer_armed());

        cycle.disarm_timer();
        assert!(cycle.arm_timer());
    }

    #[test]
    fn test_counters() {
        let mut counters = ExpireCounters::default();
        counters.record(ExpireTrigger::Active);
        counters.record(ExpireTrigger::Passive);
        counters.record(ExpireTrigger::Passive);
        assert_eq!((counters.active, counters.passive, counters.total()), (1, 2, 3));
    }

    #[test]
    fn test_render_info_skips_idle_databases() {
        let config = ExpireConfig::default();
        let stats = CycleStats {
            last_ms: 3,
            max_ms: 7,
            avg_ms: 2,
            ticks: 40,
        };
        let counters = [
            ExpireCounters::default(),
            ExpireCounters {
                active: 4,
                passive: 1,
            },
        ];
        let info = render_info(&config, &stats, &counters);

        assert!(info.starts_with("# Active expire statistics\r\nenable_active_expire:1\r\n"));
        assert!(info.contains("active_expire_period:1000\r\n"));
        assert!(info.contains("active_expire_max_time_msec:7\r\n"));
        assert!(info.contains("passive_expire_keys_per_loop:10\r\n"));
        assert!(info.contains("db: 1, active_expired_fields: 4, passive_expired_fields: 1\r\n"));
        assert!(!info.contains("db: 0,"));
    }
}
