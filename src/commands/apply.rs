//! Replica-side application of replicated commands.
//!
//! A primary only ever propagates absolute state: versions and expiry
//! timestamps are already resolved. Applying a command therefore stores what
//! it says, with no version gate, no passive checks and no clock reads, and
//! the replica converges regardless of its own clock.
//!
//! ```text
//!  primary log bytes ──▶ FrameParser ──▶ LogEntry ──┬─ SELECT db ──▶ selected db
//!                                                   └─ command ───▶ apply_replicated
//!                                                                       │
//!                                                                       ▼
//!                                                   replica sink (chained replication)
//! ```

use crate::error::HashError;
use crate::protocol::FrameParser;
use crate::replication::{DecodeError, LogEntry, ReplicatedCommand};
use crate::storage::{DbContext, FieldRecord, HashEngine};
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};

/// Failure while applying a replication stream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApplyError {
    /// The stream could not be decoded.
    #[error("malformed replication stream: {0}")]
    Decode(#[from] DecodeError),

    /// The engine rejected a command.
    #[error(transparent)]
    Engine(#[from] HashError),
}

/// Applies one replicated command to `db` verbatim and forwards it to the
/// engine's own sink.
///
/// Commands naming a field that does not exist are no-ops, except `FSET`.
pub fn apply_replicated(
    engine: &mut HashEngine,
    db: usize,
    command: ReplicatedCommand,
) -> Result<(), HashError> {
    if let ReplicatedCommand::DeleteKey { key } = &command {
        engine.delete_key(db, key)?;
        engine.context(db)?.emit(command);
        return Ok(());
    }

    let mut ctx = engine.context(db)?;
    match &command {
        ReplicatedCommand::Set {
            key,
            field,
            value,
            version,
            expire_at,
        } => {
            ctx.data.check_type(key)?;
            let record = FieldRecord {
                value: value.clone(),
                version: *version,
                expire_at: *expire_at,
            };
            let change = ctx.write(key, |fields, _| Ok(fields.put(field.clone(), record)))?;
            ctx.sync_index(key, &change);
        }
        ReplicatedCommand::Delete { key, field } => {
            let removed = match ctx.data.container_mut(key)? {
                Some(container) => container.fields_mut().remove(field),
                None => None,
            };
            if let Some((_, change)) = removed {
                ctx.sync_index(key, &change);
            }
        }
        ReplicatedCommand::ExpireAt {
            key,
            field,
            expire_at,
            version,
        } => update_record(&mut ctx, key, field, |record| {
            record.expire_at = *expire_at;
            record.version = *version;
        })?,
        ReplicatedCommand::Persist { key, field } => {
            update_record(&mut ctx, key, field, |record| record.expire_at = 0)?
        }
        ReplicatedCommand::SetVersion {
            key,
            field,
            version,
        } => update_record(&mut ctx, key, field, |record| record.version = *version)?,
        ReplicatedCommand::DeleteKey { .. } => {}
    }

    ctx.emit(command);
    Ok(())
}

/// Rewrites an existing record in place and mirrors the change into the index.
fn update_record(
    ctx: &mut DbContext<'_>,
    key: &Bytes,
    field: &Bytes,
    update: impl FnOnce(&mut FieldRecord),
) -> Result<(), HashError> {
    let Some(container) = ctx.data.container_mut(key)? else {
        trace!(db = ctx.db, key = ?key, "Replicated update for a missing key");
        return Ok(());
    };
    let Some(mut record) = container.fields().get(field).cloned() else {
        trace!(db = ctx.db, key = ?key, field = ?field, "Replicated update for a missing field");
        return Ok(());
    };
    update(&mut record);
    let change = container.fields_mut().put(field.clone(), record);
    ctx.sync_index(key, &change);
    Ok(())
}

/// Applies a replication stream as it arrives.
///
/// Input may be split anywhere; incomplete frames are kept until the rest
/// arrives. `SELECT` frames switch the database later commands apply to.
///
/// # Example
///
/// ```
/// use ttlhash::commands::ReplicaApplier;
/// use ttlhash::storage::{HashEngine, Role};
///
/// let mut replica = HashEngine::default();
/// replica.set_role(Role::Replica);
///
/// let mut applier = ReplicaApplier::new();
/// let stream = b"*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n*6\r\n$4\r\nFSET\r\n$1\r\nk\r\n$1\r\nf\r\n$1\r\nv\r\n$3\r\nABS\r\n$1\r\n7\r\n";
/// assert_eq!(applier.feed(&mut replica, stream).unwrap(), 1);
/// assert_eq!(replica.get_version(3, &"k".into(), b"f").unwrap(), 7);
/// ```
#[derive(Debug, Default)]
pub struct ReplicaApplier {
    parser: FrameParser,
    selected: usize,
    applied: u64,
}

impl ReplicaApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database the next command applies to.
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Commands applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Bytes received but not yet forming a complete frame.
    pub fn pending(&self) -> usize {
        self.parser.pending()
    }

    /// Feeds received bytes and applies every complete command.
    ///
    /// Returns the number of commands applied by this call. On error the
    /// commands before the failing one stay applied.
    pub fn feed(&mut self, engine: &mut HashEngine, data: &[u8]) -> Result<usize, ApplyError> {
        self.parser.feed(data);
        let mut applied = 0;
        while let Some(args) = self.parser.next_command().map_err(DecodeError::from)? {
            match LogEntry::from_args(&args)? {
                LogEntry::Select(db) => {
                    if db >= engine.databases() {
                        return Err(HashError::InvalidDb(db).into());
                    }
                    self.selected = db;
                }
                LogEntry::Command(command) => {
                    apply_replicated(engine, self.selected, command)?;
                    applied += 1;
                    self.applied += 1;
                }
            }
        }
        if applied > 0 {
            debug!(applied, db = self.selected, "Applied replicated commands");
        }
        Ok(applied)
    }
}
