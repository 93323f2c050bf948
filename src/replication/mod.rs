//! Replication Module
//!
//! Every effect the engine has on a container is propagated as one fully
//! resolved command: absolute versions and absolute millisecond timestamps,
//! never "now + n". A replica applying the stream therefore reaches the same
//! state regardless of its own clock or the time it receives the command.
//!
//! ## Command set
//!
//! | command      | wire form                                        |
//! |--------------|--------------------------------------------------|
//! | `Set`        | `FSET key field value ABS version [PXAT expire]` |
//! | `Delete`     | `FDEL key field`                                 |
//! | `ExpireAt`   | `FPEXPIREAT key field expire ABS version`        |
//! | `Persist`    | `FPERSIST key field`                             |
//! | `SetVersion` | `FSETVER key field version`                      |
//! | `DeleteKey`  | `DEL key`                                        |

use crate::protocol::{FrameParser, ParseError, RespValue};
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// A deterministic command describing one effect on the key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicatedCommand {
    Set {
        key: Bytes,
        field: Bytes,
        value: Bytes,
        version: u64,
        /// 0 = no TTL
        expire_at: u64,
    },
    Delete {
        key: Bytes,
        field: Bytes,
    },
    ExpireAt {
        key: Bytes,
        field: Bytes,
        expire_at: u64,
        version: u64,
    },
    Persist {
        key: Bytes,
        field: Bytes,
    },
    SetVersion {
        key: Bytes,
        field: Bytes,
        version: u64,
    },
    DeleteKey {
        key: Bytes,
    },
}

impl ReplicatedCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ReplicatedCommand::Set { .. } => "FSET",
            ReplicatedCommand::Delete { .. } => "FDEL",
            ReplicatedCommand::ExpireAt { .. } => "FPEXPIREAT",
            ReplicatedCommand::Persist { .. } => "FPERSIST",
            ReplicatedCommand::SetVersion { .. } => "FSETVER",
            ReplicatedCommand::DeleteKey { .. } => "DEL",
        }
    }

    /// The container key the command targets.
    pub fn key(&self) -> &Bytes {
        match self {
            ReplicatedCommand::Set { key, .. }
            | ReplicatedCommand::Delete { key, .. }
            | ReplicatedCommand::ExpireAt { key, .. }
            | ReplicatedCommand::Persist { key, .. }
            | ReplicatedCommand::SetVersion { key, .. }
            | ReplicatedCommand::DeleteKey { key } => key,
        }
    }

    /// The command as a list of arguments, name first.
    pub fn to_args(&self) -> Vec<Bytes> {
        let name = Bytes::from_static(self.name().as_bytes());
        match self {
            ReplicatedCommand::Set {
                key,
                field,
                value,
                version,
                expire_at,
            } => {
                let mut args = vec![
                    name,
                    key.clone(),
                    field.clone(),
                    value.clone(),
                    Bytes::from_static(b"ABS"),
                    number(*version),
                ];
                if *expire_at > 0 {
                    args.push(Bytes::from_static(b"PXAT"));
                    args.push(number(*expire_at));
                }
                args
            }
            ReplicatedCommand::Delete { key, field } | ReplicatedCommand::Persist { key, field } => {
                vec![name, key.clone(), field.clone()]
            }
            ReplicatedCommand::ExpireAt {
                key,
                field,
                expire_at,
                version,
            } => vec![
                name,
                key.clone(),
                field.clone(),
                number(*expire_at),
                Bytes::from_static(b"ABS"),
                number(*version),
            ],
            ReplicatedCommand::SetVersion {
                key,
                field,
                version,
            } => vec![name, key.clone(), field.clone(), number(*version)],
            ReplicatedCommand::DeleteKey { key } => vec![name, key.clone()],
        }
    }

    pub fn to_frame(&self) -> RespValue {
        RespValue::command(self.to_args())
    }

    /// Decodes a command from its argument list.
    pub fn from_args(args: &[Bytes]) -> Result<Self, DecodeError> {
        let (name, rest) = args.split_first().ok_or(DecodeError::Empty)?;
        let name = std::str::from_utf8(name)
            .map_err(|_| DecodeError::UnknownCommand(String::from_utf8_lossy(name).into_owned()))?
            .to_ascii_uppercase();

        match (name.as_str(), rest) {
            ("FSET", [key, field, value, abs, version]) if is(abs, "ABS") => {
                Ok(ReplicatedCommand::Set {
                    key: key.clone(),
                    field: field.clone(),
                    value: value.clone(),
                    version: parse_u64(version)?,
                    expire_at: 0,
                })
            }
            ("FSET", [key, field, value, abs, version, pxat, expire_at])
                if is(abs, "ABS") && is(pxat, "PXAT") =>
            {
                Ok(ReplicatedCommand::Set {
                    key: key.clone(),
                    field: field.clone(),
                    value: value.clone(),
                    version: parse_u64(version)?,
                    expire_at: parse_u64(expire_at)?,
                })
            }
            ("FDEL", [key, field]) => Ok(ReplicatedCommand::Delete {
                key: key.clone(),
                field: field.clone(),
            }),
            ("FPEXPIREAT", [key, field, expire_at, abs, version]) if is(abs, "ABS") => {
                Ok(ReplicatedCommand::ExpireAt {
                    key: key.clone(),
                    field: field.clone(),
                    expire_at: parse_u64(expire_at)?,
                    version: parse_u64(version)?,
                })
            }
            ("FPERSIST", [key, field]) => Ok(ReplicatedCommand::Persist {
                key: key.clone(),
                field: field.clone(),
            }),
            ("FSETVER", [key, field, version]) => Ok(ReplicatedCommand::SetVersion {
                key: key.clone(),
                field: field.clone(),
                version: parse_u64(version)?,
            }),
            ("DEL", [key]) => Ok(ReplicatedCommand::DeleteKey { key: key.clone() }),
            ("FSET" | "FDEL" | "FPEXPIREAT" | "FPERSIST" | "FSETVER" | "DEL", _) => {
                Err(DecodeError::Arguments(name.clone()))
            }
            _ => Err(DecodeError::UnknownCommand(name.clone())),
        }
    }
}

impl fmt::Display for ReplicatedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_frame())
    }
}

fn number(n: u64) -> Bytes {
    Bytes::from(n.to_string())
}

fn is(arg: &[u8], keyword: &str) -> bool {
    arg.eq_ignore_ascii_case(keyword.as_bytes())
}

fn parse_u64(arg: &[u8]) -> Result<u64, DecodeError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DecodeError::InvalidNumber(String::from_utf8_lossy(arg).into_owned()))
}

/// Errors decoding a replication stream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("empty command")]
    Empty,

    #[error("unknown replicated command '{0}'")]
    UnknownCommand(String),

    #[error("wrong arguments for '{0}'")]
    Arguments(String),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error(transparent)]
    Frame(#[from] ParseError),
}

/// One decoded entry of a replication stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Select(usize),
    Command(ReplicatedCommand),
}

impl LogEntry {
    pub fn from_args(args: &[Bytes]) -> Result<Self, DecodeError> {
        match args {
            [name, db] if is(name, "SELECT") => {
                let db = parse_u64(db)?;
                usize::try_from(db)
                    .map(LogEntry::Select)
                    .map_err(|_| DecodeError::InvalidNumber(db.to_string()))
            }
            _ => ReplicatedCommand::from_args(args).map(LogEntry::Command),
        }
    }
}

/// Receives the commands an engine propagates.
///
/// Emission order is the order effects were applied.
pub trait ReplicationSink: Send + fmt::Debug {
    fn emit(&mut self, db: usize, command: ReplicatedCommand);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReplicationSink for NullSink {
    fn emit(&mut self, _db: usize, _command: ReplicatedCommand) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A sink that records commands in memory.
///
/// Clones share the same record, so a test can keep one handle while the
/// engine owns another.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    commands: Arc<Mutex<Vec<(usize, ReplicatedCommand)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    pub fn commands(&self) -> Vec<(usize, ReplicatedCommand)> {
        lock(&self.commands).clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<(usize, ReplicatedCommand)> {
        std::mem::take(&mut *lock(&self.commands))
    }

    pub fn len(&self) -> usize {
        lock(&self.commands).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.commands).is_empty()
    }
}

impl ReplicationSink for MemorySink {
    fn emit(&mut self, db: usize, command: ReplicatedCommand) {
        lock(&self.commands).push((db, command));
    }
}

#[derive(Debug, Default)]
struct LogState {
    buffer: Vec<u8>,
    selected: Option<usize>,
}

/// A sink that serializes commands as a RESP stream.
///
/// A `SELECT db` frame is written whenever the database changes. Clones
/// share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct ReplicationLog {
    state: Arc<Mutex<LogState>>,
}

impl ReplicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the bytes written so far.
    pub fn take_bytes(&self) -> Bytes {
        let mut state = lock(&self.state);
        Bytes::from(std::mem::take(&mut state.buffer))
    }

    pub fn len(&self) -> usize {
        lock(&self.state).buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).buffer.is_empty()
    }

    /// Decodes a complete stream into entries.
    pub fn decode(bytes: &[u8]) -> Result<Vec<LogEntry>, DecodeError> {
        let mut parser = FrameParser::new();
        parser.feed(bytes);
        let mut entries = Vec::new();
        while let Some(args) = parser.next_command()? {
            entries.push(LogEntry::from_args(&args)?);
        }
        if parser.pending() > 0 {
            return Err(DecodeError::Frame(ParseError::ProtocolError(
                "truncated frame at end of stream".to_string(),
            )));
        }
        Ok(entries)
    }
}

impl ReplicationSink for ReplicationLog {
    fn emit(&mut self, db: usize, command: ReplicatedCommand) {
        let mut state = lock(&self.state);
        if state.selected != Some(db) {
            RespValue::command([Bytes::from_static(b"SELECT"), number(db as u64)])
                .serialize_into(&mut state.buffer);
            state.selected = Some(db);
        }
        command.to_frame().serialize_into(&mut state.buffer);
    }
}
