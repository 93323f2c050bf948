//! Storage Engine Module
//!
//! This module provides the field-TTL hash type: containers whose fields
//! carry their own version and expiry, the key space that holds them, and
//! the machinery that expires fields actively and passively.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        HashEngine                           │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐        │
//! │  │ Database │ │ Database │ │ Database │ │ ...16    │        │
//! │  │ + index  │ │ + index  │ │ + index  │ │ dbs      │        │
//! │  └──────────┘ └──────────┘ └──────────┘ └──────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │       ExpireTimer         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Per-field TTL**: every field expires on its own schedule
//! - **Versions**: optimistic concurrency through the version gate
//! - **Passive Expiry**: expired fields are reclaimed when touched
//! - **Active Expiry**: the timer drains each database's expire index
//! - **Deterministic Propagation**: effects are emitted as absolute commands
//!
//! ## Example
//!
//! ```
//! use ttlhash::storage::{ExpireTime, HashEngine, SetOptions, TimeUnit, TtlStatus, TtlUpdate};
//! use bytes::Bytes;
//!
//! let mut engine = HashEngine::default();
//! let key = Bytes::from("session:42");
//!
//! let options = SetOptions::new().with_ttl(TtlUpdate::Set(ExpireTime::After(60_000)));
//! engine
//!     .set_field(0, &key, Bytes::from("token"), Bytes::from("abc"), &options)
//!     .unwrap();
//!
//! match engine.ttl(0, &key, b"token", TimeUnit::Seconds).unwrap() {
//!     TtlStatus::Remaining(secs) => assert!(secs <= 60),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod container;
pub mod engine;
pub mod expire;
pub mod expiry;
pub mod fields;
pub mod glob;
pub mod keyspace;
pub mod record;
pub mod rename;
pub mod snapshot;
pub mod version;

// Re-export commonly used types
pub use container::{Container, DigestSink, XorDigest};
pub use engine::{FieldUpdate, HashEngine, DEFAULT_SCAN_COUNT};
pub use expire::{CycleState, CycleStats, ExpireCounters, ExpireTrigger, Role};
pub use expiry::ExpireTimer;
pub use fields::{Bounds, FieldStore, IncrOptions, SetOptions};
pub use glob::GlobPattern;
pub use keyspace::{Database, Value, HASH_TYPE_NAME};
pub use record::{
    ExpireTime, FieldRecord, FieldView, SetCondition, SetOutcome, TimeUnit, TtlStatus, TtlUpdate,
};
pub use rename::{Relocation, RenameMoveCoordinator};
pub use version::VersionPolicy;

pub(crate) use expire::DbContext;
