//! # ttlhash - A Hash Type With Per-Field TTL and Versions
//!
//! ttlhash implements a hash container whose fields carry their own
//! time-to-live and optimistic version, together with the machinery that
//! expires fields at scale without scanning every key or field.
//!
//! ## Features
//!
//! - **Per-Field Expiry**: each field has an absolute millisecond expiry
//! - **Version Gate**: compare-and-set, forced and greater-than versions
//! - **Two Index Strategies**: one entry per container or one per field
//! - **Active + Passive Expiry**: a timer drains expired fields, commands
//!   reclaim the ones they touch
//! - **Deterministic Replication**: every effect is emitted with absolute
//!   versions and timestamps, so replicas converge without their own clock
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               ttlhash                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   Command   │───>│                 HashEngine                   │    │
//! │  │   caller    │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │  └─────────────┘    │  │ db 0   │ │ db 1   │ │ db 2   │ │ ...N   │ │    │
//! │                     │  │ index  │ │ index  │ │ index  │ │        │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └───────────────┬──────────────────────▲───────┘    │
//! │                                     │ absolute commands    │            │
//! │                                     ▼                      │            │
//! │  ┌─────────────┐    ┌─────────────────────┐    ┌───────────┴────────┐   │
//! │  │ Replica     │<───│  ReplicationLog     │    │    ExpireTimer     │   │
//! │  │ Applier     │    │  (RESP stream)      │    │ (Background Task)  │   │
//! │  └─────────────┘    └─────────────────────┘    └────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use ttlhash::config::ExpireConfig;
//! use ttlhash::storage::{ExpireTimer, HashEngine};
//! use ttlhash::clock::SystemClock;
//! use std::sync::{Arc, Mutex};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ExpireConfig::from_args(&["expire_strategy", "fine"]).unwrap();
//!     let engine = Arc::new(Mutex::new(HashEngine::new(config, Arc::new(SystemClock))));
//!
//!     // Start the active expire timer
//!     let _timer = ExpireTimer::start(Arc::clone(&engine));
//!
//!     // Serve commands against the engine...
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: expiration settings and argument parsing
//! - [`clock`]: the millisecond wall clock
//! - [`index`]: per-database expire indexes in both strategies
//! - [`storage`]: field store, containers, key space, engine and timer
//! - [`replication`]: replicated commands and sinks
//! - [`protocol`]: RESP framing of the replication stream
//! - [`commands`]: replica-side application of replicated commands
//!
//! ## Design Highlights
//!
//! ### Serialized Access
//!
//! All engine operations take `&mut self`. The timer shares the engine
//! behind a mutex and runs each tick while holding it, so a tick never
//! interleaves with a command.
//!
//! ### Index In Lockstep
//!
//! Every mutation of a field's expiry produces an expire change that is
//! applied to the database index in the same operation. The index always
//! holds exactly the entries its containers call for.

pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod index;
pub mod protocol;
pub mod replication;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{apply_replicated, ReplicaApplier};
pub use config::{ExpireConfig, ExpireStrategy};
pub use error::{ConfigError, HashError, Result};
pub use replication::{ReplicatedCommand, ReplicationLog, ReplicationSink};
pub use storage::{ExpireTimer, HashEngine};

/// Version of ttlhash
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
