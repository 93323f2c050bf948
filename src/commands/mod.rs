//! Command Application Module
//!
//! This module applies the commands a primary propagates. It receives the
//! primary's replication stream, decodes it into commands and stores their
//! effects on a replica engine.
//!
//! ## Architecture
//!
//! ```text
//! Replication stream
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameParser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ ReplicaApplier  │  (this module)
//! │                 │
//! │  - SELECT       │
//! │  - Decode       │
//! │  - Apply        │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   HashEngine    │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Applied Commands
//!
//! - `FSET key field value ABS version [PXAT expireAt]`
//! - `FDEL key field`
//! - `FPEXPIREAT key field expireAt ABS version`
//! - `FPERSIST key field`
//! - `FSETVER key field version`
//! - `DEL key`

pub mod apply;

pub use apply::{apply_replicated, ApplyError, ReplicaApplier};
