//! RESP framing for the replication stream.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` frame and its serialization
//! - `parser`: incremental decoding of command frames
//!
//! ## Example
//!
//! ```
//! use ttlhash::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! let frame = RespValue::command([Bytes::from("FPERSIST"), Bytes::from("k"), Bytes::from("f")]);
//! let bytes = frame.serialize();
//! let (decoded, consumed) = parse_message(&bytes).unwrap().unwrap();
//! assert_eq!(decoded, frame);
//! assert_eq!(consumed, bytes.len());
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, FrameParser, ParseError, ParseResult, RespParser};
pub use types::RespValue;
