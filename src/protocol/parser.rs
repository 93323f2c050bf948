//! Incremental RESP Frame Parser
//!
//! Decodes the replication stream: RESP arrays whose elements are all bulk
//! strings. Anything else in the stream is a protocol error.
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - a complete frame, `consumed` bytes used
//! - `Ok(None)` - the frame is incomplete, feed more bytes
//! - `Err(ParseError)` - the stream is corrupt

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while decoding the replication stream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown or unsupported type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid length header
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The frame exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one command frame
pub const MAX_ARGS: usize = 1024 * 1024;

/// Stateless decoder for one frame at the front of a buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        Self
    }

    /// Attempts to decode one command frame from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        match first {
            prefix::ARRAY => self.parse_array(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((length, header)) = read_length(buf)? else {
            return Ok(None);
        };
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }
        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total = header + length + 2;
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[header + length..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header..header + length]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// Parses a command array: `*<count>\r\n` followed by bulk strings.
    fn parse_array(&self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((count, header)) = read_length(buf)? else {
            return Ok(None);
        };
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count > MAX_ARGS {
            return Err(ParseError::MessageTooLarge {
                size: count,
                max: MAX_ARGS,
            });
        }

        let mut elements = Vec::with_capacity(count);
        let mut consumed = header;
        for _ in 0..count {
            let rest = &buf[consumed..];
            match rest.first() {
                None => return Ok(None),
                Some(&prefix::BULK_STRING) => {}
                Some(&other) => {
                    return Err(ParseError::ProtocolError(format!(
                        "command arguments must be bulk strings, got prefix {:#04x}",
                        other
                    )))
                }
            }
            match self.parse_bulk_string(rest)? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Reads the `<prefix><integer>\r\n` header at the front of `buf`.
///
/// Returns the integer and the header size.
fn read_length(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let Some(pos) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let digits = &buf[1..1 + pos];
    let value = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(digits).into_owned()))?;
    Ok(Some((value, 1 + pos + 2)))
}

/// Finds the position of `\r\n` in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Helper function to decode a single frame from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

/// Buffers a byte stream and yields complete command frames.
///
/// # Example
///
/// ```
/// use ttlhash::protocol::FrameParser;
///
/// let mut parser = FrameParser::new();
/// parser.feed(b"*2\r\n$3\r\nDEL\r\n$1");
/// assert!(parser.next_command().unwrap().is_none());
///
/// parser.feed(b"\r\nk\r\n");
/// let args = parser.next_command().unwrap().unwrap();
/// assert_eq!(args, vec!["DEL", "k"]);
/// ```
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
    parser: RespParser,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next complete command, if any, as its argument list.
    pub fn next_command(&mut self) -> ParseResult<Option<Vec<Bytes>>> {
        let Some((frame, consumed)) = self.parser.parse(&self.buffer)? else {
            return Ok(None);
        };
        self.buffer.advance(consumed);
        frame
            .into_args()
            .map(Some)
            .ok_or_else(|| ParseError::ProtocolError("expected a command array".to_string()))
    }
}
