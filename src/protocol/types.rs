//! RESP Frame Types
//!
//! The replication stream is a sequence of RESP arrays of bulk strings,
//! the same form Redis uses for its append-only file and replica links.
//!
//! ## Examples
//!
//! Bulk String: `$5\r\nhello\r\n`
//! Array: `*3\r\n$4\r\nFDEL\r\n$3\r\nkey\r\n$5\r\nfield\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A frame of the replication stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Builds a command frame: an array of bulk strings.
    ///
    /// # Example
    /// ```
    /// use ttlhash::protocol::types::RespValue;
    /// use bytes::Bytes;
    ///
    /// let frame = RespValue::command([Bytes::from("DEL"), Bytes::from("k")]);
    /// assert_eq!(frame.serialize(), b"*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n");
    /// ```
    pub fn command<I>(args: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        RespValue::Array(args.into_iter().map(RespValue::BulkString).collect())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::Array(_) => None,
        }
    }

    /// Flattens a command frame into its arguments.
    ///
    /// Returns `None` unless this is an array of bulk strings.
    pub fn into_args(self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(values) => values
                .into_iter()
                .map(|v| match v {
                    RespValue::BulkString(b) => Some(b),
                    RespValue::Array(_) => None,
                })
                .collect(),
            RespValue::BulkString(_) => None,
        }
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_string_serialize() {
        let value = RespValue::bulk_string(Bytes::from("hello"));
        assert_eq!(value.serialize(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_command_serialize() {
        let value = RespValue::command([
            Bytes::from("FDEL"),
            Bytes::from("key"),
            Bytes::from("field"),
        ]);
        assert_eq!(
            value.serialize(),
            b"*3\r\n$4\r\nFDEL\r\n$3\r\nkey\r\n$5\r\nfield\r\n"
        );
        assert_eq!(value.to_string(), "\"FDEL\" \"key\" \"field\"");
    }

    #[test]
    fn test_binary_safe() {
        let value = RespValue::bulk_string(Bytes::from_static(b"a\r\nb\0"));
        assert_eq!(value.serialize(), b"$5\r\na\r\nb\0\r\n");
    }

    #[test]
    fn test_into_args() {
        let frame = RespValue::command([Bytes::from("DEL"), Bytes::from("k")]);
        assert_eq!(
            frame.into_args(),
            Some(vec![Bytes::from("DEL"), Bytes::from("k")])
        );

        let nested = RespValue::Array(vec![RespValue::Array(vec![])]);
        assert_eq!(nested.into_args(), None);
        assert_eq!(RespValue::bulk_string("x").into_args(), None);
    }
}
