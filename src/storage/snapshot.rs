//! Binary snapshot layout of one container.
//!
//! ```text
//! u64 field_count | string key | field_count x (string field, u64 version, u64 expire_at, string value)
//! ```
//!
//! Integers are big-endian; a string is a big-endian `u32` length followed
//! by the raw bytes. Expired fields are saved as they are; the loader puts
//! them back into the expire index and they are reclaimed as usual.

use super::container::Container;
use super::record::FieldRecord;
use crate::error::{HashError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Serializes a container.
pub fn encode(container: &Container) -> Bytes {
    let fields = container.fields();
    let mut buf = BytesMut::new();
    buf.put_u64(fields.len() as u64);
    put_string(&mut buf, container.key());
    for (field, record) in fields.iter() {
        put_string(&mut buf, field);
        buf.put_u64(record.version);
        buf.put_u64(record.expire_at);
        put_string(&mut buf, &record.value);
    }
    buf.freeze()
}

/// Deserializes a container.
///
/// Fails with [`HashError::Corrupt`] on truncated input, trailing bytes or
/// duplicate field names.
pub fn decode(mut data: &[u8]) -> Result<Container> {
    let count = get_u64(&mut data, "field count")?;
    let key = get_string(&mut data, "key")?;
    let mut container = Container::new(key);

    for _ in 0..count {
        let field = get_string(&mut data, "field name")?;
        let version = get_u64(&mut data, "version")?;
        let expire_at = get_u64(&mut data, "expire time")?;
        let value = get_string(&mut data, "value")?;

        if container.fields().get(&field).is_some() {
            return Err(HashError::Corrupt(format!(
                "duplicate field '{}'",
                String::from_utf8_lossy(&field)
            )));
        }
        container.fields_mut().put(
            field,
            FieldRecord {
                value,
                version,
                expire_at,
            },
        );
    }

    if data.has_remaining() {
        return Err(HashError::Corrupt(format!(
            "{} trailing bytes",
            data.remaining()
        )));
    }
    Ok(container)
}

fn put_string(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn get_u64(data: &mut &[u8], what: &str) -> Result<u64> {
    if data.remaining() < 8 {
        return Err(truncated(what));
    }
    Ok(data.get_u64())
}

fn get_string(data: &mut &[u8], what: &str) -> Result<Bytes> {
    if data.remaining() < 4 {
        return Err(truncated(what));
    }
    let len = data.get_u32() as usize;
    if data.remaining() < len {
        return Err(truncated(what));
    }
    Ok(data.copy_to_bytes(len))
}

fn truncated(what: &str) -> HashError {
    HashError::Corrupt(format!("truncated {}", what))
}
