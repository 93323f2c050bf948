//! A hash container: one top-level key and its fields.

use super::fields::FieldStore;
use crate::replication::ReplicatedCommand;
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// A container stored under one key.
///
/// The container knows its own key so that coarse index entries, which
/// name containers, can be resolved and relocated on rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    key: Bytes,
    fields: FieldStore,
}

impl Container {
    pub fn new(key: Bytes) -> Self {
        Self {
            key,
            fields: FieldStore::new(),
        }
    }

    pub fn with_fields(key: Bytes, fields: FieldStore) -> Self {
        Self { key, fields }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Re-labels the container after a rename or copy.
    pub fn set_key(&mut self, key: Bytes) {
        self.key = key;
    }

    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldStore {
        &mut self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Feeds every field to a digest, one sequence per field.
    pub fn digest<D: DigestSink + ?Sized>(&self, sink: &mut D) {
        for (field, record) in self.fields.iter() {
            sink.add_buffer(field);
            sink.add_buffer(&record.value);
            sink.end_sequence();
        }
    }

    /// The commands that rebuild this container, skipping expired fields.
    pub fn rewrite(&self, now: u64) -> Vec<ReplicatedCommand> {
        self.fields
            .iter_live(now)
            .map(|(field, record)| ReplicatedCommand::Set {
                key: self.key.clone(),
                field: field.clone(),
                value: record.value.clone(),
                version: record.version,
                expire_at: record.expire_at,
            })
            .collect()
    }
}

/// Receives the content of a container for debug digests.
pub trait DigestSink {
    fn add_buffer(&mut self, data: &[u8]);
    fn end_sequence(&mut self);
}

/// A digest that does not depend on field iteration order.
///
/// Each sequence is hashed on its own and the results are XOR-combined.
#[derive(Debug, Clone, Default)]
pub struct XorDigest {
    sequence: DefaultHasher,
    value: u64,
}

impl XorDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

impl DigestSink for XorDigest {
    fn add_buffer(&mut self, data: &[u8]) {
        // Length prefix keeps ("ab", "c") apart from ("a", "bc")
        self.sequence.write_usize(data.len());
        self.sequence.write(data);
    }

    fn end_sequence(&mut self) {
        let sequence = std::mem::take(&mut self.sequence);
        self.value ^= sequence.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::FieldRecord;

    fn container(key: &str, fields: &[(&str, &str, u64)]) -> Container {
        let mut container = Container::new(Bytes::from(key.to_string()));
        for (field, value, expire_at) in fields {
            container.fields_mut().put(
                Bytes::from(field.to_string()),
                FieldRecord {
                    value: Bytes::from(value.to_string()),
                    version: 2,
                    expire_at: *expire_at,
                },
            );
        }
        container
    }

    fn digest_of(container: &Container) -> u64 {
        let mut digest = XorDigest::new();
        container.digest(&mut digest);
        digest.value()
    }

    #[test]
    fn test_digest_ignores_order_but_not_content() {
        let a = container("k", &[("x", "1", 0), ("y", "2", 0)]);
        let b = container("k", &[("y", "2", 0), ("x", "1", 0)]);
        let c = container("k", &[("x", "2", 0), ("y", "1", 0)]);
        let d = container("k", &[("xy", "", 0)]);
        let e = container("k", &[("x", "y", 0)]);

        assert_eq!(digest_of(&a), digest_of(&b));
        assert_ne!(digest_of(&a), digest_of(&c));
        assert_ne!(digest_of(&d), digest_of(&e));
        assert_eq!(digest_of(&Container::new(Bytes::from("k"))), 0);
    }

    #[test]
    fn test_rewrite_skips_expired_fields() {
        let container = container("k", &[("live", "1", 0), ("ttl", "2", 500), ("gone", "3", 50)]);
        let mut commands = container.rewrite(100);
        commands.sort_by(|a, b| a.to_args().cmp(&b.to_args()));

        assert_eq!(
            commands,
            vec![
                ReplicatedCommand::Set {
                    key: Bytes::from("k"),
                    field: Bytes::from("live"),
                    value: Bytes::from("1"),
                    version: 2,
                    expire_at: 0,
                },
                ReplicatedCommand::Set {
                    key: Bytes::from("k"),
                    field: Bytes::from("ttl"),
                    value: Bytes::from("2"),
                    version: 2,
                    expire_at: 500,
                },
            ]
        );
    }
}
