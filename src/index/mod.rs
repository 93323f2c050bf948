//! Expire Index Module
//!
//! Each database owns one time-ordered index of everything in it that can
//! expire. The active cycle drains the index from its minimum, so expired
//! fields are found without scanning keys or fields.
//!
//! ## Strategies
//!
//! ```text
//!  Coarse                                 Fine
//!  ┌────────────┬─────────┐               ┌────────────┬─────────┬───────┐
//!  │ expire_at  │ key     │               │ expire_at  │ key     │ field │
//!  ├────────────┼─────────┤               ├────────────┼─────────┼───────┤
//!  │ 1000       │ user:1  │  <- min of    │ 1000       │ user:1  │ token │
//!  │ 4000       │ user:2  │     its fields│ 2500       │ user:1  │ nonce │
//!  └────────────┴─────────┘               │ 4000       │ user:2  │ token │
//!                                         └────────────┴─────────┴───────┘
//! ```
//!
//! The strategy is chosen once for the whole process through
//! [`crate::config::ExpireStrategy`]; the two are never mixed.

pub mod coarse;
pub mod fine;
pub mod ordered;

pub use coarse::CoarseIndex;
pub use fine::{FieldId, FineIndex};
pub use ordered::OrderedIndex;

use crate::config::ExpireStrategy;
use bytes::Bytes;
use std::mem;

/// The effect of one field mutation on expiry metadata.
///
/// Produced by the field store and fed to [`ExpireIndex::apply`] in the same
/// logical step as the mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpireChange {
    pub field: Bytes,
    /// Expiry before the mutation (0 = none or absent)
    pub old_expire_at: u64,
    /// Expiry after the mutation (0 = none or deleted)
    pub new_expire_at: u64,
    /// Earliest expiry in the container before the mutation
    pub min_before: Option<u64>,
    /// Earliest expiry in the container after the mutation
    pub min_after: Option<u64>,
}

impl ExpireChange {
    /// Returns true if the mutation did not touch any expiry.
    pub fn is_noop(&self) -> bool {
        self.old_expire_at == self.new_expire_at && self.min_before == self.min_after
    }
}

/// One index entry, resolved to owned handles.
///
/// `field` is `None` in the coarse strategy, where an entry stands for the
/// container's earliest expiring field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub expire_at: u64,
    pub key: Bytes,
    pub field: Option<Bytes>,
}

/// A database expire index in one of the two strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireIndex {
    Coarse(CoarseIndex),
    Fine(FineIndex),
}

impl ExpireIndex {
    pub fn new(strategy: ExpireStrategy) -> Self {
        match strategy {
            ExpireStrategy::Coarse => ExpireIndex::Coarse(CoarseIndex::new()),
            ExpireStrategy::Fine => ExpireIndex::Fine(FineIndex::new()),
        }
    }

    pub fn strategy(&self) -> ExpireStrategy {
        match self {
            ExpireIndex::Coarse(_) => ExpireStrategy::Coarse,
            ExpireIndex::Fine(_) => ExpireStrategy::Fine,
        }
    }

    /// Mirrors a field mutation of container `key`.
    pub fn apply(&mut self, key: &Bytes, change: &ExpireChange) {
        match self {
            ExpireIndex::Coarse(index) => index.apply(key, change),
            ExpireIndex::Fine(index) => index.apply(key, change),
        }
    }

    /// Inserts the entries of a container that just appeared in this
    /// database (load, copy, move, rename target).
    ///
    /// `expiring` yields `(expire_at, field)` for every field with a TTL.
    pub fn attach<'a, I>(&mut self, key: &Bytes, expiring: I)
    where
        I: IntoIterator<Item = (u64, &'a Bytes)>,
    {
        match self {
            ExpireIndex::Coarse(index) => {
                let min = expiring.into_iter().map(|(at, _)| at).min();
                index.replace(key, None, min);
            }
            ExpireIndex::Fine(index) => {
                for (at, field) in expiring {
                    index
                        .entries_mut()
                        .insert(at, FieldId::new(key.clone(), field.clone()));
                }
            }
        }
    }

    /// Removes every entry belonging to container `key`.
    pub fn detach<'a, I>(&mut self, key: &Bytes, expiring: I)
    where
        I: IntoIterator<Item = (u64, &'a Bytes)>,
    {
        match self {
            ExpireIndex::Coarse(index) => {
                let min = expiring.into_iter().map(|(at, _)| at).min();
                index.replace(key, min, None);
            }
            ExpireIndex::Fine(index) => {
                for (at, field) in expiring {
                    index
                        .entries_mut()
                        .delete(at, &FieldId::new(key.clone(), field.clone()));
                }
            }
        }
    }

    /// Returns the earliest entry.
    pub fn peek_min(&self) -> Option<IndexEntry> {
        match self {
            ExpireIndex::Coarse(index) => {
                index.entries().peek_min().map(|(at, key)| IndexEntry {
                    expire_at: at,
                    key: key.clone(),
                    field: None,
                })
            }
            ExpireIndex::Fine(index) => index.entries().peek_min().map(|(at, id)| IndexEntry {
                expire_at: at,
                key: id.key.clone(),
                field: Some(id.field.clone()),
            }),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ExpireIndex::Coarse(index) => index.entries().len(),
            ExpireIndex::Fine(index) => index.entries().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        match self {
            ExpireIndex::Coarse(index) => index.entries_mut().clear(),
            ExpireIndex::Fine(index) => index.entries_mut().clear(),
        }
    }

    /// All entries in expiry order.
    pub fn to_vec(&self) -> Vec<IndexEntry> {
        match self {
            ExpireIndex::Coarse(index) => index
                .entries()
                .iter()
                .map(|(at, key)| IndexEntry {
                    expire_at: at,
                    key: key.clone(),
                    field: None,
                })
                .collect(),
            ExpireIndex::Fine(index) => index
                .entries()
                .iter()
                .map(|(at, id)| IndexEntry {
                    expire_at: at,
                    key: id.key.clone(),
                    field: Some(id.field.clone()),
                })
                .collect(),
        }
    }
}

/// The per-database index instances owned by an engine.
///
/// Created at startup, reset on flush and swapped on swap-db.
#[derive(Debug, Clone)]
pub struct IndexRegistry {
    strategy: ExpireStrategy,
    indexes: Vec<ExpireIndex>,
}

impl IndexRegistry {
    pub fn new(strategy: ExpireStrategy, databases: usize) -> Self {
        Self {
            strategy,
            indexes: (0..databases).map(|_| ExpireIndex::new(strategy)).collect(),
        }
    }

    pub fn strategy(&self) -> ExpireStrategy {
        self.strategy
    }

    /// Number of databases.
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Returns the index of database `db`.
    ///
    /// # Panics
    ///
    /// Panics if `db` is out of range. Callers validate database numbers
    /// at the command boundary.
    pub fn index(&self, db: usize) -> &ExpireIndex {
        &self.indexes[db]
    }

    /// Mutable counterpart of [`IndexRegistry::index`].
    pub fn index_mut(&mut self, db: usize) -> &mut ExpireIndex {
        &mut self.indexes[db]
    }

    /// Returns two distinct indexes mutably.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> (&mut ExpireIndex, &mut ExpireIndex) {
        assert_ne!(a, b, "pair_mut needs two distinct databases");
        if a < b {
            let (low, high) = self.indexes.split_at_mut(b);
            (&mut low[a], &mut high[0])
        } else {
            let (low, high) = self.indexes.split_at_mut(a);
            (&mut high[0], &mut low[b])
        }
    }

    /// Replaces the index of `db` with an empty one.
    pub fn reset(&mut self, db: usize) {
        self.indexes[db] = ExpireIndex::new(self.strategy);
    }

    pub fn reset_all(&mut self) {
        for index in &mut self.indexes {
            *index = ExpireIndex::new(self.strategy);
        }
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (first, second) = self.pair_mut(a, b);
        mem::swap(first, second);
    }

    /// Total entries across all databases.
    pub fn total_entries(&self) -> usize {
        self.indexes.iter().map(ExpireIndex::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(u64, &'static str)]) -> Vec<(u64, Bytes)> {
        pairs
            .iter()
            .map(|(at, name)| (*at, Bytes::from(*name)))
            .collect()
    }

    #[test]
    fn test_attach_and_detach_coarse() {
        let key = Bytes::from("user:1");
        let expiring = fields(&[(300, "a"), (100, "b")]);
        let mut index = ExpireIndex::new(ExpireStrategy::Coarse);

        index.attach(&key, expiring.iter().map(|(at, f)| (*at, f)));
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.peek_min(),
            Some(IndexEntry {
                expire_at: 100,
                key: key.clone(),
                field: None
            })
        );

        index.detach(&key, expiring.iter().map(|(at, f)| (*at, f)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_attach_and_detach_fine() {
        let key = Bytes::from("user:1");
        let expiring = fields(&[(300, "a"), (100, "b")]);
        let mut index = ExpireIndex::new(ExpireStrategy::Fine);

        index.attach(&key, expiring.iter().map(|(at, f)| (*at, f)));
        assert_eq!(index.len(), 2);
        assert_eq!(index.peek_min().unwrap().field, Some(Bytes::from("b")));

        index.detach(&key, expiring.iter().map(|(at, f)| (*at, f)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_attach_without_ttl_fields_is_noop() {
        let key = Bytes::from("k");
        for strategy in [ExpireStrategy::Coarse, ExpireStrategy::Fine] {
            let mut index = ExpireIndex::new(strategy);
            index.attach(&key, std::iter::empty());
            assert!(index.is_empty());
        }
    }

    #[test]
    fn test_registry_swap_and_reset() {
        let key = Bytes::from("k");
        let field = Bytes::from("f");
        let mut registry = IndexRegistry::new(ExpireStrategy::Fine, 4);
        assert_eq!(registry.len(), 4);

        registry.index_mut(0).attach(&key, [(500, &field)]);
        registry.swap(0, 3);
        assert!(registry.index(0).is_empty());
        assert_eq!(registry.index(3).len(), 1);

        registry.swap(3, 1);
        assert_eq!(registry.index(1).len(), 1);
        assert_eq!(registry.total_entries(), 1);

        registry.reset(1);
        assert_eq!(registry.total_entries(), 0);
        assert_eq!(registry.index(1).strategy(), ExpireStrategy::Fine);
    }

    #[test]
    fn test_change_noop_detection() {
        let change = ExpireChange {
            field: Bytes::from("f"),
            old_expire_at: 0,
            new_expire_at: 0,
            min_before: None,
            min_after: None,
        };
        assert!(change.is_noop());
    }
}
