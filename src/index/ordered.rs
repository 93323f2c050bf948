//! Time-ordered set of `(expire_at, id)` pairs.
//!
//! This is the shared contract behind both index strategies: O(log n)
//! insert and delete, cheap access to the earliest entry.

use std::collections::BTreeSet;

/// An ordered index keyed by expiry timestamp, ties broken by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedIndex<Id: Ord> {
    entries: BTreeSet<(u64, Id)>,
}

impl<Id: Ord> Default for OrderedIndex<Id> {
    fn default() -> Self {
        Self {
            entries: BTreeSet::new(),
        }
    }
}

impl<Id: Ord + Clone> OrderedIndex<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Returns false if the exact entry was already present.
    pub fn insert(&mut self, expire_at: u64, id: Id) -> bool {
        self.entries.insert((expire_at, id))
    }

    /// Moves `id` from `old_expire_at` to `new_expire_at`.
    ///
    /// Returns false if no entry existed at `old_expire_at`; the new entry is
    /// inserted either way.
    pub fn update(&mut self, old_expire_at: u64, new_expire_at: u64, id: Id) -> bool {
        let existed = self.entries.remove(&(old_expire_at, id.clone()));
        self.entries.insert((new_expire_at, id));
        existed
    }

    /// Removes an entry. Returns false if it was not present.
    pub fn delete(&mut self, expire_at: u64, id: &Id) -> bool {
        self.entries.remove(&(expire_at, id.clone()))
    }

    pub fn contains(&self, expire_at: u64, id: &Id) -> bool {
        self.entries.contains(&(expire_at, id.clone()))
    }

    /// Returns the earliest entry without removing it.
    pub fn peek_min(&self) -> Option<(u64, &Id)> {
        self.entries.first().map(|(at, id)| (*at, id))
    }

    /// Removes and returns the earliest entry.
    pub fn pop_min(&mut self) -> Option<(u64, Id)> {
        self.entries.pop_first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates entries in expiry order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Id)> + '_ {
        self.entries.iter().map(|(at, id)| (*at, id))
    }
}
