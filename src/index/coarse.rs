//! Coarse strategy: one entry per container.
//!
//! A container is indexed under the earliest expiry among its fields. The
//! entry only moves when that minimum changes, so most field-level updates
//! never touch the database index at all.

use super::{ExpireChange, OrderedIndex};
use bytes::Bytes;
use tracing::trace;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoarseIndex {
    entries: OrderedIndex<Bytes>,
}

impl CoarseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, key: &Bytes, change: &ExpireChange) {
        if change.min_before == change.min_after {
            return;
        }
        self.replace(key, change.min_before, change.min_after);
    }

    /// Re-points `key` from one minimum to another.
    pub fn replace(&mut self, key: &Bytes, before: Option<u64>, after: Option<u64>) {
        match (before, after) {
            (Some(old), Some(new)) => {
                self.entries.update(old, new, key.clone());
            }
            (Some(old), None) => {
                self.entries.delete(old, key);
            }
            (None, Some(new)) => {
                self.entries.insert(new, key.clone());
            }
            (None, None) => {}
        }
        trace!(key = ?key, ?before, ?after, "Container minimum moved");
    }

    pub fn entries(&self) -> &OrderedIndex<Bytes> {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut OrderedIndex<Bytes> {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(min_before: Option<u64>, min_after: Option<u64>) -> ExpireChange {
        ExpireChange {
            field: Bytes::from("f"),
            old_expire_at: 0,
            new_expire_at: 0,
            min_before,
            min_after,
        }
    }

    #[test]
    fn test_tracks_container_minimum() {
        let key = Bytes::from("k");
        let mut index = CoarseIndex::new();

        index.apply(&key, &change(None, Some(500)));
        assert_eq!(index.entries().peek_min(), Some((500, &key)));

        index.apply(&key, &change(Some(500), Some(200)));
        assert_eq!(index.entries().peek_min(), Some((200, &key)));
        assert_eq!(index.entries().len(), 1);

        index.apply(&key, &change(Some(200), None));
        assert!(index.entries().is_empty());
    }

    #[test]
    fn test_unchanged_minimum_is_noop() {
        let key = Bytes::from("k");
        let mut index = CoarseIndex::new();
        index.apply(&key, &change(None, Some(100)));
        index.apply(&key, &change(Some(100), Some(100)));
        assert_eq!(index.entries().len(), 1);
    }
}
