//! Fine strategy: one entry per expiring field.

use super::{ExpireChange, OrderedIndex};
use bytes::Bytes;
use tracing::trace;

/// Identity of one field inside one container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId {
    pub key: Bytes,
    pub field: Bytes,
}

impl FieldId {
    pub fn new(key: Bytes, field: Bytes) -> Self {
        Self { key, field }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FineIndex {
    entries: OrderedIndex<FieldId>,
}

impl FineIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, key: &Bytes, change: &ExpireChange) {
        if change.old_expire_at == change.new_expire_at {
            return;
        }
        let id = FieldId::new(key.clone(), change.field.clone());
        match (change.old_expire_at, change.new_expire_at) {
            (0, new) => {
                self.entries.insert(new, id);
            }
            (old, 0) => {
                self.entries.delete(old, &id);
            }
            (old, new) => {
                self.entries.update(old, new, id);
            }
        }
        trace!(
            key = ?key,
            field = ?change.field,
            old = change.old_expire_at,
            new = change.new_expire_at,
            "Field expiry moved"
        );
    }

    pub fn entries(&self) -> &OrderedIndex<FieldId> {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut OrderedIndex<FieldId> {
        &mut self.entries
    }
}
