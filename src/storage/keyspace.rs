//! The minimal host key space: numbered databases mapping keys to values.
//!
//! Only hash containers are managed here. Other value kinds exist so that
//! commands can report `TypeMismatch` the way a real host would.

use super::container::Container;
use crate::error::{HashError, Result};
use bytes::Bytes;
use std::collections::HashMap;

/// Type name reported for hash containers.
pub const HASH_TYPE_NAME: &str = "fieldhash";

/// A value stored under a top-level key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Hash(Container),
    /// A value owned by some other data type
    Other { type_name: &'static str, payload: Bytes },
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Hash(_) => HASH_TYPE_NAME,
            Value::Other { type_name, .. } => *type_name,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Hash(container) => Some(container),
            Value::Other { .. } => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut Container> {
        match self {
            Value::Hash(container) => Some(container),
            Value::Other { .. } => None,
        }
    }
}

/// One numbered database.
#[derive(Debug, Clone, Default)]
pub struct Database {
    entries: HashMap<Bytes, Value>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    /// Returns the container under `key`, `None` if absent.
    pub fn container(&self, key: &[u8]) -> Result<Option<&Container>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(value) => value.as_container().map(Some).ok_or(HashError::TypeMismatch),
        }
    }

    pub fn container_mut(&mut self, key: &[u8]) -> Result<Option<&mut Container>> {
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(value) => value
                .as_container_mut()
                .map(Some)
                .ok_or(HashError::TypeMismatch),
        }
    }

    /// Returns the container under `key`, creating an empty one if absent.
    pub fn container_or_create(&mut self, key: &Bytes) -> Result<&mut Container> {
        let value = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Value::Hash(Container::new(key.clone())));
        value.as_container_mut().ok_or(HashError::TypeMismatch)
    }

    /// Fails with `TypeMismatch` if `key` holds something other than a container.
    pub fn check_type(&self, key: &[u8]) -> Result<()> {
        self.container(key).map(|_| ())
    }

    pub fn insert(&mut self, key: Bytes, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Removes `key` if it holds a container with no fields.
    pub fn remove_if_empty(&mut self, key: &[u8]) -> bool {
        let empty = matches!(self.entries.get(key), Some(Value::Hash(c)) if c.is_empty());
        if empty {
            self.entries.remove(key);
        }
        empty
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.entries.keys()
    }

    /// Every container in this database.
    pub fn containers(&self) -> impl Iterator<Item = &Container> + '_ {
        self.entries.values().filter_map(Value::as_container)
    }
}
