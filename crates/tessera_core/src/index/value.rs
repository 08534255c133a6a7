//! Ordered secondary and primary-key indexes.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use tessera_codec::{ObjKey, Value};

use super::key::IndexKey;

/// Non-unique ordered index: value -> object keys.
#[derive(Debug, Clone, Default)]
pub struct ValueIndex {
    entries: BTreeMap<IndexKey, BTreeSet<ObjKey>>,
}

impl ValueIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key` under `value`.
    pub fn insert(&mut self, value: &Value, key: ObjKey) {
        self.entries
            .entry(IndexKey(value.clone()))
            .or_default()
            .insert(key);
    }

    /// Removes `key` from under `value`.
    pub fn remove(&mut self, value: &Value, key: ObjKey) {
        let probe = IndexKey(value.clone());
        if let Some(keys) = self.entries.get_mut(&probe) {
            keys.remove(&key);
            if keys.is_empty() {
                self.entries.remove(&probe);
            }
        }
    }

    /// Object keys whose value equals `value`.
    #[must_use]
    pub fn get(&self, value: &Value) -> Vec<ObjKey> {
        self.entries
            .get(&IndexKey(value.clone()))
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Object keys whose value lies in the given bounds, in value order.
    #[must_use]
    pub fn range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<ObjKey> {
        let map = |b: Bound<&Value>| match b {
            Bound::Included(v) => Bound::Included(IndexKey(v.clone())),
            Bound::Excluded(v) => Bound::Excluded(IndexKey(v.clone())),
            Bound::Unbounded => Bound::Unbounded,
        };
        self.entries
            .range((map(lower), map(upper)))
            .flat_map(|(_, keys)| keys.iter().copied())
            .collect()
    }
}

/// Unique index mapping a primary key value to its object.
#[derive(Debug, Clone, Default)]
pub struct PrimaryKeyIndex {
    entries: BTreeMap<IndexKey, ObjKey>,
}

impl PrimaryKeyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the object holding `value`.
    #[must_use]
    pub fn get(&self, value: &Value) -> Option<ObjKey> {
        self.entries.get(&IndexKey(value.clone())).copied()
    }

    /// Maps `value` to `key`. Returns the object already holding the value
    /// if it is a different one, leaving the index unchanged.
    pub fn insert(&mut self, value: &Value, key: ObjKey) -> Result<(), ObjKey> {
        match self.entries.get(&IndexKey(value.clone())) {
            Some(&existing) if existing != key => Err(existing),
            _ => {
                self.entries.insert(IndexKey(value.clone()), key);
                Ok(())
            }
        }
    }

    /// Removes the mapping for `value` if it points at `key`.
    pub fn remove(&mut self, value: &Value, key: ObjKey) {
        let probe = IndexKey(value.clone());
        if self.entries.get(&probe) == Some(&key) {
            self.entries.remove(&probe);
        }
    }
}
