use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::node::Key;

/// In-memory values held for STORE / FIND_VALUE.
///
/// Overwrites are last-write-wins. With a capacity set, existing keys can
/// still be overwritten once full but new keys are refused. The cap holds
/// under concurrent writers: a new key reserves its slot before it is
/// inserted.
pub struct ValueStore {
    values: DashMap<Key, Bytes>,
    entries: AtomicUsize,
    max_entries: Option<usize>,
}

impl ValueStore {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            values: DashMap::new(),
            entries: AtomicUsize::new(0),
            max_entries,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Returns false if the store is full and `key` is new.
    pub fn put(&self, key: Key, value: Bytes) -> bool {
        match self.values.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(value);
                true
            }
            Entry::Vacant(slot) => {
                if !self.reserve() {
                    return false;
                }
                slot.insert(value);
                true
            }
        }
    }

    fn reserve(&self) -> bool {
        match self.max_entries {
            Some(max) => self
                .entries
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
            None => {
                self.entries.fetch_add(1, Ordering::AcqRel);
                true
            }
        }
    }

    pub fn get(&self, key: &Key) -> Option<Bytes> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&self, key: &Key) -> Option<Bytes> {
        let (_, value) = self.values.remove(key)?;
        self.entries.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
