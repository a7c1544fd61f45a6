//! Implementation of the default in-memory store.

use std::collections::HashMap;

use crate::store::CacheEntry;
use crate::store::CacheStore;

/// The default in-memory cache store.
///
/// Entries live for the lifetime of the store; nothing is evicted beyond what
/// the cache layer itself removes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// The stored entries, keyed by resource key.
    entries: HashMap<String, CacheEntry>,
}

impl MemoryStore {
    /// Constructs a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: String, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}
