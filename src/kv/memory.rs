//! In-memory KV backend
//!
//! BTreeMap-based store with RwLock for concurrency.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::Result;

use super::KvStore;

/// Volatile KV store, mainly for tests and ephemeral nodes
pub struct MemoryKv {
    /// Sorted map of keys to values
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,

    /// Approximate size in bytes (keys + values)
    size: AtomicUsize,
}

impl MemoryKv {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKv {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let added = key.len() + value.len();

        match data.insert(key.to_vec(), value.to_vec()) {
            Some(old) => {
                // Key already counted; only the value size changes
                self.size.fetch_sub(old.len(), Ordering::Relaxed);
                self.size.fetch_add(value.len(), Ordering::Relaxed);
            }
            None => {
                self.size.fetch_add(added, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        if let Some(old) = data.remove(key) {
            self.size.fetch_sub(key.len() + old.len(), Ordering::Relaxed);
        }
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
