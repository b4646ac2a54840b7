//! In-process key/value store
//!
//! A store-shaped table for tests and embedded setups. The modification index
//! is a single monotonic counter shared by all keys, which keeps the per-key
//! strictly-increasing guarantee without per-key bookkeeping.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{KvStore, RemoteEntry};
use crate::error::KvError;

/// In-memory [`KvStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, (Vec<u8>, u64)>,
    next_index: u64,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKv {
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, KvError> {
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, index))| RemoteEntry {
                key: key.clone(),
                value: value.clone(),
                modification_index: *index,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let mut inner = self.inner.lock();
        inner.next_index += 1;
        let index = inner.next_index;
        inner.entries.insert(key.to_string(), (value.to_vec(), index));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.inner.lock().entries.remove(key);
        Ok(())
    }
}
