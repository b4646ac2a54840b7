//! Remote key/value store interface
//!
//! The store is an external collaborator: all the lifecycle engine needs is a
//! prefixed listing with per-key modification indices, plus put/delete for
//! writers. It is polled, never subscribed to — no push primitive is assumed.

mod consul;
mod memory;

pub use consul::ConsulKv;
pub use memory::MemoryKv;

use serde::{Deserialize, Serialize};

use crate::error::KvError;

/// One entry under the watched key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full key, prefix included.
    pub key: String,
    /// Raw value bytes.
    pub value: Vec<u8>,
    /// Strictly increasing per key across successive writes; the sole signal
    /// for distinguishing an update from a no-op rescan.
    pub modification_index: u64,
}

/// Minimal key/value client contract.
///
/// `list` must return every entry whose key starts with `prefix`, in no
/// particular order.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// List all entries under a key prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, KvError>;

    /// Write a value, creating the key or bumping its modification index.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;
}
