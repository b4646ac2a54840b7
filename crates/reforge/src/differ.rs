//! Remote snapshot differ
//!
//! Turns successive full snapshots of a prefixed key range into a
//! deterministic Added/Updated/Removed change sequence. The differ knows
//! nothing about compilation or modules; it only owns the snapshot table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::KvError;
use crate::kv::{KvStore, RemoteEntry};

/// What happened to one key between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvAction {
    /// Key seen for the first time.
    Added,
    /// Key present before, modification index strictly greater.
    Updated,
    /// Key vanished from the snapshot.
    Removed,
}

/// One change event. For [`KvAction::Removed`] the value is the last one
/// observed before the key disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvChange {
    pub action: KvAction,
    pub key: String,
    pub value: Vec<u8>,
}

/// Diffs successive store snapshots against the last-seen table.
pub struct SnapshotDiffer {
    store: Arc<dyn KvStore>,
    prefix: String,
    table: HashMap<String, RemoteEntry>,
}

impl SnapshotDiffer {
    /// Create a differ over `prefix` with an empty snapshot table.
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            table: HashMap::new(),
        }
    }

    /// Number of keys in the snapshot table.
    pub fn tracked_keys(&self) -> usize {
        self.table.len()
    }

    /// Run one diff cycle against a fresh listing.
    ///
    /// All Added/Updated changes for keys present in the new snapshot come
    /// before Removed changes for keys absent from it; relative order between
    /// independent keys is unspecified. A write with a non-increasing
    /// modification index produces nothing, so rescans are idempotent. On a
    /// listing failure the table is left untouched and the error is returned
    /// for the caller's transient-failure policy.
    pub async fn poll(&mut self) -> Result<Vec<KvChange>, KvError> {
        let listing = self.store.list(&self.prefix).await?;

        let mut changes = Vec::new();
        let mut seen: HashSet<String> = HashSet::with_capacity(listing.len());

        for entry in listing {
            seen.insert(entry.key.clone());
            match self.table.get(&entry.key) {
                None => {
                    changes.push(KvChange {
                        action: KvAction::Added,
                        key: entry.key.clone(),
                        value: entry.value.clone(),
                    });
                    self.table.insert(entry.key.clone(), entry);
                }
                Some(known) if entry.modification_index > known.modification_index => {
                    changes.push(KvChange {
                        action: KvAction::Updated,
                        key: entry.key.clone(),
                        value: entry.value.clone(),
                    });
                    self.table.insert(entry.key.clone(), entry);
                }
                Some(_) => {}
            }
        }

        let vanished: Vec<String> = self
            .table
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in vanished {
            if let Some(last) = self.table.remove(&key) {
                changes.push(KvChange {
                    action: KvAction::Removed,
                    key,
                    value: last.value,
                });
            }
        }

        Ok(changes)
    }

    /// Poll loop: sleep one interval, diff, hand each change to the single
    /// consumer over a blocking capacity-1 channel, repeat.
    ///
    /// The blocking handoff means a slow consumer back-pressures polling, and
    /// polls never overlap. The loop exits when the shutdown signal fires
    /// (checked at the top of each cycle, so termination latency is bounded
    /// by one interval) or when the consumer goes away.
    pub async fn run(
        mut self,
        interval: Duration,
        changes_tx: mpsc::Sender<KvChange>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.recv() => {
                    debug!(prefix = %self.prefix, "snapshot differ shutting down");
                    return;
                }
            }

            match self.poll().await {
                Ok(changes) => {
                    for change in changes {
                        if changes_tx.send(change).await.is_err() {
                            debug!(prefix = %self.prefix, "change consumer gone, stopping poll loop");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(prefix = %self.prefix, error = %e, "store listing failed, skipping poll cycle");
                }
            }
        }
    }
}
