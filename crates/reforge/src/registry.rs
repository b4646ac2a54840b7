//! Module registry
//!
//! Owns the name-to-current-record mapping. Mutation happens only on the
//! manager's single routing path; reads may come from anywhere. Superseded
//! and removed records are parked in a retired list so their machine code
//! stays resident for whoever still holds a reference.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::event::ModuleSet;
use crate::loader::ModuleRecord;

/// Shared handle on the registry. Clones see the same state.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    current: ModuleSet,
    retired: Vec<Arc<ModuleRecord>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `record` as the current one for its name, retiring any
    /// predecessor. Returns the predecessor, if there was one.
    pub(crate) fn install(&self, record: Arc<ModuleRecord>) -> Option<Arc<ModuleRecord>> {
        let mut inner = self.inner.write();
        let previous = inner.current.insert(record.name().to_string(), record);
        if let Some(old) = &previous {
            debug!(module = old.name(), version = old.version(), "retiring superseded record");
            inner.retired.push(old.clone());
        }
        previous
    }

    /// Drop the current record for `name`, retiring it. `None` when the name
    /// was never registered — callers treat that as a tolerated no-op.
    pub(crate) fn remove(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        let mut inner = self.inner.write();
        let removed = inner.current.remove(name);
        if let Some(old) = &removed {
            inner.retired.push(old.clone());
        }
        removed
    }

    /// Current record for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        self.inner.read().current.get(name).cloned()
    }

    /// Whether `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().current.contains_key(name)
    }

    /// Snapshot of all current records.
    pub fn snapshot(&self) -> ModuleSet {
        self.inner.read().current.clone()
    }

    /// Names of all current modules, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().current.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of current modules.
    pub fn len(&self) -> usize {
        self.inner.read().current.len()
    }

    /// Whether no module is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of superseded or removed records still held resident.
    pub fn retired_count(&self) -> usize {
        self.inner.read().retired.len()
    }
}
