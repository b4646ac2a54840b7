//! Event fan-out
//!
//! Decouples producers of module-change events from consumers. Subscriber
//! lists are append-only — unsubscribing is a capability this hub
//! intentionally does not offer, not an oversight; hold your own flag inside
//! the callback if you need to mute one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::loader::ModuleRecord;

/// Snapshot of the currently live modules, keyed by module name.
pub type ModuleSet = HashMap<String, Arc<ModuleRecord>>;

type ScanFn = Arc<dyn Fn(&ModuleSet) + Send + Sync>;
type ModuleFn = Arc<dyn Fn(&str, &Arc<ModuleRecord>) + Send + Sync>;

/// The kinds of events the hub dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The one-time full-directory scan at start.
    Scan,
    /// A module appeared that was not in the registry.
    Added,
    /// A registered module was rebuilt from changed source.
    Updated,
    /// A module left the watched set.
    Removed,
}

/// Ordered subscriber lists per event kind, dispatched synchronously.
///
/// `publish_*` invokes every callback of that kind in registration order, on
/// the calling task, before returning. A callback that blocks delays the
/// callbacks after it and the producing loop itself; hand work off if you
/// cannot be fast. No isolation is provided between callbacks — a panic
/// unwinds through the dispatch, by the host's leave.
pub struct SubscriptionHub {
    scan: RwLock<Vec<ScanFn>>,
    added: RwLock<Vec<ModuleFn>>,
    updated: RwLock<Vec<ModuleFn>>,
    removed: RwLock<Vec<ModuleFn>>,
}

impl SubscriptionHub {
    /// Create a hub with no subscribers.
    pub fn new() -> Self {
        Self {
            scan: RwLock::new(Vec::new()),
            added: RwLock::new(Vec::new()),
            updated: RwLock::new(Vec::new()),
            removed: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to the start-time scan event.
    pub fn on_scan<F>(&self, callback: F)
    where
        F: Fn(&ModuleSet) + Send + Sync + 'static,
    {
        self.scan.write().push(Arc::new(callback));
    }

    /// Subscribe to module-added events.
    pub fn on_add<F>(&self, callback: F)
    where
        F: Fn(&str, &Arc<ModuleRecord>) + Send + Sync + 'static,
    {
        self.added.write().push(Arc::new(callback));
    }

    /// Subscribe to module-updated events.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&str, &Arc<ModuleRecord>) + Send + Sync + 'static,
    {
        self.updated.write().push(Arc::new(callback));
    }

    /// Subscribe to module-removed events.
    pub fn on_remove<F>(&self, callback: F)
    where
        F: Fn(&str, &Arc<ModuleRecord>) + Send + Sync + 'static,
    {
        self.removed.write().push(Arc::new(callback));
    }

    /// Number of subscribers registered for one event kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Scan => self.scan.read().len(),
            EventKind::Added => self.added.read().len(),
            EventKind::Updated => self.updated.read().len(),
            EventKind::Removed => self.removed.read().len(),
        }
    }

    pub(crate) fn publish_scan(&self, modules: &ModuleSet) {
        // Dispatch from a snapshot of the list so a callback registering a
        // new subscriber does not deadlock against the lock.
        let subscribers = self.scan.read().clone();
        for subscriber in subscribers {
            subscriber(modules);
        }
    }

    pub(crate) fn publish_added(&self, name: &str, record: &Arc<ModuleRecord>) {
        let subscribers = self.added.read().clone();
        for subscriber in subscribers {
            subscriber(name, record);
        }
    }

    pub(crate) fn publish_updated(&self, name: &str, record: &Arc<ModuleRecord>) {
        let subscribers = self.updated.read().clone();
        for subscriber in subscribers {
            subscriber(name, record);
        }
    }

    pub(crate) fn publish_removed(&self, name: &str, record: &Arc<ModuleRecord>) {
        let subscribers = self.removed.read().clone();
        for subscriber in subscribers {
            subscriber(name, record);
        }
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_scan_dispatch_in_registration_order() {
        let hub = SubscriptionHub::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            hub.on_scan(move |_| order.lock().push(tag));
        }

        hub.publish_scan(&ModuleSet::new());
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_subscriber_counts_are_append_only() {
        let hub = SubscriptionHub::new();
        assert_eq!(hub.subscriber_count(EventKind::Added), 0);
        hub.on_add(|_, _| {});
        hub.on_add(|_, _| {});
        hub.on_remove(|_, _| {});
        assert_eq!(hub.subscriber_count(EventKind::Added), 2);
        assert_eq!(hub.subscriber_count(EventKind::Removed), 1);
        assert_eq!(hub.subscriber_count(EventKind::Updated), 0);
    }

    #[test]
    fn test_callback_may_register_during_dispatch() {
        let hub = Arc::new(SubscriptionHub::new());
        let inner = hub.clone();
        hub.on_scan(move |_| inner.on_scan(|_| {}));

        hub.publish_scan(&ModuleSet::new());
        assert_eq!(hub.subscriber_count(EventKind::Scan), 2);
    }
}
