//! Scope identities for the reactive system.
//!
//! A tracking scope is either a component (an external consumer identified by
//! a [`SubscriberId`]) or a computed (identified by its store and accessor
//! path). Dependencies recorded while a scope is active carry the store they
//! belong to, so a consumer may read several stores in one scope.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::graph::{DepKey, Path};

/// Unique identifier for an external subscriber.
///
/// A view-layer binding creates one per consumer instance, uses it as the
/// handle for `run_tracked_scope`, and subscribes to stores under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber#{}", self.0)
    }
}

/// Unique identifier for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// Identity of a computed: the store it lives in and its accessor path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputedId {
    pub store: StoreId,
    pub path: Path,
}

/// The "who is reading" handle of a tracking scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeId {
    Component(SubscriberId),
    Computed(ComputedId),
}

/// A single recorded read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub store: StoreId,
    pub key: DepKey,
}

impl Dependency {
    pub fn raw(store: StoreId, path: Path) -> Self {
        Self {
            store,
            key: DepKey::Raw(path),
        }
    }

    pub fn computed(store: StoreId, path: Path) -> Self {
        Self {
            store,
            key: DepKey::Computed(path),
        }
    }
}

/// A notification target registered with a store.
#[derive(Clone)]
pub struct Subscriber {
    id: SubscriberId,
    /// Invoked after a write touches something this subscriber read.
    notify: Rc<dyn Fn()>,
}

impl Subscriber {
    /// Create a subscriber for `id` with the given notification callback.
    pub fn new<F>(id: SubscriberId, notify: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self {
            id,
            notify: Rc::new(notify),
        }
    }

    /// Get the subscriber's ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Notify the subscriber that one of its dependencies changed.
    pub fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn subscriber_notify_calls_callback() {
        let called = Rc::new(Cell::new(false));
        let called_clone = called.clone();

        let subscriber = Subscriber::new(SubscriberId::new(), move || {
            called_clone.set(true);
        });

        assert!(!called.get());
        subscriber.notify();
        assert!(called.get());
    }

    #[test]
    fn scope_kinds_are_distinct() {
        let store = StoreId::new();
        let component = ScopeId::Component(SubscriberId::new());
        let computed = ScopeId::Computed(ComputedId {
            store,
            path: Path::from("total"),
        });
        assert_ne!(component, computed);
    }
}
