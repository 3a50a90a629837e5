//! Managed Stores
//!
//! A store owns one state root and everything the engine keeps about it: the
//! computed entries and their reverse index, the wrapper cache, and the
//! subscriber registry.
//!
//! # Writes
//!
//! Every write ends in one invalidation pass:
//!
//! 1. The reverse index yields every computed affected by the changed paths,
//!    transitively; each is marked dirty. Nothing is recomputed.
//! 2. Subscribers are matched, in registration order, against the dependency
//!    sets their scopes published: a raw dependency matches when it is an
//!    ancestor or descendant of a changed path, a computed dependency matches
//!    when the computed was affected.
//! 3. Stores whose computeds read this one are handed the same write; each
//!    dirties its own readers and matches its own subscribers the same way.
//! 4. The matched callbacks run after every engine borrow is released, so a
//!    callback may read, write, or re-run its scope.
//!
//! # Mounts
//!
//! A node may sit at several paths at once, for example after
//! `state.set("b", &a)`. The store remembers every path a wrapper was built
//! at for each node, and a write through any of them is reported at every
//! path where the node is still mounted.
//!
//! # Lifetime
//!
//! A store lives as long as something holds its root wrapper, any wrapper
//! derived from it, or a [`Store`] handle. Stores are found again from their
//! raw root node through a thread-local registry of weak references.

pub(crate) mod container;
mod opaque;
mod options;
mod proxy;
mod snapshot;
mod value;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};

use crate::error::{Result, StoreError};
use crate::graph::{DepKey, Key, Node, NodeId, Path};
use crate::reactive::context::run_tracked;
use crate::reactive::memo::{Lookup, MemoTable};
use crate::reactive::{
    Computed, ComputedId, ComputedInfo, Dependency, MemoState, ReactiveContext, ScopeId, StoreId,
    Subscriber, SubscriberId,
};

pub use opaque::{wrap_opaque, OpaqueRef, RefBox};
pub use options::{StoreOptions, DEFAULT_SWEEP_THRESHOLD};
pub use proxy::{Access, Proxy};
pub use snapshot::{project, Snapshot, View};
pub use value::Value;

use proxy::{ProxyInner, Resolved};

thread_local! {
    /// Root node → the store it roots.
    static ROOTS: RefCell<HashMap<NodeId, Weak<StoreInner>>> = RefCell::new(HashMap::new());
}

pub(crate) struct StoreInner {
    id: StoreId,
    root: Node,
    options: StoreOptions,
    memos: RefCell<MemoTable>,
    wrappers: RefCell<HashMap<(NodeId, Path), Weak<ProxyInner>>>,
    sweep_at: Cell<usize>,
    /// Node → every path a wrapper was built at.
    mounts: RefCell<HashMap<NodeId, IndexSet<Path>>>,
    subscribers: RefCell<IndexMap<SubscriberId, Subscriber>>,
    /// Stores whose computeds read this one.
    watchers: RefCell<IndexMap<StoreId, Weak<StoreInner>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let root = self.root.id();
        // The registry may already be gone during thread teardown.
        let _ = ROOTS.try_with(|roots| {
            if let Ok(mut roots) = roots.try_borrow_mut() {
                if roots.get(&root).is_some_and(|store| store.strong_count() == 0) {
                    roots.remove(&root);
                }
            }
        });
    }
}

/// Handle to a managed store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    fn create(root: Node, options: StoreOptions) -> Self {
        let id = StoreId::new();
        let sweep_at = options.wrapper_sweep_threshold.max(1);
        let inner = Rc::new(StoreInner {
            id,
            root: root.clone(),
            options,
            memos: RefCell::new(MemoTable::new(id)),
            wrappers: RefCell::new(HashMap::new()),
            sweep_at: Cell::new(sweep_at),
            mounts: RefCell::new(HashMap::new()),
            subscribers: RefCell::new(IndexMap::new()),
            watchers: RefCell::new(IndexMap::new()),
        });

        ROOTS.with(|roots| {
            roots
                .borrow_mut()
                .insert(root.id(), Rc::downgrade(&inner));
        });

        tracing::debug!(
            store = %id,
            label = ?inner.options.label,
            root = root.id().raw(),
            kind = root.kind().name(),
            "store created"
        );

        Self { inner }
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.options.label.as_deref()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    /// The root wrapper.
    pub fn root(&self) -> Proxy {
        self.wrap(self.inner.root.clone(), Path::root())
    }

    pub fn same(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------------

    /// Register `callback` under `handle`.
    ///
    /// The callback runs after any write that touches something `handle`'s
    /// scope read in its latest [`run_tracked_scope`](crate::run_tracked_scope)
    /// run. Subscribing again under the same handle replaces the callback and
    /// keeps the original registration position.
    pub fn subscribe<F>(&self, handle: SubscriberId, callback: F) -> Subscription
    where
        F: Fn() + 'static,
    {
        self.inner
            .subscribers
            .borrow_mut()
            .insert(handle, Subscriber::new(handle, callback));
        Subscription {
            store: Rc::downgrade(&self.inner),
            handle,
        }
    }

    /// Remove the subscriber registered under `handle`. Returns whether one
    /// was registered.
    pub fn unsubscribe(&self, handle: SubscriberId) -> bool {
        self.inner
            .subscribers
            .borrow_mut()
            .shift_remove(&handle)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Run the invalidation pass for `path` as if it had been written.
    ///
    /// Writes through wrappers do this on their own. Hosts that mutate data
    /// the store cannot see, such as the contents of an opaque box, call it to
    /// signal the change by hand.
    pub fn notify_path_change(&self, path: &Path) {
        self.notify_paths(std::slice::from_ref(path));
    }

    pub(crate) fn notify_paths(&self, changed: &[Path]) {
        if changed.is_empty() {
            return;
        }

        let mut affected = IndexSet::new();
        {
            let mut memos = self.inner.memos.borrow_mut();
            for path in changed {
                affected.extend(memos.invalidate(path));
            }
        }

        let mut targets = Vec::new();
        self.collect_targets(changed, &affected, &mut targets);

        tracing::debug!(
            store = %self.id(),
            label = ?self.inner.options.label,
            changed = ?changed.iter().map(Path::key).collect::<Vec<_>>(),
            affected = affected.len(),
            notified = targets.len(),
            "write invalidated"
        );

        self.propagate(changed, &affected, &mut targets);

        for (_, subscriber) in targets {
            subscriber.notify();
        }
    }

    /// Subscribers whose published reads are touched by `changed` or
    /// `affected`, in registration order. A subscriber already in `targets`
    /// is not added twice.
    fn collect_targets(&self, changed: &[Path], affected: &IndexSet<Path>, targets: &mut Targets) {
        let store = self.id();
        let subscribers = self.inner.subscribers.borrow();
        for subscriber in subscribers.values() {
            let already = targets
                .iter()
                .any(|(owner, target)| *owner == store && target.id() == subscriber.id());
            if !already && self.depends_on(subscriber.id(), changed, affected) {
                targets.push((store, subscriber.clone()));
            }
        }
    }

    /// Hand a write to the stores whose computeds read this one.
    fn propagate(&self, changed: &[Path], affected: &IndexSet<Path>, targets: &mut Targets) {
        for watcher in self.watchers() {
            let dirtied = watcher
                .inner
                .memos
                .borrow_mut()
                .invalidate_foreign(self.id(), changed, affected);
            if dirtied.is_empty() {
                continue;
            }

            let before = targets.len();
            watcher.collect_targets(&[], &dirtied, targets);
            tracing::debug!(
                store = %watcher.id(),
                source = %self.id(),
                affected = dirtied.len(),
                notified = targets.len() - before,
                "write in another store invalidated"
            );

            // Only newly dirtied entries go further, so a loop between two
            // stores ends.
            watcher.propagate(&[], &dirtied, targets);
        }
    }

    fn watchers(&self) -> Vec<Store> {
        let mut watchers = self.inner.watchers.borrow_mut();
        watchers.retain(|_, watcher| watcher.strong_count() > 0);
        watchers
            .values()
            .filter_map(Weak::upgrade)
            .map(|inner| Store { inner })
            .collect()
    }

    /// Record that a computed of `reader` read this store.
    fn watched_by(&self, reader: &Store) {
        if !self.same(reader) {
            self.inner
                .watchers
                .borrow_mut()
                .insert(reader.id(), Rc::downgrade(&reader.inner));
        }
    }

    fn depends_on(&self, handle: SubscriberId, changed: &[Path], affected: &IndexSet<Path>) -> bool {
        let store = self.id();
        ReactiveContext::with_published(handle, |dependencies| {
            dependencies.is_some_and(|dependencies| {
                dependencies
                    .iter()
                    .filter(|dependency| dependency.store == store)
                    .any(|dependency| match &dependency.key {
                        DepKey::Raw(path) => changed.iter().any(|c| c.is_related(path)),
                        DepKey::Computed(path) => affected.contains(path),
                    })
            })
        })
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Snapshot of the computed entry at `path`, if it was ever read.
    pub fn computed_info(&self, path: &Path) -> Option<ComputedInfo> {
        self.inner.memos.borrow().info(path)
    }

    pub fn computed_state(&self, path: &Path) -> Option<MemoState> {
        self.inner.memos.borrow().state(path)
    }

    /// Number of computed entries created so far.
    pub fn computed_count(&self) -> usize {
        self.inner.memos.borrow().len()
    }

    /// Total edges held by the reverse index.
    pub fn edge_count(&self) -> usize {
        self.inner.memos.borrow().edge_count()
    }

    /// Number of cached wrappers still alive.
    pub fn live_wrappers(&self) -> usize {
        self.inner
            .wrappers
            .borrow()
            .values()
            .filter(|wrapper| wrapper.strong_count() > 0)
            .count()
    }

    // ------------------------------------------------------------------------
    // Engine
    // ------------------------------------------------------------------------

    /// The single wrapper for `node` at `path`.
    pub(crate) fn wrap(&self, node: Node, path: Path) -> Proxy {
        self.inner
            .mounts
            .borrow_mut()
            .entry(node.id())
            .or_default()
            .insert(path.clone());

        let key = (node.id(), path);
        if let Some(inner) = self.inner.wrappers.borrow().get(&key).and_then(Weak::upgrade) {
            return Proxy::from_inner(inner);
        }

        let proxy = Proxy::new(self.clone(), node, key.1.clone());
        let mut wrappers = self.inner.wrappers.borrow_mut();
        wrappers.insert(key, proxy.downgrade());

        if wrappers.len() >= self.inner.sweep_at.get() {
            wrappers.retain(|_, wrapper| wrapper.strong_count() > 0);
            let next = (wrappers.len() * 2).max(self.inner.options.wrapper_sweep_threshold.max(1));
            self.inner.sweep_at.set(next);
            drop(wrappers);

            let mut mounts = self.inner.mounts.borrow_mut();
            mounts.retain(|id, paths| {
                paths.retain(|path| self.node_at(path).is_some_and(|node| node.id() == *id));
                !paths.is_empty()
            });
            tracing::trace!(
                store = %self.id(),
                live = self.inner.wrappers.borrow().len(),
                mounted = mounts.len(),
                "wrapper cache swept"
            );
        }

        proxy
    }

    /// The node currently at `path`, if that slot holds a record or sequence.
    fn node_at(&self, path: &Path) -> Option<Node> {
        path.segments()
            .iter()
            .try_fold(self.inner.root.clone(), |node, segment| match node.get(segment) {
                Some(Value::Node(child)) => Some(child),
                _ => None,
            })
    }

    /// Every path `node` is still mounted at, in the order the mounts were
    /// first seen. Mounts the node has left are forgotten.
    pub(crate) fn mount_paths(&self, node: &Node) -> Vec<Path> {
        let mut mounts = self.inner.mounts.borrow_mut();
        let Some(paths) = mounts.get_mut(&node.id()) else {
            return Vec::new();
        };
        paths.retain(|path| self.node_at(path).is_some_and(|found| found.same(node)));
        let live = paths.iter().cloned().collect();
        if paths.is_empty() {
            mounts.remove(&node.id());
        }
        live
    }

    /// A computed result as a reader sees it: a record or sequence that is
    /// mounted in this store comes back as its wrapper, so reads through it
    /// are tracked like any other.
    fn surface(&self, value: Value) -> Resolved {
        if let Value::Node(node) = &value {
            if let Some(path) = self.mount_paths(node).into_iter().next() {
                return Resolved::Proxy(self.wrap(node.clone(), path));
            }
        }
        Resolved::Value(value)
    }

    /// Create the entry for an accessor without evaluating it.
    pub(crate) fn prepare_computed(&self, path: &Path, computed: &Computed) {
        self.inner.memos.borrow_mut().ensure(path, computed);
    }

    /// Read the accessor `computed` stored at `owner.key`, evaluating it if
    /// dirty. With `track`, the active scope records the computed and every
    /// raw path it currently depends on, in this store and in others.
    pub(crate) fn read_computed(
        &self,
        owner: &Proxy,
        key: &Key,
        computed: &Computed,
        track: bool,
    ) -> Result<Resolved> {
        let path = owner.path().child(key);
        let value = self.settle(owner, &path, computed)?;

        if track {
            let (raw, foreign) = {
                let memos = self.inner.memos.borrow();
                (memos.raw_dependencies(&path), memos.foreign_dependencies(&path))
            };
            ReactiveContext::track(Dependency::computed(self.id(), path));
            for dependency in raw {
                ReactiveContext::track(Dependency::raw(self.id(), dependency));
            }
            for dependency in foreign {
                ReactiveContext::track(dependency);
            }
        }

        Ok(self.surface(value))
    }

    fn settle(&self, owner: &Proxy, path: &Path, computed: &Computed) -> Result<Value> {
        let lookup = self.inner.memos.borrow_mut().begin_read(path, computed);
        match lookup {
            Lookup::Cached(value) => Ok(value),
            Lookup::Cycle => {
                tracing::warn!(store = %self.id(), path = %path, "computed read itself while evaluating");
                Err(StoreError::Cycle { path: path.clone() })
            }
            Lookup::Evaluate(computed) => self.evaluate(owner, path, &computed),
        }
    }

    fn evaluate(&self, owner: &Proxy, path: &Path, computed: &Computed) -> Result<Value> {
        let mut pending = PendingEvaluation {
            store: self,
            path,
            armed: true,
        };

        let scope = ScopeId::Computed(ComputedId {
            store: self.id(),
            path: path.clone(),
        });
        let (result, dependencies) = run_tracked(scope, || computed.evaluate(owner));

        match result {
            Ok(value) => {
                pending.armed = false;
                let sources = self
                    .inner
                    .memos
                    .borrow_mut()
                    .commit(path, value.clone(), &dependencies);
                for source in sources.into_iter().filter_map(store_by_id) {
                    source.watched_by(self);
                }
                Ok(value)
            }
            Err(err) => {
                let err = err.attributed_to(path);
                tracing::warn!(store = %self.id(), path = %path, error = %err, "computed evaluation failed");
                Err(err)
            }
        }
    }
}

/// Callbacks to run at the end of a write pass, with the store each was
/// registered on.
type Targets = Vec<(StoreId, Subscriber)>;

/// Clears an entry's evaluating mark if its evaluation does not commit,
/// including when the evaluation function panics.
struct PendingEvaluation<'a> {
    store: &'a Store,
    path: &'a Path,
    armed: bool,
}

impl Drop for PendingEvaluation<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut memos) = self.store.inner.memos.try_borrow_mut() {
                memos.abandon(self.path);
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("label", &self.inner.options.label)
            .field("root", &self.inner.root.id())
            .finish_non_exhaustive()
    }
}

/// Registration returned by [`Store::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    store: Weak<StoreInner>,
    handle: SubscriberId,
}

impl Subscription {
    pub fn handle(&self) -> SubscriberId {
        self.handle
    }

    /// Remove the callback. Returns `false` if it was already removed or the
    /// store is gone.
    pub fn unsubscribe(self) -> bool {
        match self.store.upgrade() {
            Some(inner) => Store { inner }.unsubscribe(self.handle),
            None => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Entry points
// ----------------------------------------------------------------------------

/// Wrap a record or sequence in a new store and return its root wrapper.
///
/// Passing a node that already roots a live store returns that store's root
/// wrapper instead of creating a second store.
pub fn create_managed_state(initial: impl Into<Value>) -> Result<Proxy> {
    create_managed_state_with(initial, StoreOptions::default())
}

/// Like [`create_managed_state`], with explicit options. The options are
/// ignored when `initial` is already managed.
pub fn create_managed_state_with(initial: impl Into<Value>, options: StoreOptions) -> Result<Proxy> {
    let root = match initial.into() {
        Value::Node(node) => node,
        other => {
            return Err(StoreError::NotAContainer {
                found: other.kind_name(),
            })
        }
    };

    if let Some(store) = root.managed_store() {
        return Ok(store.root());
    }
    Ok(Store::create(root, options).root())
}

fn store_by_id(id: StoreId) -> Option<Store> {
    ROOTS.with(|roots| {
        roots
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .find(|inner| inner.id == id)
            .map(|inner| Store { inner })
    })
}

/// Anything a store can be looked up from.
pub trait Managed {
    fn managed_store(&self) -> Option<Store>;
}

impl Managed for Node {
    fn managed_store(&self) -> Option<Store> {
        ROOTS
            .with(|roots| roots.borrow().get(&self.id()).and_then(Weak::upgrade))
            .map(|inner| Store { inner })
    }
}

impl Managed for Proxy {
    fn managed_store(&self) -> Option<Store> {
        Some(self.store())
    }
}

impl Managed for Value {
    fn managed_store(&self) -> Option<Store> {
        self.as_node().and_then(Node::managed_store)
    }
}

/// The store behind a wrapper or a root node.
pub fn lookup_store<M: Managed + ?Sized>(state: &M) -> Result<Store> {
    state.managed_store().ok_or(StoreError::NotManaged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::run_tracked_scope;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn creation_is_idempotent_by_root() {
        let root = Node::record_from([("a", 1)]);

        let first = create_managed_state(root.clone()).unwrap();
        let second = create_managed_state(root.clone()).unwrap();

        assert!(first.same(&second));
        assert!(lookup_store(&root).unwrap().same(&first.store()));
    }

    #[test]
    fn primitives_cannot_be_managed() {
        let err = create_managed_state(3).unwrap_err();
        assert_eq!(err, StoreError::NotAContainer { found: "number" });
    }

    #[test]
    fn unmanaged_nodes_are_reported() {
        let node = Node::record();
        assert_eq!(lookup_store(&node).unwrap_err(), StoreError::NotManaged);
        assert_eq!(lookup_store(&Value::from(1)).unwrap_err(), StoreError::NotManaged);
    }

    #[test]
    fn dropped_stores_leave_the_registry() {
        let root = Node::record();
        {
            let _state = create_managed_state(root.clone()).unwrap();
            assert!(lookup_store(&root).is_ok());
        }
        assert!(lookup_store(&root).is_err());
    }

    #[test]
    fn options_are_kept() {
        let state =
            create_managed_state_with(json!({}), StoreOptions::labeled("cart")).unwrap();
        assert_eq!(state.store().label(), Some("cart"));
    }

    #[test]
    fn dead_wrappers_are_swept() {
        let options = StoreOptions {
            wrapper_sweep_threshold: 4,
            ..StoreOptions::default()
        };
        let state = create_managed_state_with(json!({ "items": [{}, {}, {}, {}, {}, {}] }), options)
            .unwrap();
        let store = state.store();
        let items = state.child("items").unwrap();

        for index in 0..6 {
            let _ = items.child(index).unwrap();
        }
        // Only the root and `items` wrappers are still held.
        assert_eq!(store.live_wrappers(), 2);
        assert!(store.inner.wrappers.borrow().len() < 8);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let state = create_managed_state(json!({ "n": 0 })).unwrap();
        let store = state.store();
        let handle = SubscriberId::new();
        let calls = Rc::new(Cell::new(0));

        run_tracked_scope(handle, || state.number("n").unwrap());
        let counter = calls.clone();
        let subscription = store.subscribe(handle, move || counter.set(counter.get() + 1));

        state.set("n", 1).unwrap();
        assert_eq!(calls.get(), 1);

        assert!(subscription.unsubscribe());
        state.set("n", 2).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn manual_notification_reaches_readers() {
        let state = create_managed_state(json!({ "blob": null })).unwrap();
        let store = state.store();
        let handle = SubscriberId::new();
        let calls = Rc::new(Cell::new(0));

        run_tracked_scope(handle, || state.value("blob").unwrap());
        let counter = calls.clone();
        let _subscription = store.subscribe(handle, move || counter.set(counter.get() + 1));

        store.notify_path_change(&Path::from("blob"));
        store.notify_path_change(&Path::from("other"));
        assert_eq!(calls.get(), 1);
    }
}
