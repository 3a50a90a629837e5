//! Interception Layer
//!
//! A [`Proxy`] is the managed view of one record or sequence at one absolute
//! path. Every read and write of managed state goes through a proxy:
//!
//! - reading a nested record or sequence returns that child's proxy, built
//!   once per (node, path) and cached by the store;
//! - reading a leaf records a raw dependency when a scope is active and
//!   returns the value, or returns a [`Deferred`] handle when none is;
//! - reading a derived accessor goes through the memo engine, and a result
//!   that is a record or sequence mounted in the store comes back as its
//!   wrapper;
//! - every write mutates the raw node and then runs the store's invalidation
//!   pass for the paths that changed.
//!
//! Reading an element of a sequence, or its length, also records the
//! sequence's synthetic `length` path, so readers of a position are notified
//! when elements are inserted or removed.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Result, StoreError};
use crate::graph::{Key, Node, NodeKind, Path, LENGTH};
use crate::reactive::{Computed, Deferred, Dependency, ReactiveContext, ScopeId};

use super::container::Mutation;
use super::{Store, Value};

/// The result of reading a slot through a proxy.
#[derive(Debug, Clone)]
pub enum Access {
    /// A leaf value or a computed result, read under an active scope.
    Value(Value),
    /// A nested record or sequence, or a computed result mounted in the
    /// store.
    Proxy(Proxy),
    /// A leaf or computed read with no active scope.
    Deferred(Deferred),
}

impl Access {
    /// Resolve to a plain value. Deferred handles are resolved under whatever
    /// scope is active now; proxies yield their raw node.
    pub fn resolve(self) -> Result<Value> {
        match self {
            Access::Value(value) => Ok(value),
            Access::Proxy(proxy) => Ok(Value::from(proxy)),
            Access::Deferred(deferred) => deferred.resolve(),
        }
    }

    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Access::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Access::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Access::Deferred(_))
    }
}

impl From<Value> for Access {
    fn from(value: Value) -> Self {
        Access::Value(value)
    }
}

impl From<Proxy> for Access {
    fn from(proxy: Proxy) -> Self {
        Access::Proxy(proxy)
    }
}

impl From<&Proxy> for Access {
    fn from(proxy: &Proxy) -> Self {
        Access::Proxy(proxy.clone())
    }
}

impl From<Deferred> for Access {
    fn from(deferred: Deferred) -> Self {
        Access::Deferred(deferred)
    }
}

/// An [`Access`] that is never deferred.
pub(crate) enum Resolved {
    Value(Value),
    Proxy(Proxy),
}

impl From<Resolved> for Value {
    fn from(resolved: Resolved) -> Self {
        match resolved {
            Resolved::Value(value) => value,
            Resolved::Proxy(proxy) => Value::from(proxy),
        }
    }
}

impl From<Resolved> for Access {
    fn from(resolved: Resolved) -> Self {
        match resolved {
            Resolved::Value(value) => Access::Value(value),
            Resolved::Proxy(proxy) => Access::Proxy(proxy),
        }
    }
}

/// What a slot holds, from the interception layer's point of view.
enum Slot {
    Leaf(Value),
    Child(Node),
    Accessor(Computed),
}

pub(crate) struct ProxyInner {
    store: Store,
    node: Node,
    path: Path,
}

/// The managed wrapper of a record or sequence.
///
/// Cloning a proxy is cheap and yields the same wrapper; [`Proxy::same`]
/// compares wrapper identity.
#[derive(Clone)]
pub struct Proxy {
    inner: Rc<ProxyInner>,
}

impl Proxy {
    pub(crate) fn new(store: Store, node: Node, path: Path) -> Self {
        Self {
            inner: Rc::new(ProxyInner { store, node, path }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<ProxyInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<ProxyInner>) -> Self {
        Self { inner }
    }

    /// The store this wrapper belongs to.
    pub fn store(&self) -> Store {
        self.inner.store.clone()
    }

    /// Absolute path from the store root.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The raw node behind the wrapper.
    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    pub fn kind(&self) -> NodeKind {
        self.inner.node.kind()
    }

    pub fn is_sequence(&self) -> bool {
        self.kind() == NodeKind::Sequence
    }

    /// Wrapper identity.
    pub fn same(&self, other: &Proxy) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Read a slot.
    pub fn get(&self, key: impl Into<Key>) -> Result<Access> {
        let key = key.into();
        let tracking = ReactiveContext::is_active();
        if tracking {
            self.track_position(&key);
        }

        match self.slot(&key) {
            Slot::Child(node) => Ok(Access::Proxy(self.child_proxy(node, &key))),
            Slot::Accessor(computed) if !tracking => {
                self.store().prepare_computed(&self.path().child(&key), &computed);
                Ok(Access::Deferred(Deferred::new(self.clone(), key)))
            }
            Slot::Leaf(_) if !tracking => Ok(Access::Deferred(Deferred::new(self.clone(), key))),
            Slot::Leaf(value) => {
                ReactiveContext::track(Dependency::raw(self.store().id(), self.path().child(&key)));
                Ok(Access::Value(value))
            }
            Slot::Accessor(computed) => self
                .store()
                .read_computed(self, &key, &computed, true)
                .map(Access::from),
        }
    }

    /// Read a slot now: tracked if a scope is active, untracked otherwise.
    pub(crate) fn resolve_now(&self, key: &Key) -> Result<Resolved> {
        let tracking = ReactiveContext::is_active();
        if tracking {
            self.track_position(key);
        }
        match self.slot(key) {
            Slot::Child(node) => Ok(Resolved::Proxy(self.child_proxy(node, key))),
            Slot::Leaf(value) => {
                if tracking {
                    ReactiveContext::track(Dependency::raw(self.store().id(), self.path().child(key)));
                }
                Ok(Resolved::Value(value))
            }
            Slot::Accessor(computed) => self.store().read_computed(self, key, &computed, tracking),
        }
    }

    /// Read a slot and resolve it to a value.
    pub fn value(&self, key: impl Into<Key>) -> Result<Value> {
        self.get(key)?.resolve()
    }

    /// Read a numeric slot.
    pub fn number(&self, key: impl Into<Key>) -> Result<f64> {
        let key = key.into();
        let value = self.value(&key)?;
        value.as_f64().ok_or_else(|| StoreError::TypeMismatch {
            path: self.path().child(&key),
            expected: "number",
            found: value.kind_name(),
        })
    }

    /// Read a nested record or sequence.
    pub fn child(&self, key: impl Into<Key>) -> Result<Proxy> {
        let key = key.into();
        match self.get(&key)? {
            Access::Proxy(proxy) => Ok(proxy),
            other => Err(StoreError::TypeMismatch {
                path: self.path().child(&key),
                expected: "record or sequence",
                found: other.resolve()?.kind_name(),
            }),
        }
    }

    /// Read a slot without recording anything, even inside a scope.
    pub fn peek(&self, key: impl Into<Key>) -> Result<Value> {
        let key = key.into();
        crate::reactive::untracked(|| self.value(&key))
    }

    /// Element count of a sequence (tracked as `length`), or field count of a
    /// record (untracked).
    pub fn len(&self) -> usize {
        if self.is_sequence() && ReactiveContext::is_active() {
            self.track_length();
        }
        self.inner.node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every element of a sequence, read in order.
    pub fn elements(&self) -> Result<Vec<Access>> {
        let len = self.len();
        (0..len).map(|index| self.get(index)).collect()
    }

    /// Field names of a record or indices of a sequence. Untracked.
    pub fn keys(&self) -> Vec<String> {
        self.inner.node.keys()
    }

    fn slot(&self, key: &Key) -> Slot {
        match self.inner.node.get(key.as_str()) {
            Some(Value::Node(node)) => Slot::Child(node),
            Some(Value::Computed(computed)) => Slot::Accessor(computed),
            Some(value) => Slot::Leaf(value),
            None => Slot::Leaf(Value::Null),
        }
    }

    fn child_proxy(&self, node: Node, key: &Key) -> Proxy {
        self.store().wrap(node, self.path().child(key))
    }

    fn track_length(&self) {
        ReactiveContext::track(Dependency::raw(self.store().id(), self.path().child(LENGTH)));
    }

    /// Positions in a sequence depend on its length.
    fn track_position(&self, key: &Key) {
        if self.is_sequence() && !key.is_length() {
            self.track_length();
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Assign a slot. Fails on a derived accessor; use [`Proxy::define`] to
    /// replace one.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let path = self.path().child(&key);
        self.ensure_writable(&path)?;
        if let Some(Value::Computed(_)) = self.inner.node.get(key.as_str()) {
            return Err(StoreError::ReadOnly { path });
        }
        self.write(&key, value.into())
    }

    /// Define a slot, replacing whatever is there, derived accessors
    /// included.
    pub fn define(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        self.ensure_writable(&self.path().child(&key))?;
        self.write(&key, value.into())
    }

    /// Delete a slot. In a sequence this leaves a `Null` hole.
    pub fn delete(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        self.ensure_writable(&self.path().child(&key))?;
        let mutation = self
            .inner
            .node
            .container_mut()
            .delete(self.path(), &key)?;
        self.commit(mutation);
        Ok(())
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mutation = self.edit_sequence(|seq| seq.push(value))?;
        self.commit(mutation);
        Ok(())
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        let (value, mutation) = self.edit_sequence(|seq| seq.pop())?;
        self.commit(mutation);
        Ok(value)
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mutation = self.edit_sequence(|seq| seq.insert(index, value))?;
        self.commit(mutation);
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<Option<Value>> {
        let (value, mutation) = self.edit_sequence(|seq| seq.remove(index))?;
        self.commit(mutation);
        Ok(value)
    }

    /// Set the length of a sequence, padding with `Null`.
    pub fn set_len(&self, len: usize) -> Result<()> {
        let mutation = self.edit_sequence(|seq| seq.set_len(self.path(), len))??;
        self.commit(mutation);
        Ok(())
    }

    fn write(&self, key: &Key, value: Value) -> Result<()> {
        let mutation = self
            .inner
            .node
            .container_mut()
            .write(self.path(), key, value)?;
        self.commit(mutation);
        Ok(())
    }

    fn edit_sequence<R>(&self, edit: impl FnOnce(&mut super::container::Sequence) -> R) -> Result<R> {
        self.ensure_writable(self.path())?;
        let mut sequence = self
            .inner
            .node
            .sequence_mut()
            .ok_or_else(|| StoreError::TypeMismatch {
                path: self.path().clone(),
                expected: "sequence",
                found: NodeKind::Record.name(),
            })?;
        Ok(edit(&mut sequence))
    }

    fn ensure_writable(&self, path: &Path) -> Result<()> {
        match ReactiveContext::current_scope() {
            Some(ScopeId::Computed(computed)) => Err(StoreError::WriteInComputed {
                path: path.clone(),
                computed: computed.path,
            }),
            _ => Ok(()),
        }
    }

    /// Run the invalidation pass for everything `mutation` touched, at this
    /// wrapper's path and at every other path the node is mounted at. The
    /// node borrow is already released here.
    fn commit(&self, mutation: Mutation) {
        if mutation.is_empty() {
            return;
        }
        let store = self.store();
        let mut bases = vec![self.path().clone()];
        for path in store.mount_paths(self.node()) {
            if !bases.contains(&path) {
                bases.push(path);
            }
        }
        let changed: Vec<Path> = bases
            .iter()
            .flat_map(|base| mutation.changed.iter().map(move |key| base.child(key)))
            .collect();
        store.notify_paths(&changed);
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("store", &self.inner.store.id())
            .field("path", &self.inner.path.key())
            .field("node", &self.inner.node)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{run_tracked_scope, ReactiveContext, SubscriberId};
    use crate::store::create_managed_state;
    use serde_json::json;

    #[test]
    fn nested_reads_return_stable_wrappers() {
        let state = create_managed_state(json!({ "user": { "name": "ada" } })).unwrap();

        let first = state.child("user").unwrap();
        let second = state.child("user").unwrap();

        assert!(first.same(&second));
        assert_eq!(first.path().key(), "user");
    }

    #[test]
    fn leaf_reads_outside_a_scope_are_deferred() {
        let state = create_managed_state(json!({ "count": 1 })).unwrap();

        let access = state.get("count").unwrap();
        assert!(access.is_deferred());

        state.set("count", 2).unwrap();
        // The handle is live: it reads the value at resolution time.
        assert_eq!(access.resolve().unwrap().as_f64(), Some(2.0));
    }

    #[test]
    fn leaf_reads_inside_a_scope_are_tracked() {
        let state = create_managed_state(json!({ "a": 1, "b": { "c": 2 } })).unwrap();
        let handle = SubscriberId::new();

        run_tracked_scope(handle, || {
            assert_eq!(state.number("a").unwrap(), 1.0);
            let b = state.child("b").unwrap();
            assert_eq!(b.number("c").unwrap(), 2.0);
        });

        let keys: Vec<String> = ReactiveContext::published(handle)
            .unwrap()
            .iter()
            .map(|d| d.key.to_string())
            .collect();
        // The intermediate record `b` is not a dependency.
        assert_eq!(keys, vec!["a", "b.c"]);
    }

    #[test]
    fn sequence_reads_track_length() {
        let state = create_managed_state(json!({ "items": [1, 2, 3] })).unwrap();
        let handle = SubscriberId::new();

        run_tracked_scope(handle, || {
            let items = state.child("items").unwrap();
            assert_eq!(items.len(), 3);
            assert_eq!(items.number(1usize).unwrap(), 2.0);
        });

        let keys: Vec<String> = ReactiveContext::published(handle)
            .unwrap()
            .iter()
            .map(|d| d.key.to_string())
            .collect();
        assert_eq!(keys, vec!["items.length", "items.1"]);
    }

    #[test]
    fn assigning_over_an_accessor_is_rejected() {
        let state = create_managed_state(json!({ "n": 1 })).unwrap();
        state
            .define("double", Computed::new(|this| Ok((this.number("n")? * 2.0).into())))
            .unwrap();

        let err = state.set("double", 5).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly { .. }));

        state.define("double", 5).unwrap();
        assert_eq!(state.number("double").unwrap(), 5.0);
    }

    #[test]
    fn sequence_helpers_reject_records() {
        let state = create_managed_state(json!({ "a": 1 })).unwrap();
        let err = state.push(1).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { expected: "sequence", .. }));
    }

    #[test]
    fn typed_reads_report_mismatches() {
        let state = create_managed_state(json!({ "name": "ada", "n": 1 })).unwrap();

        let err = state.number("name").unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { found: "string", .. }));

        let err = state.child("n").unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { found: "number", .. }));
    }

    #[test]
    fn writing_a_wrapper_stores_its_node() {
        let state = create_managed_state(json!({ "a": { "x": 1 }, "b": null })).unwrap();
        let a = state.child("a").unwrap();

        state.set("b", &a).unwrap();
        let b = state.child("b").unwrap();

        assert!(b.node().same(a.node()));
        // Same node, different location: a different wrapper.
        assert!(!b.same(&a));
        assert_eq!(b.path().key(), "b");
    }
}
