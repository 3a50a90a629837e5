//! Deferred reads.
//!
//! Reading a leaf or a derived accessor with no scope active does not commit
//! to anything: the read returns a [`Deferred`] handle instead. Resolving the
//! handle later reads the slot under whichever scope is active at that moment,
//! so a value fetched outside a render and consumed inside one still lands in
//! the render's dependency set.

use std::fmt;

use crate::error::Result;
use crate::graph::{Key, Path};
use crate::store::{Access, Proxy, Value};

/// A read that has not happened yet.
#[derive(Clone)]
pub struct Deferred {
    owner: Proxy,
    key: Key,
    path: Path,
}

impl Deferred {
    pub(crate) fn new(owner: Proxy, key: Key) -> Self {
        let path = owner.path().child(&key);
        Self { owner, key, path }
    }

    /// Absolute path of the slot this handle reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The wrapper the slot belongs to.
    pub fn owner(&self) -> &Proxy {
        &self.owner
    }

    /// Whether the slot currently holds a derived accessor.
    pub fn is_computed(&self) -> bool {
        matches!(self.owner.node().get(self.key.as_str()), Some(Value::Computed(_)))
    }

    /// Read the slot now. Tracked if a scope is active; a nested record or
    /// sequence resolves to its raw node.
    pub fn resolve(&self) -> Result<Value> {
        self.owner.resolve_now(&self.key).map(Value::from)
    }

    /// Like [`Deferred::resolve`], but a nested record or sequence, or a
    /// computed result that lives in the store, comes back as its wrapper.
    /// Never returns [`Access::Deferred`].
    pub fn resolve_access(&self) -> Result<Access> {
        self.owner.resolve_now(&self.key).map(Access::from)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("store", &self.owner.store().id())
            .field("path", &self.path.key())
            .finish()
    }
}
