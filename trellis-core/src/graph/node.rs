//! State Nodes
//!
//! This module defines the raw containers that make up a state tree. A node
//! is either a record (named fields, insertion ordered) or a sequence
//! (indexed elements). Nodes are shared by reference: cloning a [`Node`]
//! yields another handle to the same container, and identity is what the
//! wrapper cache keys on.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::container::{Container, Record, Sequence};
use crate::store::Value;

/// Unique identifier for a node in a state tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of container a node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Named fields. Property order is insertion order.
    Record,

    /// Indexed elements with a `length`.
    Sequence,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Record => "record",
            NodeKind::Sequence => "sequence",
        }
    }
}

pub(crate) enum NodeData {
    Record(Record),
    Sequence(Sequence),
}

struct NodeCell {
    id: NodeId,
    data: RefCell<NodeData>,
}

/// A shared handle to a raw record or sequence.
#[derive(Clone)]
pub struct Node(Rc<NodeCell>);

impl Node {
    fn from_data(data: NodeData) -> Self {
        Self(Rc::new(NodeCell {
            id: NodeId::new(),
            data: RefCell::new(data),
        }))
    }

    /// Create an empty record.
    pub fn record() -> Self {
        Self::from_data(NodeData::Record(Record::default()))
    }

    /// Create an empty sequence.
    pub fn sequence() -> Self {
        Self::from_data(NodeData::Sequence(Sequence::default()))
    }

    /// Create a record from `(name, value)` pairs.
    ///
    /// This is also how derived accessors are attached up front:
    ///
    /// ```rust,ignore
    /// let cart = Node::record_from([
    ///     ("price", Value::from(10)),
    ///     ("doubled", Computed::new(|this| Ok((this.number("price")? * 2.0).into())).into()),
    /// ]);
    /// ```
    pub fn record_from<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let record = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_data(NodeData::Record(record))
    }

    /// Create a sequence from its elements.
    pub fn sequence_from<I, V>(elements: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let sequence = elements.into_iter().map(Into::into).collect();
        Self::from_data(NodeData::Sequence(sequence))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn kind(&self) -> NodeKind {
        self.container().kind()
    }

    /// Whether both handles refer to the same container.
    pub fn same(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Field count of a record, element count of a sequence.
    pub fn len(&self) -> usize {
        self.container().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a slot without any tracking. Derived accessors come back as
    /// [`Value::Computed`], unevaluated.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.container().read(key)
    }

    /// Field names of a record, or the indices of a sequence.
    pub fn keys(&self) -> Vec<String> {
        self.container().keys()
    }

    /// Deep copy into plain JSON. Derived accessors and opaque boxes become
    /// `null`, and so does a node nested inside itself.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_within(&mut Vec::new())
    }

    /// `ancestors` holds the nodes currently being copied.
    fn to_json_within(&self, ancestors: &mut Vec<NodeId>) -> serde_json::Value {
        if ancestors.contains(&self.id()) {
            return serde_json::Value::Null;
        }
        ancestors.push(self.id());

        let mut slot = |value: &Value| match value {
            Value::Node(node) => node.to_json_within(ancestors),
            other => other.to_json(),
        };
        let json = match &*self.0.data.borrow() {
            NodeData::Record(record) => serde_json::Value::Object(
                record
                    .iter()
                    .map(|(k, v)| (k.clone(), slot(v)))
                    .collect(),
            ),
            NodeData::Sequence(sequence) => {
                serde_json::Value::Array(sequence.iter().map(slot).collect())
            }
        };

        ancestors.pop();
        json
    }

    pub(crate) fn container(&self) -> Ref<'_, dyn Container> {
        Ref::map(self.0.data.borrow(), |data| match data {
            NodeData::Record(record) => record as &dyn Container,
            NodeData::Sequence(sequence) => sequence as &dyn Container,
        })
    }

    pub(crate) fn container_mut(&self) -> RefMut<'_, dyn Container> {
        RefMut::map(self.0.data.borrow_mut(), |data| match data {
            NodeData::Record(record) => record as &mut dyn Container,
            NodeData::Sequence(sequence) => sequence as &mut dyn Container,
        })
    }

    /// Mutable access to the sequence, or `None` for a record.
    pub(crate) fn sequence_mut(&self) -> Option<RefMut<'_, Sequence>> {
        RefMut::filter_map(self.0.data.borrow_mut(), |data| match data {
            NodeData::Sequence(sequence) => Some(sequence),
            NodeData::Record(_) => None,
        })
        .ok()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
