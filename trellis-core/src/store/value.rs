//! State Values
//!
//! [`Value`] is what lives in a slot of a record or sequence. Primitives are
//! stored inline; records and sequences are shared [`Node`]s; derived
//! accessors and opaque boxes are reference types as well.

use std::fmt;

use crate::graph::Node;
use crate::reactive::Computed;

use super::opaque::{OpaqueRef, RefBox};
use super::proxy::Proxy;

/// A slot value in a state tree.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// A nested record or sequence.
    Node(Node),
    /// A derived accessor. Reading the slot through a store evaluates it.
    Computed(Computed),
    /// A value the store does not look inside.
    Opaque(OpaqueRef),
}

impl Value {
    /// Human-readable kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Node(node) => node.kind().name(),
            Value::Computed(_) => "computed",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Identity comparison: primitives by value, reference kinds by pointer.
    ///
    /// Numbers compare like `Object.is`, so `NaN` is the same as `NaN`.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a.same(b),
            (Value::Computed(a), Value::Computed(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Recover a typed opaque box.
    pub fn opaque<T: 'static>(&self) -> Option<RefBox<T>> {
        match self {
            Value::Opaque(opaque) => opaque.downcast(),
            _ => None,
        }
    }

    /// Convert to plain JSON. Derived accessors and opaque boxes become
    /// `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Computed(_) | Value::Opaque(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Node(node) => node.to_json(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Node(node) => node.fmt(f),
            Value::Computed(computed) => computed.fmt(f),
            Value::Opaque(opaque) => opaque.fmt(f),
        }
    }
}

/// Equality is [`Value::same`].
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! number_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

number_from!(f64, f32, i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Value::Node(node)
    }
}

impl From<Computed> for Value {
    fn from(computed: Computed) -> Self {
        Value::Computed(computed)
    }
}

impl<T: 'static> From<RefBox<T>> for Value {
    fn from(boxed: RefBox<T>) -> Self {
        Value::Opaque(boxed.erase())
    }
}

/// Writing a wrapper stores the raw node behind it.
impl From<Proxy> for Value {
    fn from(proxy: Proxy) -> Self {
        Value::Node(proxy.node().clone())
    }
}

impl From<&Proxy> for Value {
    fn from(proxy: &Proxy) -> Self {
        Value::Node(proxy.node().clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(elements) => Value::Node(Node::sequence_from(elements)),
            serde_json::Value::Object(fields) => Value::Node(Node::record_from(fields)),
        }
    }
}
