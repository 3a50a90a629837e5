//! Snapshot Projector
//!
//! [`project`] turns whatever a read returned into a value an external
//! consumer can hold on to:
//!
//! - primitives and deferred reads resolve immediately;
//! - opaque boxes project to themselves;
//! - managed sequences are materialized into a list, reading the length and
//!   every element through the wrapper;
//! - managed records become a lazy [`View`] bound to the scope that was active
//!   when it was produced;
//! - unmanaged records and sequences, such as one built by a computed, are
//!   copied.
//!
//! A view remembers its scope. Reading a field after that scope has ended
//! (say, from an event handler after render) still records the read for the
//! same consumer: the read runs in a nested scope for that handle and its
//! dependencies are appended to the handle's published set.

use indexmap::IndexMap;
use serde::ser::{Error as _, Serialize, Serializer};

use crate::error::Result;
use crate::graph::{Key, Node, NodeId, NodeKind, Path};
use crate::reactive::context::run_tracked;
use crate::reactive::{untracked, ReactiveContext, ScopeId};

use super::opaque::OpaqueRef;
use super::proxy::{Access, Proxy};
use super::value::Value;

/// A projected value.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Opaque(OpaqueRef),
    List(Vec<Snapshot>),
    /// A copied record that was never managed.
    Map(IndexMap<String, Snapshot>),
    /// A lazy view of a managed record.
    View(View),
}

/// Project a read for an external consumer.
///
/// A sequence or copied record nested inside itself projects to `Null` at the
/// point where it repeats.
pub fn project(access: impl Into<Access>) -> Result<Snapshot> {
    project_within(access.into(), &mut Vec::new())
}

/// `ancestors` holds the nodes being materialized.
fn project_within(access: Access, ancestors: &mut Vec<NodeId>) -> Result<Snapshot> {
    match access {
        Access::Proxy(proxy) => project_proxy(proxy, ancestors),
        Access::Value(value) => Ok(project_value(&value, ancestors)),
        Access::Deferred(deferred) => project_within(deferred.resolve_access()?, ancestors),
    }
}

fn project_proxy(proxy: Proxy, ancestors: &mut Vec<NodeId>) -> Result<Snapshot> {
    match proxy.kind() {
        NodeKind::Sequence => {
            let id = proxy.node().id();
            if ancestors.contains(&id) {
                return Ok(Snapshot::Null);
            }
            ancestors.push(id);
            let items = proxy
                .elements()?
                .into_iter()
                .map(|element| project_within(element, ancestors))
                .collect::<Result<Vec<_>>>();
            ancestors.pop();
            items.map(Snapshot::List)
        }
        NodeKind::Record => Ok(Snapshot::View(View {
            proxy,
            scope: ReactiveContext::current_scope(),
        })),
    }
}

fn project_value(value: &Value, ancestors: &mut Vec<NodeId>) -> Snapshot {
    match value {
        Value::Null => Snapshot::Null,
        Value::Bool(b) => Snapshot::Bool(*b),
        Value::Number(n) => Snapshot::Number(*n),
        Value::String(s) => Snapshot::String(s.clone()),
        Value::Opaque(opaque) => Snapshot::Opaque(opaque.clone()),
        Value::Node(node) => copy_node(node, ancestors),
        // Accessors only mean something inside a store.
        Value::Computed(_) => Snapshot::Null,
    }
}

fn copy_node(node: &Node, ancestors: &mut Vec<NodeId>) -> Snapshot {
    if ancestors.contains(&node.id()) {
        return Snapshot::Null;
    }
    ancestors.push(node.id());

    let mut slot = |key: &str| project_value(&node.get(key).unwrap_or_default(), ancestors);
    let copy = match node.kind() {
        NodeKind::Sequence => Snapshot::List(
            (0..node.len())
                .map(|index| slot(&index.to_string()))
                .collect(),
        ),
        NodeKind::Record => Snapshot::Map(
            node.keys()
                .into_iter()
                .map(|key| {
                    let value = slot(&key);
                    (key, value)
                })
                .collect(),
        ),
    };

    ancestors.pop();
    copy
}

impl Snapshot {
    pub fn is_null(&self) -> bool {
        matches!(self, Snapshot::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Snapshot::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Snapshot::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Snapshot::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Snapshot]> {
        match self {
            Snapshot::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_view(&self) -> Option<&View> {
        match self {
            Snapshot::View(view) => Some(view),
            _ => None,
        }
    }

    /// Read a field of a view or a copied record. Anything else, or a missing
    /// field of a copied record, reads as `Null`.
    pub fn field(&self, key: impl Into<Key>) -> Result<Snapshot> {
        let key = key.into();
        match self {
            Snapshot::View(view) => view.get(key),
            Snapshot::Map(fields) => Ok(fields.get(key.as_str()).cloned().unwrap_or(Snapshot::Null)),
            _ => Ok(Snapshot::Null),
        }
    }

    /// Materialize into JSON, reading lazy views through. Opaque boxes become
    /// `null`, and so does a view of a record nested inside itself.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.to_json_within(&mut Vec::new())
    }

    fn to_json_within(&self, ancestors: &mut Vec<NodeId>) -> Result<serde_json::Value> {
        use serde_json::Value as Json;

        Ok(match self {
            Snapshot::Null | Snapshot::Opaque(_) => Json::Null,
            Snapshot::Bool(b) => Json::Bool(*b),
            Snapshot::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
            Snapshot::String(s) => Json::String(s.clone()),
            Snapshot::List(items) => Json::Array(
                items
                    .iter()
                    .map(|item| item.to_json_within(ancestors))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Snapshot::Map(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), value.to_json_within(ancestors)?)))
                    .collect::<Result<_>>()?,
            ),
            Snapshot::View(view) => {
                let id = view.proxy.node().id();
                if ancestors.contains(&id) {
                    return Ok(Json::Null);
                }
                ancestors.push(id);
                let fields = view
                    .entries()
                    .and_then(|entries| {
                        entries
                            .into_iter()
                            .map(|(key, value)| Ok((key, value.to_json_within(ancestors)?)))
                            .collect::<Result<_>>()
                    });
                ancestors.pop();
                Json::Object(fields?)
            }
        })
    }
}

/// Serializes through [`Snapshot::to_json`], so lazy views are read through.
impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

/// A lazy, scope-bound view of a managed record.
#[derive(Debug, Clone)]
pub struct View {
    proxy: Proxy,
    scope: Option<ScopeId>,
}

impl View {
    /// Read and project one field.
    pub fn get(&self, key: impl Into<Key>) -> Result<Snapshot> {
        let key = key.into();
        let read = || project(self.proxy.get(&key)?);

        match &self.scope {
            None => untracked(read),
            Some(scope) if ReactiveContext::current_scope().as_ref() == Some(scope) => read(),
            Some(ScopeId::Component(handle)) => {
                let (result, dependencies) = run_tracked(ScopeId::Component(*handle), read);
                ReactiveContext::append_published(*handle, dependencies);
                result
            }
            // A computed's evaluation is over; nothing can record into it.
            Some(ScopeId::Computed(_)) => untracked(read),
        }
    }

    /// Field names, untracked.
    pub fn keys(&self) -> Vec<String> {
        self.proxy.keys()
    }

    /// Every field, read and projected in order.
    pub fn entries(&self) -> Result<Vec<(String, Snapshot)>> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get(key.as_str())?;
                Ok((key, value))
            })
            .collect()
    }

    pub fn path(&self) -> &Path {
        self.proxy.path()
    }

    /// The wrapper behind the view.
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// The scope reads are recorded into.
    pub fn scope(&self) -> Option<&ScopeId> {
        self.scope.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{run_tracked_scope, Computed, SubscriberId};
    use crate::store::{create_managed_state, wrap_opaque};
    use serde_json::json;

    fn published_keys(handle: SubscriberId) -> Vec<String> {
        ReactiveContext::published(handle)
            .map(|deps| deps.iter().map(|d| d.key.to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn sequences_materialize_and_track_length() {
        let state = create_managed_state(json!({ "tags": ["a", "b"] })).unwrap();
        let handle = SubscriberId::new();

        let snapshot = run_tracked_scope(handle, || project(state.get("tags").unwrap()).unwrap());

        let items = snapshot.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_str(), Some("b"));
        assert_eq!(published_keys(handle), vec!["tags.length", "tags.0", "tags.1"]);
    }

    #[test]
    fn records_become_lazy_views() {
        let state = create_managed_state(json!({ "user": { "name": "ada", "age": 36 } })).unwrap();
        let handle = SubscriberId::new();

        let snapshot = run_tracked_scope(handle, || project(state.get("user").unwrap()).unwrap());
        // Nothing below `user` was read yet.
        assert!(published_keys(handle).is_empty());

        let view = snapshot.as_view().unwrap();
        assert_eq!(view.scope(), Some(&ScopeId::Component(handle)));
        assert_eq!(view.get("name").unwrap().as_str(), Some("ada"));
        assert_eq!(published_keys(handle), vec!["user.name"]);
    }

    #[test]
    fn views_read_outside_any_scope_are_untracked() {
        let state = create_managed_state(json!({ "user": { "name": "ada" } })).unwrap();
        let snapshot = project(state.get("user").unwrap()).unwrap();

        assert_eq!(snapshot.field("name").unwrap().as_str(), Some("ada"));
        assert_eq!(snapshot.to_json().unwrap(), json!({ "name": "ada" }));
    }

    #[test]
    fn computed_records_are_copied() {
        let state = create_managed_state(json!({ "first": "ada", "last": "lovelace" })).unwrap();
        state
            .define(
                "person",
                Computed::new(|this| {
                    let first = this.value("first")?;
                    let last = this.value("last")?;
                    Ok(Node::record_from([("first", first), ("last", last)]).into())
                }),
            )
            .unwrap();

        let snapshot = run_tracked_scope(SubscriberId::new(), || {
            project(state.get("person").unwrap()).unwrap()
        });

        match &snapshot {
            Snapshot::Map(fields) => assert_eq!(fields["last"].as_str(), Some("lovelace")),
            other => panic!("expected a copied record, got {other:?}"),
        }
    }

    #[test]
    fn opaque_boxes_project_to_themselves() {
        let boxed = wrap_opaque(vec![1, 2, 3]);
        let state = create_managed_state(json!({})).unwrap();
        state.set("blob", boxed.clone()).unwrap();

        let snapshot = project(state.get("blob").unwrap()).unwrap();
        match snapshot {
            Snapshot::Opaque(opaque) => {
                assert!(opaque.downcast::<Vec<i32>>().unwrap().ptr_eq(&boxed));
            }
            other => panic!("expected an opaque box, got {other:?}"),
        }
    }

    #[test]
    fn snapshots_serialize() {
        let state = create_managed_state(json!({ "cart": { "items": [1, 2], "note": null } })).unwrap();
        let snapshot = project(state.get("cart").unwrap()).unwrap();

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json, json!({ "items": [1.0, 2.0], "note": null }));
    }
}
