//! Trellis Core
//!
//! This crate provides the core of the Trellis reactive store: a mutable state
//! tree wrapped so that
//!
//! - reads inside a tracked scope are recorded as dependencies,
//! - derived values (computeds) are memoized and recomputed lazily, and
//! - writes invalidate exactly the computeds and subscribers that read the
//!   changed path, and nothing else.
//!
//! The engine is single-threaded and synchronous. Stores are `Rc`-based and
//! the tracking stack is thread-local.
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - `graph`: paths, raw state nodes, and the reverse invalidation index
//! - `reactive`: tracking scopes, computed memoization, and deferred reads
//! - `store`: managed stores, the interception layer, and snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use trellis_core::{create_managed_state, run_tracked_scope, Computed, SubscriberId};
//!
//! let cart = create_managed_state(json!({ "price": 10, "qty": 2 }))?;
//! cart.define("total", Computed::new(|this| {
//!     Ok((this.number("price")? * this.number("qty")?).into())
//! }))?;
//!
//! // A consumer reads under its own scope, then subscribes.
//! let handle = SubscriberId::new();
//! let total = run_tracked_scope(handle, || cart.number("total"))?;
//! let _subscription = cart.store().subscribe(handle, || println!("total changed"));
//!
//! // Re-evaluates nothing; marks `total` dirty and notifies the consumer.
//! cart.set("qty", 3)?;
//! ```

pub mod error;
pub mod graph;
pub mod reactive;
pub mod store;

pub use error::{Result, StoreError};
pub use graph::{DepKey, Key, Node, NodeId, NodeKind, Path};
pub use reactive::{
    release_scope, run_tracked_scope, untracked, Computed, ComputedId, ComputedInfo, Deferred,
    Dependency, DependencySet, MemoState, ReactiveContext, ScopeId, StoreId, SubscriberId,
};
pub use store::{
    create_managed_state, create_managed_state_with, lookup_store, project, wrap_opaque, Access,
    Managed, OpaqueRef, Proxy, RefBox, Snapshot, Store, StoreOptions, Subscription, Value, View,
};
