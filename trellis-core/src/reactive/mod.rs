//! Reactive Primitives
//!
//! This module implements dependency tracking for managed state: tracking
//! scopes, memoized computeds, and deferred reads.
//!
//! # Concepts
//!
//! ## Scopes
//!
//! A scope is "who is reading". It is either a component, an external consumer
//! identified by a [`SubscriberId`], or a computed, identified by its store and
//! accessor path. Exactly one scope is active at a time; scopes nest and
//! restore on exit.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived accessor stored in a record slot. It is
//! evaluated on first read, cached, marked dirty by writes to anything it
//! read, and re-evaluated only when read again.
//!
//! ## Deferred reads
//!
//! A leaf read with no scope active returns a [`Deferred`] handle, which
//! resolves (and records) under whatever scope is active when it is used.
//!
//! # Implementation Notes
//!
//! Tracking uses a thread-local stack. When a wrapper is read, it checks for
//! an active scope and, if there is one, records the read into it.

pub(crate) mod context;
mod deferred;
pub(crate) mod memo;
mod subscriber;

pub use context::{release_scope, run_tracked_scope, untracked, DependencySet, ReactiveContext};
pub use deferred::Deferred;
pub use memo::{Computed, ComputedInfo, MemoState};
pub use subscriber::{ComputedId, Dependency, ScopeId, StoreId, Subscriber, SubscriberId};
