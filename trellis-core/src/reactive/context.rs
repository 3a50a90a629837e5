//! Reactive Context
//!
//! The reactive context tracks which scope is currently reading. When a read
//! goes through a store wrapper, the wrapper asks the context for the active
//! scope and records the dependency into that scope's set.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a scope pushes a frame with an empty
//! dependency set; leaving it pops the frame, which restores whatever scope was
//! active before. A frame with no scope suspends tracking (see [`untracked`]).
//!
//! Component scopes publish their final set into a second thread-local map
//! keyed by [`SubscriberId`]; stores consult it when deciding whom to notify.
//! Computed scopes hand their set back to the memo engine instead.

use std::cell::RefCell;
use std::collections::HashMap;

use indexmap::IndexSet;

use super::subscriber::{Dependency, ScopeId, SubscriberId};

/// Reads recorded during one evaluation of a scope, in first-read order.
pub type DependencySet = IndexSet<Dependency>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
    static PUBLISHED: RefCell<HashMap<SubscriberId, DependencySet>> = RefCell::new(HashMap::new());
}

/// An entry in the reactive context stack.
#[derive(Debug)]
struct ContextEntry {
    /// `None` while tracking is suspended.
    scope: Option<ScopeId>,
    /// Dependencies collected during this evaluation.
    dependencies: DependencySet,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced on every exit path, including an unwinding
/// panic inside an evaluation function.
pub struct ReactiveContext {
    scope: Option<ScopeId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new tracking scope.
    ///
    /// While this guard is alive, reads through store wrappers record into the
    /// new scope and not into any enclosing one.
    pub fn enter(scope: ScopeId) -> Self {
        Self::push(Some(scope))
    }

    /// Suspend tracking until the guard is dropped.
    pub fn suspend() -> Self {
        Self::push(None)
    }

    fn push(scope: Option<ScopeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                scope: scope.clone(),
                dependencies: DependencySet::new(),
            });
        });

        Self {
            scope,
            finished: false,
        }
    }

    /// Leave the scope and take the dependencies it collected.
    pub fn finish(mut self) -> DependencySet {
        self.finished = true;
        self.pop().unwrap_or_default()
    }

    fn pop(&self) -> Option<DependencySet> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right context.
            // This helps catch bugs where guards are dropped out of order.
            popped.map(|entry| {
                debug_assert_eq!(
                    entry.scope, self.scope,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.scope, entry.scope
                );
                entry.dependencies
            })
        })
    }

    /// Check if there is an active tracking scope.
    pub fn is_active() -> bool {
        Self::current_scope().is_some()
    }

    /// Get the active scope, if any.
    pub fn current_scope() -> Option<ScopeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.scope.clone()))
    }

    /// Record a dependency in the active scope. Does nothing when no scope is
    /// active.
    pub fn track(dependency: Dependency) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.scope.is_some() {
                    entry.dependencies.insert(dependency);
                }
            }
        });
    }

    /// Get the dependencies collected so far in the active scope.
    pub fn dependencies() -> DependencySet {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }

    /// Replace the published set for `handle`.
    pub fn publish(handle: SubscriberId, dependencies: DependencySet) {
        PUBLISHED.with(|published| {
            published.borrow_mut().insert(handle, dependencies);
        });
    }

    /// Add to the published set for `handle` without discarding what is there.
    pub fn append_published(handle: SubscriberId, dependencies: DependencySet) {
        PUBLISHED.with(|published| {
            published
                .borrow_mut()
                .entry(handle)
                .or_default()
                .extend(dependencies);
        });
    }

    /// The set published by the most recent run of `handle`'s scope.
    pub fn published(handle: SubscriberId) -> Option<DependencySet> {
        PUBLISHED.with(|published| published.borrow().get(&handle).cloned())
    }

    /// Inspect the published set for `handle` without cloning it.
    pub fn with_published<R>(handle: SubscriberId, f: impl FnOnce(Option<&DependencySet>) -> R) -> R {
        PUBLISHED.with(|published| f(published.borrow().get(&handle)))
    }

    /// Forget everything published for `handle`.
    pub fn release(handle: SubscriberId) {
        // The map may already be gone during thread teardown.
        let _ = PUBLISHED.try_with(|published| {
            published.borrow_mut().remove(&handle);
        });
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Run `f` as the scope `handle`, then publish what it read.
///
/// This is the extension point a view-layer binding uses: whatever `f` reads
/// through store wrappers becomes `handle`'s dependency set, replacing the set
/// from the previous run.
pub fn run_tracked_scope<R>(handle: SubscriberId, f: impl FnOnce() -> R) -> R {
    let (result, dependencies) = run_tracked(ScopeId::Component(handle), f);
    ReactiveContext::publish(handle, dependencies);
    result
}

/// Run `f` as `scope` and hand back the dependencies it collected.
pub(crate) fn run_tracked<R>(scope: ScopeId, f: impl FnOnce() -> R) -> (R, DependencySet) {
    let ctx = ReactiveContext::enter(scope);
    let result = f();
    (result, ctx.finish())
}

/// Run `f` with tracking suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::suspend();
    f()
}

/// Drop the published set for `handle`. A binding calls this when its
/// consumer goes away.
pub fn release_scope(handle: SubscriberId) {
    ReactiveContext::release(handle);
}
