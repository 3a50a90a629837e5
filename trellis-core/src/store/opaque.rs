//! Opaque Boxes
//!
//! A [`RefBox`] marks a value the store must not look inside. Reading the slot
//! that holds the box registers a dependency on that slot, and replacing the
//! box invalidates it, but mutating the boxed value itself is invisible to
//! the store.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Wrap `value` so the store treats it as opaque.
pub fn wrap_opaque<T: 'static>(value: T) -> RefBox<T> {
    RefBox::new(value)
}

/// A shared, untracked box.
pub struct RefBox<T: 'static>(Rc<RefCell<T>>);

impl<T: 'static> RefBox<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Mutate the boxed value. No dependent is notified.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &RefBox<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn erase(self) -> OpaqueRef {
        OpaqueRef(self.0)
    }
}

impl<T: 'static> Clone for RefBox<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for RefBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefBox").field(&self.0.borrow()).finish()
    }
}

/// A type-erased [`RefBox`], as stored in a [`Value`](super::Value).
#[derive(Clone)]
pub struct OpaqueRef(Rc<dyn Any>);

impl OpaqueRef {
    /// Recover the typed box, if it holds a `T`.
    pub fn downcast<T: 'static>(&self) -> Option<RefBox<T>> {
        Rc::clone(&self.0).downcast::<RefCell<T>>().ok().map(RefBox)
    }

    pub fn ptr_eq(&self, other: &OpaqueRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for OpaqueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpaqueRef(..)")
    }
}
