//! Scoped lifetimes for the resources buckets refer to.
//!
//! A [`Pool`] is a scope with a list of release callbacks. Files, memory maps,
//! allocators and brigades register a callback on the pool they were created
//! against, and the callback runs when the pool is cleared or its last handle
//! is dropped. Pools form a tree: clearing a pool clears its children first,
//! which is what makes [`Pool::is_ancestor_of`] meaningful for set-aside
//! decisions - anything registered on an ancestor of a pool is guaranteed to
//! outlive that pool.
//!
//! Memory is not allocated from pools here, the global allocator and the
//! [`BucketAllocator`](crate::BucketAllocator) take care of that. Only the
//! release ordering is modelled.

use core::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// A handle to a scope with release callbacks.
///
/// Handles are cheap to clone and all refer to the same scope. The scope is
/// cleared when [`Pool::clear`] is called, or when the last handle is dropped.
/// A cleared pool stays usable, new callbacks can be registered on it.
///
/// Not synchronized. A pool and everything registered on it is meant to be
/// used by one logical flow at a time.
#[derive(Clone)]
pub struct Pool(Rc<Inner>);

/// An identifier of a release callback registered on a [`Pool`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Cleanup(u64);

struct Inner {
    /// The parent scope, kept alive for as long as this one exists.
    parent: Option<Pool>,
    /// Child scopes, cleared before this one.
    children: RefCell<Vec<Weak<Inner>>>,
    /// Callbacks in registration order. They are removed before running, so
    /// a callback is free to register or cancel others.
    cleanups: RefCell<Vec<(Cleanup, Box<dyn FnOnce()>)>>,
    /// The next callback identifier.
    next_id: Cell<u64>,
}

impl Pool {
    /// Creates a new root pool.
    #[inline(always)]
    #[must_use]
    pub fn new() -> Pool {
        Pool::with_parent(None)
    }

    /// Creates a child pool, which is cleared whenever this pool is cleared.
    #[must_use]
    pub fn create_child(&self) -> Pool {
        let child = Pool::with_parent(Some(self.clone()));
        let mut children = self.0.children.borrow_mut();
        children.retain(|child| child.strong_count() != 0);
        children.push(Rc::downgrade(&child.0));
        child
    }

    fn with_parent(parent: Option<Pool>) -> Pool {
        Pool(Rc::new(Inner {
            parent,
            children: RefCell::default(),
            cleanups: RefCell::default(),
            next_id: Cell::new(0),
        }))
    }

    /// Registers `f` to run when this pool is cleared. The returned value can
    /// be used to cancel the callback or to run it early.
    pub fn register(&self, f: impl FnOnce() + 'static) -> Cleanup {
        let id = Cleanup(self.0.next_id.get());
        self.0.next_id.set(id.0 + 1);
        self.0.cleanups.borrow_mut().push((id, Box::new(f)));
        id
    }

    /// Removes a callback without running it. Returns `false` if it has
    /// already run or has been cancelled.
    pub fn cancel(&self, cleanup: Cleanup) -> bool {
        self.take(cleanup).is_some()
    }

    /// Runs a callback now instead of when the pool is cleared. Returns
    /// `false` if it has already run or has been cancelled.
    pub fn run_cleanup(&self, cleanup: Cleanup) -> bool {
        match self.take(cleanup) {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    fn take(&self, cleanup: Cleanup) -> Option<Box<dyn FnOnce()>> {
        let mut cleanups = self.0.cleanups.borrow_mut();
        let index = cleanups.iter().position(|(id, _)| *id == cleanup)?;
        Some(cleanups.remove(index).1)
    }

    /// Returns `true` if this pool is `other` or one of its ancestors, that
    /// is, this pool is guaranteed to be cleared no earlier than `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Pool) -> bool {
        let mut current = Some(other);
        while let Some(pool) = current {
            if Rc::ptr_eq(&self.0, &pool.0) {
                return true;
            }
            current = pool.0.parent.as_ref();
        }
        false
    }

    /// Returns the parent pool, if any.
    #[inline(always)]
    #[must_use]
    pub fn parent(&self) -> Option<&Pool> {
        self.0.parent.as_ref()
    }

    /// Returns `true` if both handles refer to the same pool.
    #[inline(always)]
    #[must_use]
    pub fn ptr_eq(&self, other: &Pool) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the number of callbacks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.0.cleanups.borrow().len()
    }

    /// Clears the child pools, then runs every registered callback in reverse
    /// order of registration.
    pub fn clear(&self) {
        self.0.clear();
    }

    /// Clears the pool and drops this handle.
    #[inline(always)]
    pub fn destroy(self) {
        self.clear();
    }
}

impl Inner {
    fn clear(&self) {
        let children: Vec<_> = self
            .children
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children.iter().rev() {
            child.clear();
        }
        let pending = self.cleanups.borrow().len();
        if pending != 0 {
            tracing::trace!(pending, "pool: running cleanups");
        }
        loop {
            // The borrow must end before the callback runs.
            let next = self.cleanups.borrow_mut().pop();
            match next {
                Some((_, f)) => f(),
                None => break,
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Default for Pool {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Pool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("ptr", &Rc::as_ptr(&self.0))
            .field("parent", &self.0.parent.as_ref().map(|p| Rc::as_ptr(&p.0)))
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
