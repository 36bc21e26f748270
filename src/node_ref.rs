//! Typed handles to allocated tree nodes.
//!
//! A [`NodeRef`] is the capability through which the tree addresses a page:
//! a copyable wrapper over the page's allocated address. Internal nodes store
//! these addresses in their value slots (the tagged layout is interpreted by
//! [`crate::page::Page`] through the node's level), and the allocator
//! boundary hands them out. A persistent-pool provider would swap the raw
//! address for a pool-relative offset behind this same type.

use std::fmt as StdFmt;

use crate::page::{DEFAULT_CARDINALITY, Page};

/// Handle to a node at a fixed cardinality.
///
/// `NodeRef` is `Copy` and nullable; the null handle terminates sibling
/// chains and marks the absent `leftmost_child` of leaves.
pub struct NodeRef<const C: usize = DEFAULT_CARDINALITY> {
    ptr: *mut Page<C>,
}

impl<const C: usize> NodeRef<C> {
    /// The null handle.
    #[inline]
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
        }
    }

    /// Wrap a raw page address.
    #[inline]
    #[must_use]
    pub const fn from_raw(ptr: *mut Page<C>) -> Self {
        Self { ptr }
    }

    /// Reconstruct a handle from a value slot of an internal node.
    #[inline]
    #[must_use]
    pub(crate) const fn from_value(value: u64) -> Self {
        Self {
            ptr: value as usize as *mut Page<C>,
        }
    }

    /// The handle's address as stored in internal-node value slots.
    #[inline]
    #[must_use]
    pub(crate) fn as_value(self) -> u64 {
        self.ptr as usize as u64
    }

    /// Whether this is the null handle.
    #[inline]
    #[must_use]
    pub fn is_null(self) -> bool {
        self.ptr.is_null()
    }

    /// The raw page pointer.
    #[inline]
    #[must_use]
    pub const fn as_ptr(self) -> *mut Page<C> {
        self.ptr
    }

    /// Borrow the page this handle addresses.
    ///
    /// # Safety
    ///
    /// The handle must be non-null and must have been produced by the
    /// allocator owning the tree. Nodes are never freed while the tree is
    /// alive (retired nodes stay allocated until teardown), so any handle
    /// reachable from a live tree satisfies this for the tree's lifetime.
    #[inline]
    #[must_use]
    pub unsafe fn as_page<'a>(self) -> &'a Page<C> {
        debug_assert!(!self.ptr.is_null(), "deref of null NodeRef");

        // SAFETY: non-null per the caller contract; the allocation outlives
        // every traversal because reclamation is deferred to tree teardown.
        unsafe { &*self.ptr }
    }
}

impl<const C: usize> Clone for NodeRef<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<const C: usize> Copy for NodeRef<C> {}

impl<const C: usize> PartialEq for NodeRef<C> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ptr, other.ptr)
    }
}

impl<const C: usize> Eq for NodeRef<C> {}

impl<const C: usize> StdFmt::Debug for NodeRef<C> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        write!(f, "NodeRef({:p})", self.ptr)
    }
}

// SAFETY: a NodeRef is an address; all access to the pointed-to page goes
// through atomics or the page's write lock.
unsafe impl<const C: usize> Send for NodeRef<C> {}
unsafe impl<const C: usize> Sync for NodeRef<C> {}
