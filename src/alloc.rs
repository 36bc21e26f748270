//! Allocator boundary for tree nodes.
//!
//! The tree consumes two capabilities from its pool provider: allocate a
//! cache-line-aligned, constructor-zeroed, fully persisted page, and persist
//! the 8-byte root anchor. [`HeapAllocator`] is the volatile implementation;
//! a persistent-memory pool would implement the same trait with
//! pool-relative placement behind the [`NodeRef`] handle.
//!
//! # Reclamation
//!
//! There is none while the tree is alive: retired nodes are only marked, so
//! every handle an in-flight reader holds stays valid. The allocator keeps a
//! type-erased record of every allocation and releases them all when it
//! drops with the tree.

use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::node_ref::NodeRef;
use crate::page::Page;
use crate::persist::Persist;

/// Node allocation and root anchoring, as consumed by the tree.
///
/// Implementations must be `Send + Sync`; allocation happens inside write
/// paths running on any thread.
pub trait NodeAllocator: Send + Sync {
    /// Allocate one page at the given level.
    ///
    /// The returned node is cache-line aligned, constructor-initialized
    /// (all keys at the empty sentinel, all values null) and fully flushed,
    /// so publishing a pointer to it is the only remaining step.
    ///
    /// Allocation failure is fatal; this never returns null.
    fn alloc_node<const C: usize>(&self, level: u32, persist: &Persist) -> NodeRef<C>;

    /// Persist the 8-byte root anchor after the tree stored it.
    fn persist_root(&self, root_slot: *const u8, persist: &Persist) {
        persist.flush_range(root_slot, size_of::<*const u8>());
    }
}

/// Volatile allocator: aligned heap pages, tracked for teardown.
///
/// Allocations are recorded type-erased (pointer plus layout) behind a
/// [`parking_lot::Mutex`] so concurrent write paths can allocate freely;
/// everything is released when the allocator drops with its tree.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    allocations: Mutex<Vec<(NonNull<u8>, Layout)>>,
}

impl HeapAllocator {
    /// Create an allocator with no outstanding pages.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocations: Mutex::new(Vec::new()),
        }
    }

    /// Number of pages currently allocated.
    #[must_use]
    pub fn allocated_nodes(&self) -> usize {
        self.allocations.lock().len()
    }
}

impl NodeAllocator for HeapAllocator {
    fn alloc_node<const C: usize>(&self, level: u32, persist: &Persist) -> NodeRef<C> {
        let layout: Layout = Layout::new::<Page<C>>();

        // SAFETY: Page has non-zero size and cache-line alignment.
        let raw: *mut u8 = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };

        let page: *mut Page<C> = ptr.as_ptr().cast();
        // SAFETY: freshly allocated, properly aligned, sized for Page<C>.
        unsafe {
            page.write(Page::new(level));
        }
        persist.flush_range(ptr.as_ptr(), size_of::<Page<C>>());

        self.allocations.lock().push((ptr, layout));
        NodeRef::from_raw(page)
    }
}

impl Drop for HeapAllocator {
    fn drop(&mut self) {
        // Pages hold no owned resources beyond their allocation (atomics
        // and a raw-byte lock), so releasing the memory is the whole drop.
        for (ptr, layout) in self.allocations.get_mut().drain(..) {
            // SAFETY: recorded at allocation with this exact layout.
            unsafe {
                dealloc(ptr.as_ptr(), layout);
            }
        }
    }
}

// SAFETY: the tracking list is behind a Mutex; the raw pointers it holds
// are only touched again in Drop.
unsafe impl Send for HeapAllocator {}
unsafe impl Sync for HeapAllocator {}
