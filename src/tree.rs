//! Filepath: src/tree.rs
//!
//! The FAST+FAIR B+-tree.
//!
//! [`FastFairTree`] owns the root anchor and drives every operation
//! top-down: per-level linear searches descend the tree, sibling hops cover
//! ranges a concurrent split moved rightward, and structural changes
//! reported by a node ([`StoreOutcome::Split`]) are routed into the parent
//! level iteratively from here. Readers never lock; writers lock one node
//! at a time.
//!
//! # Root growth
//!
//! When the split node is the root, a fresh root routing the two halves is
//! built, persisted whole, and published with a compare-exchange on the
//! root anchor. The loser of a racing publication falls back to routing its
//! split key through the winner's root; either way the sibling chain has
//! already made every record reachable, so the parent update stays
//! best-effort.

use std::sync::atomic::{AtomicPtr, AtomicU32};

use crate::alloc::{HeapAllocator, NodeAllocator};
use crate::node_ref::NodeRef;
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD};
use crate::page::{
    DEFAULT_CARDINALITY, InternalSearch, KEY_MAX, LeafSearch, NULL_VALUE, Page, RemoveOutcome,
    StoreOutcome,
};
use crate::persist::Persist;
use crate::tracing_helpers::debug_log;

/// Concurrent ordered index over 64-bit keys and opaque 64-bit handles.
///
/// Keys are `i64` with [`KEY_MAX`] reserved; values are nonzero `u64`
/// handles the tree never interprets. All operations take `&self`.
///
/// # Example
///
/// ```
/// use fastfair::FastFairTree;
///
/// let tree: FastFairTree = FastFairTree::new();
/// tree.insert(7, 70);
/// assert_eq!(tree.search(7), Some(70));
/// tree.delete(7);
/// assert_eq!(tree.search(7), None);
/// ```
pub struct FastFairTree<A: NodeAllocator = HeapAllocator, const C: usize = DEFAULT_CARDINALITY> {
    root: AtomicPtr<Page<C>>,
    height: AtomicU32,
    persist: Persist,
    alloc: A,
}

impl<const C: usize> FastFairTree<HeapAllocator, C> {
    /// Create an empty tree on the heap with no emulated write latency.
    #[must_use]
    pub fn new() -> Self {
        Self::with_persist(Persist::new(0))
    }
}

impl<A: NodeAllocator + Default, const C: usize> FastFairTree<A, C> {
    /// Create an empty tree with the given persistence configuration.
    #[must_use]
    pub fn with_persist(persist: Persist) -> Self {
        Self::with_allocator(A::default(), persist)
    }
}

impl<A: NodeAllocator + Default, const C: usize> Default for FastFairTree<A, C> {
    fn default() -> Self {
        Self::with_persist(Persist::new(0))
    }
}

impl<A: NodeAllocator, const C: usize> FastFairTree<A, C> {
    /// Create an empty tree backed by `alloc`. The root is never null: an
    /// empty tree is one empty leaf.
    #[must_use]
    pub fn with_allocator(alloc: A, persist: Persist) -> Self {
        let root: NodeRef<C> = alloc.alloc_node(0, &persist);
        let tree = Self {
            root: AtomicPtr::new(root.as_ptr()),
            height: AtomicU32::new(1),
            persist,
            alloc,
        };
        tree.alloc
            .persist_root(tree.root_anchor_addr(), &tree.persist);
        tree
    }

    /// Current tree height; 1 for a lone leaf root.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height.load(READ_ORD)
    }

    /// The persistence configuration this tree was built with.
    #[inline]
    #[must_use]
    pub fn persist(&self) -> Persist {
        self.persist
    }

    #[inline]
    pub(crate) fn root_ref(&self) -> NodeRef<C> {
        NodeRef::from_raw(self.root.load(READ_ORD))
    }

    #[inline]
    fn root_anchor_addr(&self) -> *const u8 {
        std::ptr::from_ref(&self.root).cast::<u8>()
    }

    // ========================================================================
    //  Descent
    // ========================================================================

    /// Lock-free descent to the leaf whose range covers `key`, crossing
    /// sibling boundaries wherever a split outran its parent update.
    fn find_leaf(&self, key: i64) -> NodeRef<C> {
        let mut node: NodeRef<C> = self.root_ref();
        loop {
            // SAFETY: reachable handles stay allocated for the tree's life.
            let page: &Page<C> = unsafe { node.as_page() };
            if page.is_leaf() {
                return node;
            }
            node = match page.internal_search(key) {
                InternalSearch::Child(next) | InternalSearch::Sibling(next) => next,
            };
        }
    }

    // ========================================================================
    //  Public operations
    // ========================================================================

    /// Insert `(key, value)`; an existing key has its value overwritten.
    ///
    /// # Panics
    ///
    /// In debug builds, if `key` is the reserved [`KEY_MAX`] or `value` is
    /// the null handle.
    pub fn insert(&self, key: i64, value: u64) {
        debug_assert!(key != KEY_MAX, "KEY_MAX is the reserved empty-slot key");
        debug_assert!(value != NULL_VALUE, "the null handle cannot be stored");

        'restart: loop {
            let mut node: NodeRef<C> = self.find_leaf(key);
            loop {
                // SAFETY: see find_leaf.
                let page: &Page<C> = unsafe { node.as_page() };
                match page.store(key, value, &self.persist, &self.alloc) {
                    StoreOutcome::Inserted => return,
                    StoreOutcome::Deleted => continue 'restart,
                    StoreOutcome::Sibling(next) => node = next,
                    StoreOutcome::Split { split_key, sibling } => {
                        self.route_split(node, split_key, sibling);
                        return;
                    }
                }
            }
        }
    }

    /// Look up `key` without locking.
    #[must_use]
    pub fn search(&self, key: i64) -> Option<u64> {
        let mut node: NodeRef<C> = self.find_leaf(key);
        loop {
            // SAFETY: see find_leaf.
            let page: &Page<C> = unsafe { node.as_page() };
            match page.leaf_search(key) {
                LeafSearch::Found(value) => return Some(value),
                LeafSearch::Sibling(next) => node = next,
                LeafSearch::NotFound => return None,
            }
        }
    }

    /// Remove `key`; removing an absent key is a no-op.
    pub fn delete(&self, key: i64) {
        debug_assert!(key != KEY_MAX, "KEY_MAX is the reserved empty-slot key");

        'restart: loop {
            let mut node: NodeRef<C> = self.find_leaf(key);
            loop {
                // SAFETY: see find_leaf.
                let page: &Page<C> = unsafe { node.as_page() };
                match page.leaf_search(key) {
                    LeafSearch::Found(_) => match page.remove(key, &self.persist) {
                        RemoveOutcome::Removed(true) => return,
                        // Lost a race with another writer; take it from the top.
                        RemoveOutcome::Removed(false) | RemoveOutcome::Deleted => continue 'restart,
                    },
                    LeafSearch::Sibling(next) => node = next,
                    LeafSearch::NotFound => {
                        debug_log!(key, "delete target not present");
                        return;
                    }
                }
            }
        }
    }

    /// Append the values of every key strictly between `min` and `max`, in
    /// ascending key order. Returns how many were appended.
    pub fn scan(&self, min: i64, max: i64, out: &mut Vec<u64>) -> usize {
        let before: usize = out.len();
        let start: NodeRef<C> = self.find_leaf(min);
        Page::scan_chain(start, min, max, out);
        out.len() - before
    }

    // ========================================================================
    //  Split routing
    // ========================================================================

    /// Route a completed split into the parent level, iterating while the
    /// parent inserts themselves split.
    fn route_split(&self, mut from: NodeRef<C>, mut split_key: i64, mut sibling: NodeRef<C>) {
        loop {
            // SAFETY: split sources are live nodes of this tree.
            let level: u32 = unsafe { from.as_page() }.level() + 1;

            if from == self.root_ref() && self.try_grow_root(from, split_key, sibling) {
                return;
            }

            match self.insert_internal(split_key, sibling, level) {
                None => return,
                Some((node, key, next_sibling)) => {
                    from = node;
                    split_key = key;
                    sibling = next_sibling;
                }
            }
        }
    }

    /// Replace the root with a fresh node routing `left` and `right`.
    ///
    /// The new root is fully persisted before the 8-byte anchor store
    /// publishes it; the anchor flush follows through the allocator
    /// boundary. Returns false when another thread grew the root first (the
    /// orphaned page stays with the allocator until teardown).
    fn try_grow_root(&self, left: NodeRef<C>, key: i64, right: NodeRef<C>) -> bool {
        // SAFETY: left is a live node of this tree.
        let level: u32 = unsafe { left.as_page() }.level() + 1;
        let new_root: NodeRef<C> = self.alloc.alloc_node(level, &self.persist);
        // SAFETY: freshly allocated above.
        unsafe { new_root.as_page() }.become_root(left, key, right, &self.persist);

        match self.root.compare_exchange(
            left.as_ptr(),
            new_root.as_ptr(),
            CAS_SUCCESS,
            CAS_FAILURE,
        ) {
            Ok(_) => {
                self.alloc
                    .persist_root(self.root_anchor_addr(), &self.persist);
                self.height.fetch_add(1, CAS_SUCCESS);
                true
            }
            Err(_) => {
                debug_log!(key, "lost root publication race; rerouting split");
                false
            }
        }
    }

    /// Store `(key, child)` into the internal node covering `key` at
    /// `level`. Returns the follow-up split to route when that node itself
    /// overflowed; `None` when the routing is in place or when `level` is
    /// above the root (a racing root growth already handled it).
    fn insert_internal(
        &self,
        key: i64,
        child: NodeRef<C>,
        level: u32,
    ) -> Option<(NodeRef<C>, i64, NodeRef<C>)> {
        'restart: loop {
            let root: NodeRef<C> = self.root_ref();
            // SAFETY: the root is always a live node.
            if level > unsafe { root.as_page() }.level() {
                return None;
            }

            let mut node: NodeRef<C> = root;
            loop {
                // SAFETY: see find_leaf.
                let page: &Page<C> = unsafe { node.as_page() };
                if page.level() <= level {
                    break;
                }
                node = match page.internal_search(key) {
                    InternalSearch::Child(next) | InternalSearch::Sibling(next) => next,
                };
            }

            loop {
                // SAFETY: see find_leaf.
                let page: &Page<C> = unsafe { node.as_page() };
                match page.store(key, child.as_value(), &self.persist, &self.alloc) {
                    StoreOutcome::Inserted => return None,
                    StoreOutcome::Deleted => continue 'restart,
                    StoreOutcome::Sibling(next) => node = next,
                    StoreOutcome::Split { split_key, sibling } => {
                        return Some((node, split_key, sibling));
                    }
                }
            }
        }
    }

    // ========================================================================
    //  Diagnostics
    // ========================================================================

    /// Verify the structural invariants of a quiescent tree, panicking on
    /// the first violation. Walks every level through the sibling chain and
    /// every parent-child routing edge.
    pub fn check_invariants(&self) {
        let mut level_start: NodeRef<C> = self.root_ref();

        loop {
            // SAFETY: level starts are live reachable nodes.
            let first: &Page<C> = unsafe { level_start.as_page() };
            let expected_level: u32 = first.level();

            let mut node: NodeRef<C> = level_start;
            let mut previous_bound: Option<i64> = None;
            let mut previous_key: Option<i64> = None;

            while !node.is_null() {
                // SAFETY: chain handles are live reachable nodes.
                let page: &Page<C> = unsafe { node.as_page() };
                assert_eq!(page.level(), expected_level, "sibling chain crossed levels");
                assert!(!page.is_deleted(), "retired node reachable from the root");

                let last: i16 = page.last_index();
                assert!(last >= -1, "last_index underflow: {last}");
                let count: usize = (last + 1) as usize;
                assert!(count < C, "occupancy {count} reached cardinality {C}");

                for i in 0..count {
                    let key: i64 = page.key_at(i);
                    assert!(
                        page.value_at(i) != NULL_VALUE,
                        "null value inside the live prefix at slot {i}"
                    );
                    assert!(key < page.highest(), "key {key} at or above the node bound");
                    if let Some(prev) = previous_key {
                        assert!(prev < key, "keys out of order along the level: {prev} >= {key}");
                    }
                    previous_key = Some(key);
                }
                assert_eq!(
                    page.value_at(count),
                    NULL_VALUE,
                    "missing null terminator after slot {count}"
                );

                if let Some(bound) = previous_bound {
                    if count > 0 {
                        assert!(
                            page.key_at(0) >= bound,
                            "first key below the previous sibling's bound"
                        );
                    }
                }
                previous_bound = Some(page.highest());

                if !page.is_leaf() {
                    assert!(
                        !page.leftmost_child().is_null(),
                        "internal node without leftmost child"
                    );
                    for i in 0..count {
                        let child: NodeRef<C> = page.child_at(i);
                        // SAFETY: routed children are live reachable nodes.
                        let child_page: &Page<C> = unsafe { child.as_page() };
                        assert_eq!(child_page.level(), expected_level - 1, "child level mismatch");

                        let child_count: usize = (child_page.last_index() + 1) as usize;
                        if child_count > 0 {
                            let upper: i64 = if i + 1 < count {
                                page.key_at(i + 1)
                            } else {
                                page.highest()
                            };
                            assert!(
                                child_page.key_at(0) >= page.key_at(i),
                                "child starts below its routing key"
                            );
                            assert!(
                                child_page.key_at(child_count - 1) < upper,
                                "child reaches past its routing window"
                            );
                        }
                    }
                }

                node = page.sibling();
            }

            if first.is_leaf() {
                return;
            }
            level_start = first.leftmost_child();
        }
    }
}

impl<A: NodeAllocator, const C: usize> std::fmt::Debug for FastFairTree<A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastFairTree")
            .field("height", &self.height())
            .field("cardinality", &C)
            .field("write_latency_ns", &self.persist.write_latency_ns())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod shuttle_tests;

// ============================================================================
//  Tests
// ============================================================================
