//! Filepath: src/page.rs
//!
//! Tree node (page) with failure-atomic in-place mutation.
//!
//! A page is one fixed-size unit of persistent memory: a one-cache-line
//! header followed by a sorted record array. Writers mutate records in place
//! with single 8-byte stores, ordered so that a half-written slot always
//! duplicates its neighbor's value, and flush each completed cache line, so
//! that a crash at any store boundary leaves a state readers (and recovery)
//! can interpret. Readers take no locks; they
//! snapshot [`switch_counter`], scan in the direction its parity implies,
//! skip slots whose value duplicates their predecessor, and retry if the
//! counter moved.
//!
//! # Record interpretation
//!
//! The record array is the same for every level; the `value` word is read
//! through methods that know the node's level: opaque handle in a leaf,
//! child-node address in an internal node. A null (zero) value terminates
//! the live prefix.
//!
//! [`switch_counter`]: Page::switch_counter

use std::fmt as StdFmt;
use std::sync::atomic::{AtomicI16, AtomicI64, AtomicPtr, AtomicU8, AtomicU64};

use parking_lot::{Mutex, MutexGuard};

use crate::alloc::NodeAllocator;
use crate::node_ref::NodeRef;
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};
use crate::persist::{CACHE_LINE_SIZE, Persist};

/// Nominal page size in bytes.
pub const PAGE_SIZE: usize = 512;

/// Header footprint; one cache line.
pub const HEADER_SIZE: usize = 64;

/// Record footprint: 8-byte key plus 8-byte value.
pub const ENTRY_SIZE: usize = 16;

/// Records per page at the nominal page size.
pub const DEFAULT_CARDINALITY: usize = (PAGE_SIZE - HEADER_SIZE) / ENTRY_SIZE;

/// Reserved key marking an empty record slot.
pub const KEY_MAX: i64 = i64::MAX;

/// Null value handle; terminates the live record prefix.
pub const NULL_VALUE: u64 = 0;

/// Writer shift direction encoded in the counter parity: even means the
/// last writer shifted rightward (insert) and readers scan left-to-right.
#[inline]
#[must_use]
pub(crate) const fn is_forward(counter: u8) -> bool {
    counter % 2 == 0
}

// ============================================================================
//  Layout
// ============================================================================

/// One record slot. Both words are single aligned 8-byte atomics; the value
/// store is the commit point of every slot mutation.
#[repr(C)]
struct Entry {
    key: AtomicI64,
    value: AtomicU64,
}

/// Page header, padded to exactly one cache line.
#[repr(C, align(64))]
struct Header<const C: usize> {
    /// Child for keys below `records[0].key`; null in leaves.
    leftmost_child: AtomicPtr<Page<C>>,

    /// Right neighbor at the same level; null on the rightmost node.
    sibling: AtomicPtr<Page<C>>,

    /// Exclusive upper bound routed to this node. Readers follow the
    /// sibling chain when the probe key is not below this bound.
    highest: AtomicI64,

    /// 0 for leaves, increasing toward the root. Immutable.
    level: u32,

    /// Version counter; parity encodes the writer shift direction.
    switch_counter: AtomicU8,

    /// Set when the node's contents have been merged away; a retired node
    /// never accepts new writes.
    is_deleted: AtomicU8,

    /// Index of the last occupied record, -1 when empty.
    last_index: AtomicI16,

    /// Per-node write lock. Readers never take it.
    lock: Mutex<()>,
}

impl<const C: usize> Header<C> {
    fn new(level: u32) -> Self {
        Self {
            leftmost_child: AtomicPtr::new(std::ptr::null_mut()),
            sibling: AtomicPtr::new(std::ptr::null_mut()),
            highest: AtomicI64::new(KEY_MAX),
            level,
            switch_counter: AtomicU8::new(0),
            is_deleted: AtomicU8::new(0),
            last_index: AtomicI16::new(-1),
            lock: Mutex::new(()),
        }
    }
}

/// A tree node: header plus sorted record array, cache-line aligned.
#[repr(C, align(64))]
pub struct Page<const C: usize = DEFAULT_CARDINALITY> {
    hdr: Header<C>,
    records: [Entry; C],
}

const _: () = assert!(size_of::<Page<DEFAULT_CARDINALITY>>() == PAGE_SIZE);

// ============================================================================
//  Operation results
// ============================================================================

/// Post-condition of [`Page::store`], driven by the tree.
#[derive(Debug)]
pub(crate) enum StoreOutcome<const C: usize> {
    /// The record is in place (or an existing key was overwritten).
    Inserted,

    /// The node was retired concurrently; restart from the root.
    Deleted,

    /// The key is routed past this node; retry the store there.
    Sibling(NodeRef<C>),

    /// The node overflowed and split; the parent level needs
    /// `(split_key, sibling)` routed in.
    Split { split_key: i64, sibling: NodeRef<C> },
}

/// Result of [`Page::remove`].
#[derive(Debug)]
pub(crate) enum RemoveOutcome {
    /// Whether a record was removed.
    Removed(bool),

    /// The node was retired concurrently; restart from the root.
    Deleted,
}

/// Result of a lock-free leaf probe.
#[derive(Debug)]
pub(crate) enum LeafSearch<const C: usize> {
    Found(u64),
    /// The key is at or past this node's bound; continue at the sibling.
    Sibling(NodeRef<C>),
    NotFound,
}

/// Result of a lock-free internal probe: the node to visit next.
#[derive(Debug)]
pub(crate) enum InternalSearch<const C: usize> {
    /// Descend into this child.
    Child(NodeRef<C>),
    /// Same-level hop; the key is routed past this node.
    Sibling(NodeRef<C>),
}

// ============================================================================
//  Construction and header access
// ============================================================================

impl<const C: usize> Page<C> {
    const LAYOUT_CHECK: () = {
        assert!(C >= 3, "page cardinality must be at least 3");
        assert!(size_of::<Header<C>>() == HEADER_SIZE);
        // Alignment may pad the tail for off-nominal cardinalities, but the
        // records always start right after the one-line header.
        assert!(size_of::<Page<C>>() >= HEADER_SIZE + C * ENTRY_SIZE);
        assert!(align_of::<Page<C>>() == CACHE_LINE_SIZE);
    };

    /// Create an empty page: all keys at the sentinel, all values null.
    #[must_use]
    pub fn new(level: u32) -> Self {
        let () = Self::LAYOUT_CHECK;

        Self {
            hdr: Header::new(level),
            records: std::array::from_fn(|_| Entry {
                key: AtomicI64::new(KEY_MAX),
                value: AtomicU64::new(NULL_VALUE),
            }),
        }
    }

    /// Level of this node; 0 for leaves.
    #[inline]
    #[must_use]
    pub fn level(&self) -> u32 {
        self.hdr.level
    }

    /// Whether this node is a leaf.
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.hdr.level == 0
    }

    #[inline]
    pub(crate) fn sibling(&self) -> NodeRef<C> {
        NodeRef::from_raw(self.hdr.sibling.load(READ_ORD))
    }

    #[inline]
    pub(crate) fn leftmost_child(&self) -> NodeRef<C> {
        NodeRef::from_raw(self.hdr.leftmost_child.load(READ_ORD))
    }

    #[inline]
    pub(crate) fn highest(&self) -> i64 {
        self.hdr.highest.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn last_index(&self) -> i16 {
        self.hdr.last_index.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn is_deleted(&self) -> bool {
        self.hdr.is_deleted.load(READ_ORD) != 0
    }

    #[inline]
    pub(crate) fn switch_counter(&self) -> u8 {
        self.hdr.switch_counter.load(READ_ORD)
    }

    /// Acquire the node's write lock.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.hdr.lock.lock()
    }

    /// Retire the node: it never accepts writes again. The allocation stays
    /// live until tree teardown so in-flight readers stay safe.
    pub(crate) fn retire(&self, persist: &Persist) {
        self.hdr.is_deleted.store(1, WRITE_ORD);
        persist.flush(&self.hdr.is_deleted);
    }

    #[inline]
    pub(crate) fn key_at(&self, i: usize) -> i64 {
        self.records[i].key.load(READ_ORD)
    }

    #[inline]
    pub(crate) fn value_at(&self, i: usize) -> u64 {
        self.records[i].value.load(READ_ORD)
    }

    /// Child handle stored in slot `i`. Only meaningful on internal nodes.
    #[inline]
    pub(crate) fn child_at(&self, i: usize) -> NodeRef<C> {
        debug_assert!(!self.is_leaf());
        NodeRef::from_value(self.value_at(i))
    }

    #[inline]
    fn leftmost_value(&self) -> u64 {
        NodeRef::from_raw(self.hdr.leftmost_child.load(READ_ORD)).as_value()
    }

    #[inline]
    fn set_key(&self, i: usize, key: i64) {
        self.records[i].key.store(key, WRITE_ORD);
    }

    #[inline]
    fn set_value(&self, i: usize, value: u64) {
        self.records[i].value.store(value, WRITE_ORD);
    }

    #[inline]
    fn entry_addr(&self, i: usize) -> *const u8 {
        std::ptr::from_ref(&self.records[i]).cast::<u8>()
    }

    // ========================================================================
    //  Switch counter discipline
    // ========================================================================

    /// Enter rightward-shift (insert) mode: counter parity becomes even.
    fn enter_insert_direction(&self) {
        let counter: u8 = self.hdr.switch_counter.load(RELAXED);
        if !is_forward(counter) {
            self.hdr
                .switch_counter
                .store(counter.wrapping_add(1), WRITE_ORD);
        }
    }

    /// Enter leftward-shift (delete) mode: counter parity becomes odd.
    fn enter_delete_direction(&self) {
        let counter: u8 = self.hdr.switch_counter.load(RELAXED);
        if is_forward(counter) {
            self.hdr
                .switch_counter
                .store(counter.wrapping_add(1), WRITE_ORD);
        }
    }

    /// Advance the counter so every in-flight reader revalidates, keeping
    /// the parity even. Used when a split truncates the record array.
    fn bump_for_split(&self) {
        let counter: u8 = self.hdr.switch_counter.load(RELAXED);
        let step: u8 = if is_forward(counter) { 2 } else { 1 };
        self.hdr
            .switch_counter
            .store(counter.wrapping_add(step), WRITE_ORD);
    }

    /// Flush the cache line of record `i` when the write at `i` completed a
    /// line or crossed a line boundary.
    fn flush_record_boundary(&self, i: usize, persist: &Persist) {
        let remainder: usize = self.entry_addr(i) as usize % CACHE_LINE_SIZE;
        let do_flush: bool = remainder == 0
            || ((remainder + ENTRY_SIZE) / CACHE_LINE_SIZE == 1
                && (remainder + ENTRY_SIZE) % CACHE_LINE_SIZE != 0);

        if do_flush {
            persist.flush_range(self.entry_addr(i), CACHE_LINE_SIZE);
        }
    }

    // ========================================================================
    //  Occupancy
    // ========================================================================

    /// Number of live records, read optimistically.
    ///
    /// Walks from `last_index` in the direction the counter parity implies
    /// until the null terminator, retrying if a writer passed through.
    pub(crate) fn count(&self) -> usize {
        loop {
            let previous: u8 = self.hdr.switch_counter.load(READ_ORD);
            let mut count: isize = isize::from(self.hdr.last_index.load(READ_ORD)) + 1;

            while count >= 0 && self.value_at(count.unsigned_abs()) != NULL_VALUE {
                if is_forward(previous) {
                    count += 1;
                } else {
                    count -= 1;
                }
            }

            if count < 0 {
                count = 0;
                while self.value_at(count.unsigned_abs()) != NULL_VALUE {
                    count += 1;
                }
            }

            if self.hdr.switch_counter.load(READ_ORD) == previous {
                return count.unsigned_abs();
            }
        }
    }

    // ========================================================================
    //  FAST insert
    // ========================================================================

    /// Shift-insert `(key, value)` into the sorted array. The caller holds
    /// the write lock and has ensured the node is not full.
    ///
    /// Store order is what keeps readers safe: a rightward-shifted slot
    /// copies its value before its key, and the placement slot duplicates
    /// its predecessor's value before the key and the committing value
    /// store. Either way a half-written slot always carries its left
    /// neighbor's value, which is exactly what readers skip. With `flush`
    /// unset no cache line is forced out; used when filling a node that is
    /// not yet reachable.
    fn insert_key(&self, key: i64, value: u64, num_entries: &mut usize, flush: bool, persist: &Persist) {
        self.enter_insert_direction();

        if *num_entries == 0 {
            // Empty page: place the record and its terminator directly.
            self.set_key(0, key);
            self.set_value(0, value);
            self.set_value(1, NULL_VALUE);

            if flush {
                persist.flush_range(self.entry_addr(0), 2 * ENTRY_SIZE);
            }
        } else {
            // Extend the terminator past the future last slot.
            let tail: usize = *num_entries;
            self.set_value(tail + 1, self.value_at(tail));
            if flush && std::ptr::from_ref(&self.records[tail + 1].value) as usize % CACHE_LINE_SIZE == 0 {
                persist.flush(&self.records[tail + 1].value);
            }

            let mut inserted: bool = false;
            let mut i: isize = tail as isize - 1;
            while i >= 0 {
                let slot: usize = i.unsigned_abs();
                if key < self.key_at(slot) {
                    // Shift right: the value copy lands first, so until the
                    // key write completes the slot it reads as a duplicate
                    // of its left neighbor and is skipped.
                    self.set_value(slot + 1, self.value_at(slot));
                    self.set_key(slot + 1, self.key_at(slot));

                    if flush {
                        self.flush_record_boundary(slot + 1, persist);
                    }
                } else {
                    // Duplicate the predecessor's value so the slot reads as
                    // mid-shift until the final value store commits it.
                    self.set_value(slot + 1, self.value_at(slot));
                    self.set_key(slot + 1, key);
                    self.set_value(slot + 1, value);

                    if flush {
                        persist.flush_range(self.entry_addr(slot + 1), ENTRY_SIZE);
                    }
                    inserted = true;
                    break;
                }
                i -= 1;
            }

            if !inserted {
                // Smallest key in the node: slot 0, gap marked against the
                // leftmost child (null in leaves).
                self.set_value(0, self.leftmost_value());
                self.set_key(0, key);
                self.set_value(0, value);

                if flush {
                    persist.flush_range(self.entry_addr(0), ENTRY_SIZE);
                }
            }
        }

        self.hdr.last_index.store(*num_entries as i16, WRITE_ORD);
        if flush {
            persist.flush(&self.hdr.last_index);
        }
        *num_entries += 1;
    }

    /// Locate an existing key under the write lock.
    fn find_live(&self, key: i64) -> Option<usize> {
        let mut i: usize = 0;
        while self.value_at(i) != NULL_VALUE {
            if self.key_at(i) == key {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Insert `(key, value)`, splitting on overflow.
    ///
    /// The node decides its own fate under its write lock and reports the
    /// post-condition; the tree drives sibling hand-off and parent routing.
    /// On a leaf, storing an existing key overwrites its value in place with
    /// a single flushed 8-byte store.
    pub(crate) fn store<A: NodeAllocator>(
        &self,
        key: i64,
        value: u64,
        persist: &Persist,
        alloc: &A,
    ) -> StoreOutcome<C> {
        let guard = self.lock();

        if self.is_deleted() {
            return StoreOutcome::Deleted;
        }

        // A concurrent split may have moved the key range rightward between
        // the caller's descent and this lock acquisition.
        let sibling = self.sibling();
        if !sibling.is_null() && key >= self.highest() {
            drop(guard);
            return StoreOutcome::Sibling(sibling);
        }

        if self.is_leaf() {
            if let Some(slot) = self.find_live(key) {
                self.set_value(slot, value);
                persist.flush(&self.records[slot].value);
                return StoreOutcome::Inserted;
            }
        }

        let mut num_entries: usize = self.count();

        if num_entries < C - 1 {
            self.insert_key(key, value, &mut num_entries, true, persist);
            return StoreOutcome::Inserted;
        }

        self.split_and_store(key, value, num_entries, persist, alloc)
    }

    // ========================================================================
    //  FAIR split
    // ========================================================================

    /// Split this full node and place the pending record on the proper side.
    /// Write lock held; `num_entries == C - 1`.
    ///
    /// Publication order is what makes the split failure-atomic: the fully
    /// persisted sibling becomes reachable through the sibling chain before
    /// this node is truncated, and the parent update that follows is
    /// best-effort because readers can always recover the route through
    /// `highest` and the chain.
    fn split_and_store<A: NodeAllocator>(
        &self,
        key: i64,
        value: u64,
        mut num_entries: usize,
        persist: &Persist,
        alloc: &A,
    ) -> StoreOutcome<C> {
        let sibling_ref: NodeRef<C> = alloc.alloc_node::<C>(self.hdr.level, persist);
        // SAFETY: freshly allocated by the tree's allocator, non-null.
        let sibling: &Page<C> = unsafe { sibling_ref.as_page() };

        // Writers arriving through the chain serialize against the
        // migration; taken before publication so it is uncontended here.
        let sibling_guard = sibling.lock();

        let split_slot: usize = num_entries.div_ceil(2);
        let split_key: i64 = self.key_at(split_slot);

        // Migrate the upper half. The sibling is unreachable, so no
        // intra-sibling flushing; one full-page flush below persists it.
        let mut sibling_cnt: usize = 0;
        if self.is_leaf() {
            for i in split_slot..num_entries {
                sibling.insert_key(self.key_at(i), self.value_at(i), &mut sibling_cnt, false, persist);
            }
        } else {
            for i in (split_slot + 1)..num_entries {
                sibling.insert_key(self.key_at(i), self.value_at(i), &mut sibling_cnt, false, persist);
            }
            sibling
                .hdr
                .leftmost_child
                .store(self.child_at(split_slot).as_ptr(), WRITE_ORD);
        }
        sibling.hdr.highest.store(self.highest(), WRITE_ORD);
        sibling
            .hdr
            .sibling
            .store(self.hdr.sibling.load(READ_ORD), WRITE_ORD);
        persist.flush(sibling);

        // Publish: one header line carries both the chain link and the
        // narrowed bound, so a single flush makes them durable together.
        self.hdr.sibling.store(sibling_ref.as_ptr(), WRITE_ORD);
        self.hdr.highest.store(split_key, WRITE_ORD);
        persist.flush(&self.hdr);

        // Force in-flight readers to revalidate before the truncation.
        self.bump_for_split();

        self.set_value(split_slot, NULL_VALUE);
        persist.flush_range(self.entry_addr(split_slot), ENTRY_SIZE);

        self.hdr.last_index.store(split_slot as i16 - 1, WRITE_ORD);
        persist.flush(&self.hdr.last_index);

        num_entries = split_slot;

        // Place the pending record relative to the captured split key.
        if key < split_key {
            self.insert_key(key, value, &mut num_entries, true, persist);
        } else {
            sibling.insert_key(key, value, &mut sibling_cnt, true, persist);
        }

        drop(sibling_guard);
        StoreOutcome::Split {
            split_key,
            sibling: sibling_ref,
        }
    }

    /// Turn a fresh page into a root routing two children, then persist it
    /// whole. The tree publishes the root pointer afterwards.
    pub(crate) fn become_root(&self, left: NodeRef<C>, key: i64, right: NodeRef<C>, persist: &Persist) {
        self.hdr.leftmost_child.store(left.as_ptr(), WRITE_ORD);
        self.set_key(0, key);
        self.set_value(0, right.as_value());
        self.set_value(1, NULL_VALUE);
        self.hdr.last_index.store(0, WRITE_ORD);

        persist.flush(self);
    }

    // ========================================================================
    //  Delete shift
    // ========================================================================

    /// Shift-delete `key`. Write lock held. Returns whether it was present.
    ///
    /// The key is located before the counter parity changes, so removing an
    /// absent key perturbs nothing. The linearization point is the single
    /// value store that duplicates the predecessor's value into the target
    /// slot; from then on readers treat the slot as skipped.
    fn remove_key(&self, key: i64, persist: &Persist) -> bool {
        let Some(target) = self.find_live(key) else {
            return false;
        };

        self.enter_delete_direction();

        let predecessor: u64 = if target == 0 {
            self.leftmost_value()
        } else {
            self.value_at(target - 1)
        };
        self.set_value(target, predecessor);

        let mut i: usize = target;
        loop {
            let next_key: i64 = self.key_at(i + 1);
            let next_value: u64 = self.value_at(i + 1);
            self.set_key(i, next_key);
            self.set_value(i, next_value);

            self.flush_record_boundary(i, persist);

            if next_value == NULL_VALUE {
                break;
            }
            i += 1;
        }

        let last: i16 = self.hdr.last_index.load(RELAXED);
        self.hdr.last_index.store(last - 1, WRITE_ORD);
        persist.flush(&self.hdr.last_index);

        true
    }

    /// Remove `key` from this node under its write lock.
    pub(crate) fn remove(&self, key: i64, persist: &Persist) -> RemoveOutcome {
        let _guard = self.lock();

        if self.is_deleted() {
            return RemoveOutcome::Deleted;
        }

        RemoveOutcome::Removed(self.remove_key(key, persist))
    }

    // ========================================================================
    //  Lock-free search
    // ========================================================================

    /// Probe a leaf for `key` without locking.
    ///
    /// The key is re-read after its value so a torn slot (key written,
    /// value still the shifted duplicate) is never reported, and a slot
    /// whose value equals its predecessor's is skipped as mid-shift.
    pub(crate) fn leaf_search(&self, key: i64) -> LeafSearch<C> {
        debug_assert!(self.is_leaf());

        let mut ret: u64;
        loop {
            let previous: u8 = self.hdr.switch_counter.load(READ_ORD);
            ret = NULL_VALUE;

            if is_forward(previous) {
                let k: i64 = self.key_at(0);
                if k == key {
                    let candidate: u64 = self.value_at(0);
                    if candidate != NULL_VALUE && self.key_at(0) == k {
                        ret = candidate;
                    }
                }

                if ret == NULL_VALUE {
                    let mut i: usize = 1;
                    while self.value_at(i) != NULL_VALUE {
                        let k: i64 = self.key_at(i);
                        if k == key {
                            let candidate: u64 = self.value_at(i);
                            if self.value_at(i - 1) != candidate && self.key_at(i) == k {
                                ret = candidate;
                                break;
                            }
                        }
                        i += 1;
                    }
                }
            } else {
                let mut i: isize = self.count() as isize - 1;
                while i > 0 {
                    let slot: usize = i.unsigned_abs();
                    let k: i64 = self.key_at(slot);
                    if k == key {
                        let candidate: u64 = self.value_at(slot);
                        if self.value_at(slot - 1) != candidate
                            && candidate != NULL_VALUE
                            && self.key_at(slot) == k
                        {
                            ret = candidate;
                            break;
                        }
                    }
                    i -= 1;
                }

                if ret == NULL_VALUE {
                    let k: i64 = self.key_at(0);
                    if k == key {
                        let candidate: u64 = self.value_at(0);
                        if candidate != NULL_VALUE && self.key_at(0) == k {
                            ret = candidate;
                        }
                    }
                }
            }

            if self.hdr.switch_counter.load(READ_ORD) == previous {
                break;
            }
        }

        if ret != NULL_VALUE {
            return LeafSearch::Found(ret);
        }

        let sibling = self.sibling();
        if !sibling.is_null() && key >= self.highest() {
            return LeafSearch::Sibling(sibling);
        }

        LeafSearch::NotFound
    }

    /// Route `key` through an internal node without locking: the child to
    /// descend into, or the sibling when the key lies past this node.
    pub(crate) fn internal_search(&self, key: i64) -> InternalSearch<C> {
        debug_assert!(!self.is_leaf());

        let mut ret: u64;
        loop {
            let previous: u8 = self.hdr.switch_counter.load(READ_ORD);
            ret = NULL_VALUE;

            if is_forward(previous) {
                'forward: {
                    if key < self.key_at(0) {
                        let leftmost: u64 = self.leftmost_value();
                        if leftmost != self.value_at(0) {
                            ret = leftmost;
                            break 'forward;
                        }
                        // Slot 0 is mid-shift; the scan below resolves to
                        // the duplicated child.
                    }

                    let mut i: usize = 1;
                    while self.value_at(i) != NULL_VALUE {
                        if key < self.key_at(i) {
                            let candidate: u64 = self.value_at(i - 1);
                            if candidate != self.value_at(i) {
                                ret = candidate;
                                break 'forward;
                            }
                        }
                        i += 1;
                    }

                    if ret == NULL_VALUE {
                        ret = self.value_at(i - 1);
                    }
                }
            } else {
                let mut i: isize = self.count() as isize - 1;
                while i >= 0 {
                    let slot: usize = i.unsigned_abs();
                    if key >= self.key_at(slot) {
                        let candidate: u64 = self.value_at(slot);
                        let predecessor: u64 = if slot == 0 {
                            self.leftmost_value()
                        } else {
                            self.value_at(slot - 1)
                        };
                        if predecessor != candidate {
                            ret = candidate;
                            break;
                        }
                    }
                    i -= 1;
                }
            }

            if self.hdr.switch_counter.load(READ_ORD) == previous {
                break;
            }
        }

        let sibling = self.sibling();
        if !sibling.is_null() && key >= self.highest() {
            return InternalSearch::Sibling(sibling);
        }

        if ret == NULL_VALUE {
            InternalSearch::Child(self.leftmost_child())
        } else {
            InternalSearch::Child(NodeRef::from_value(ret))
        }
    }

    // ========================================================================
    //  Range scan
    // ========================================================================

    /// Append every value with `min < key < max`, ascending, starting at
    /// `start` and following the sibling chain. Lock-free; each node is
    /// scanned under the counter protocol with output rollback on retry.
    ///
    /// The lower bound ratchets up to the largest key taken from each
    /// node, so a record a racing split migrates rightward between one
    /// node's validation and the sibling hop is never collected twice.
    pub(crate) fn scan_chain(start: NodeRef<C>, min: i64, max: i64, out: &mut Vec<u64>) {
        let mut current: NodeRef<C> = start;
        let mut lower: i64 = min;

        while !current.is_null() {
            // SAFETY: chain handles come from live pages of this tree.
            let node: &Page<C> = unsafe { current.as_page() };
            let base: usize = out.len();
            let mut past_max: bool;
            let mut node_max: i64;

            loop {
                let previous: u8 = node.hdr.switch_counter.load(READ_ORD);
                out.truncate(base);
                past_max = false;
                node_max = lower;

                // The empty-slot sentinel key never ends the scan: an
                // emptied leaf or a half-shifted slot reads as KEY_MAX.
                if is_forward(previous) {
                    let k: i64 = node.key_at(0);
                    if k > lower {
                        if k < max {
                            let v: u64 = node.value_at(0);
                            if v != NULL_VALUE && node.key_at(0) == k {
                                out.push(v);
                                node_max = node_max.max(k);
                            }
                        } else if k != KEY_MAX {
                            past_max = true;
                        }
                    }

                    if !past_max {
                        let mut i: usize = 1;
                        while node.value_at(i) != NULL_VALUE {
                            let k: i64 = node.key_at(i);
                            if k > lower {
                                if k < max {
                                    let v: u64 = node.value_at(i);
                                    if v != node.value_at(i - 1) && node.key_at(i) == k {
                                        out.push(v);
                                        node_max = node_max.max(k);
                                    }
                                } else if k != KEY_MAX {
                                    past_max = true;
                                    break;
                                }
                            }
                            i += 1;
                        }
                    }
                } else {
                    // Reverse parity: visit descending, reverse once stable.
                    let mut i: isize = node.count() as isize - 1;
                    while i > 0 {
                        let slot: usize = i.unsigned_abs();
                        let k: i64 = node.key_at(slot);
                        if k > lower {
                            if k < max {
                                let v: u64 = node.value_at(slot);
                                if v != node.value_at(slot - 1) && node.key_at(slot) == k {
                                    out.push(v);
                                    node_max = node_max.max(k);
                                }
                            } else if k != KEY_MAX {
                                past_max = true;
                            }
                        }
                        i -= 1;
                    }

                    let k: i64 = node.key_at(0);
                    if k > lower {
                        if k < max {
                            let v: u64 = node.value_at(0);
                            if v != NULL_VALUE && node.key_at(0) == k {
                                out.push(v);
                                node_max = node_max.max(k);
                            }
                        } else if k != KEY_MAX {
                            past_max = true;
                        }
                    }
                }

                if node.hdr.switch_counter.load(READ_ORD) == previous {
                    if !is_forward(previous) {
                        // The stable snapshot was collected descending.
                        out[base..].reverse();
                    }
                    break;
                }
            }

            if past_max {
                return;
            }
            lower = node_max;
            current = node.sibling();
        }
    }
}

impl<const C: usize> StdFmt::Debug for Page<C> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Page")
            .field("level", &self.hdr.level)
            .field("last_index", &self.last_index())
            .field("switch_counter", &self.switch_counter())
            .field("forward", &is_forward(self.switch_counter()))
            .field("is_deleted", &self.is_deleted())
            .field("highest", &self.highest())
            .field("has_sibling", &(!self.sibling().is_null()))
            .finish_non_exhaustive()
    }
}

// SAFETY: every mutable field is an atomic or the embedded lock; shared
// access is exactly the read protocol this module implements.
unsafe impl<const C: usize> Send for Page<C> {}
unsafe impl<const C: usize> Sync for Page<C> {}


// ============================================================================
//  Tests
// ============================================================================
