//! Memory orderings for the switch-counter protocol.
//!
//! Readers validate against each node's `switch_counter` instead of taking
//! locks, so every field a reader may race on (record words, the counter,
//! the sibling link, `highest`, `last_index`, the root anchor) moves
//! through Release stores and Acquire loads: a reader that observes a
//! committed value also observes every store the writer sequenced before
//! it, which is what makes the duplicate-skip rules sound. The constants
//! name the three access flavors so call sites state which side of that
//! pairing they are on.

use std::sync::atomic::Ordering;

/// Loads on the lock-free read path: a reader that sees a committed store
/// (a record word, a counter value, a published sibling) must also see
/// everything the writer wrote before it.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Stores made while holding a node's write lock. Release publishes the
/// shift, split, or counter bump to racing readers.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Success ordering for the root-anchor compare-exchange during root
/// growth: acquire the old root's state, release the new root's.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Failure ordering for the root-anchor compare-exchange: the loser only
/// needs to observe the root that beat it before rerouting its split key.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Loads inside a locked region, where the lock already serializes every
/// writer and readers never depend on them.
pub const RELAXED: Ordering = Ordering::Relaxed;
