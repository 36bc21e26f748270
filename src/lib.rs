//! # fastfair
//!
//! A failure-atomic B+-tree for byte-addressable persistent memory.
//!
//! The tree mutates nodes in place with single-word stores and cache-line
//! flushes instead of copy-on-write or logging:
//! - Inserts and deletes shift sorted records one slot at a time, ordered
//!   so a crash (or a concurrent reader) at any store boundary sees a state
//!   it can resolve.
//! - Splits publish the fully persisted sibling into the per-level chain
//!   before the parent learns about it; parent routing is best-effort and
//!   re-drivable.
//! - Readers take no locks: they validate against a per-node version
//!   counter whose parity tells them which direction a writer is shifting.
//!
//! ## Concurrency
//!
//! - Lookups and range scans: lock-free, optimistic retry per node
//! - Updates: one write lock per node, no tree-wide lock
//!
//! ## Persistence
//!
//! Flush and fence discipline lives in [`persist`]; the allocator boundary
//! in [`alloc`] yields cache-line-aligned, fully persisted nodes. On a
//! volatile build the same code runs with flushes degraded to fences.

pub mod alloc;
pub mod node_ref;
pub mod ordering;
pub mod page;
pub mod persist;
pub mod tree;

pub(crate) mod tracing_helpers;

pub use alloc::{HeapAllocator, NodeAllocator};
pub use node_ref::NodeRef;
pub use page::{DEFAULT_CARDINALITY, KEY_MAX, PAGE_SIZE};
pub use persist::{CACHE_LINE_SIZE, Persist};
pub use tree::FastFairTree;
