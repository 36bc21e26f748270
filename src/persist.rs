//! Persistence primitives: ordered-store fences and cache-line flushes.
//!
//! Every published mutation that must survive a power failure is pushed out
//! of the cache hierarchy through [`Persist::flush_range`] before any
//! dependent pointer is published. The flush walks the affected cache lines,
//! bracketed by ordered-store fences, and can pad each line with a busy-wait
//! that emulates the write latency of a persistent-memory device.
//!
//! # Architecture Support
//!
//! - **`x86_64`**: each line is evicted with `_mm_clflush`
//! - **Other**: the fences alone order the stores (volatile configuration)
//!
//! The crate relies on the platform's 8-byte atomic store guarantee: any
//! single aligned 8-byte write is all-or-nothing on recovery.

use std::sync::atomic::{Ordering, fence};
use std::time::{Duration, Instant};

/// Cache-line size assumed for flush granularity and node alignment.
pub const CACHE_LINE_SIZE: usize = 64;

/// Process-wide persistence configuration, immutable after construction.
///
/// Carries the emulated write latency applied after every flushed cache
/// line. A latency of zero disables the busy-wait, which is the right
/// setting for volatile (plain DRAM) runs.
///
/// # Example
///
/// ```
/// use fastfair::persist::Persist;
///
/// let persist = Persist::new(0);
/// let word: u64 = 42;
/// persist.flush(&word);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Persist {
    write_latency_ns: u64,
}

impl Persist {
    /// Create a persistence handle with the given emulated write latency.
    #[inline]
    #[must_use]
    pub const fn new(write_latency_ns: u64) -> Self {
        Self { write_latency_ns }
    }

    /// The configured emulated write latency in nanoseconds.
    #[inline]
    #[must_use]
    pub const fn write_latency_ns(&self) -> u64 {
        self.write_latency_ns
    }

    /// Ordered-store fence: no store may be reordered across this point.
    #[inline]
    pub fn fence() {
        fence(Ordering::SeqCst);
    }

    /// Flush every cache line intersecting `[addr, addr + len)`.
    ///
    /// The start address is rounded down to its cache line and the flush
    /// proceeds by line stride, with an ordered-store fence before and
    /// after the walk. Each evicted line is followed by the configured
    /// latency busy-wait.
    pub fn flush_range(&self, addr: *const u8, len: usize) {
        let start: usize = (addr as usize) & !(CACHE_LINE_SIZE - 1);
        let end: usize = addr as usize + len;

        Self::fence();

        let mut line: usize = start;
        while line < end {
            flush_line(line as *const u8);
            self.emulate_write_latency();
            line += CACHE_LINE_SIZE;
        }

        Self::fence();
    }

    /// Flush the cache lines backing `obj`.
    #[inline]
    pub fn flush<T>(&self, obj: &T) {
        self.flush_range(std::ptr::from_ref(obj).cast::<u8>(), size_of::<T>());
    }

    /// Busy-wait for the configured write latency on a monotonic clock.
    #[inline]
    fn emulate_write_latency(&self) {
        if self.write_latency_ns == 0 {
            return;
        }

        let deadline: Instant = Instant::now() + Duration::from_nanos(self.write_latency_ns);
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Evict one cache line from the hierarchy.
#[inline(always)]
fn flush_line(line: *const u8) {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: clflush is a hint-like eviction; the line belongs to an
        // allocation owned by the caller and no load is performed.
        unsafe {
            std::arch::x86_64::_mm_clflush(line);
        }
    }

    // On other architectures the surrounding fences order the stores and
    // the volatile configuration needs nothing more.
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = line;
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_single_word() {
        let persist = Persist::new(0);
        let word: u64 = 0xdead_beef;
        persist.flush(&word);
        assert_eq!(word, 0xdead_beef);
    }

    #[test]
    fn flush_spanning_lines() {
        let persist = Persist::new(0);
        let buf = [0u8; 3 * CACHE_LINE_SIZE];
        // Start mid-line so the walk has to round down and cross boundaries.
        persist.flush_range(buf[10..].as_ptr(), 2 * CACHE_LINE_SIZE);
    }

    #[test]
    fn latency_wait_is_applied() {
        let persist = Persist::new(50_000);
        let word: u64 = 7;

        let start = Instant::now();
        persist.flush(&word);
        // One line flushed, so at least one latency period elapsed.
        assert!(start.elapsed() >= Duration::from_nanos(50_000));
    }

    #[test]
    fn zero_latency_is_fast() {
        let persist = Persist::default();
        assert_eq!(persist.write_latency_ns(), 0);
        let buf = [0u8; 1024];
        persist.flush_range(buf.as_ptr(), buf.len());
    }
}
