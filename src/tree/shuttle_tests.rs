//! Shuttle schedule-exploration tests for the shift/read protocol.
//!
//! Shuttle explores randomized thread schedules, which is how we probe the
//! interaction between the switch-counter read protocol and in-place record
//! shifting without waiting for a rare production interleaving.
//!
//! Run with: `cargo test --lib tree::shuttle_tests`
//!
//! The model below mirrors one node's record array: a spin write lock, a
//! direction-encoding version counter, and key-before-value slot stores.
//! Readers validate exactly the way [`crate::page::Page`] readers do: scan
//! in the parity direction, skip predecessor-duplicate values, retry while
//! the counter moves.

use shuttle::sync::Arc;
use shuttle::thread;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

const SLOTS: usize = 8;
const EMPTY_KEY: u64 = u64::MAX;

/// One node's worth of shifting records, shuttle-schedulable.
struct ShiftModel {
    keys: [AtomicU64; SLOTS],
    values: [AtomicU64; SLOTS],
    switch_counter: AtomicU8,
    /// Spin write lock; 1 = held.
    lock: AtomicU8,
}

impl ShiftModel {
    fn new() -> Self {
        Self {
            keys: std::array::from_fn(|_| AtomicU64::new(EMPTY_KEY)),
            values: std::array::from_fn(|_| AtomicU64::new(0)),
            switch_counter: AtomicU8::new(0),
            lock: AtomicU8::new(0),
        }
    }

    fn lock(&self) {
        while self
            .lock
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            thread::yield_now();
        }
    }

    fn unlock(&self) {
        self.lock.store(0, Ordering::Release);
    }

    fn count_locked(&self) -> usize {
        let mut n = 0;
        while n < SLOTS && self.values[n].load(Ordering::Relaxed) != 0 {
            n += 1;
        }
        n
    }

    /// Shift-insert under the lock; every half-written slot duplicates its
    /// left neighbor's value until the final store commits it.
    fn insert(&self, key: u64, value: u64) {
        self.lock();

        let counter = self.switch_counter.load(Ordering::Relaxed);
        if counter % 2 != 0 {
            self.switch_counter
                .store(counter.wrapping_add(1), Ordering::Release);
        }

        let count = self.count_locked();
        assert!(count < SLOTS - 1, "model node overflow");

        let mut i = count as isize - 1;
        while i >= 0 {
            let slot = i as usize;
            if self.keys[slot].load(Ordering::Relaxed) > key {
                // Value copy first: the half-shifted slot duplicates its
                // left neighbor until the key write completes it.
                self.values[slot + 1]
                    .store(self.values[slot].load(Ordering::Relaxed), Ordering::Release);
                self.keys[slot + 1].store(self.keys[slot].load(Ordering::Relaxed), Ordering::Release);
            } else {
                break;
            }
            i -= 1;
        }
        let target = (i + 1) as usize;
        if target > 0 {
            // Duplicate the predecessor so the slot reads as mid-shift.
            self.values[target].store(self.values[target - 1].load(Ordering::Relaxed), Ordering::Release);
        }
        self.keys[target].store(key, Ordering::Release);
        self.values[target].store(value, Ordering::Release);

        self.unlock();
    }

    /// Shift-delete under the lock, predecessor-duplicate first.
    fn delete(&self, key: u64) -> bool {
        self.lock();

        let count = self.count_locked();
        let mut target = None;
        for i in 0..count {
            if self.keys[i].load(Ordering::Relaxed) == key {
                target = Some(i);
                break;
            }
        }
        let Some(start) = target else {
            self.unlock();
            return false;
        };

        let counter = self.switch_counter.load(Ordering::Relaxed);
        if counter % 2 == 0 {
            self.switch_counter
                .store(counter.wrapping_add(1), Ordering::Release);
        }

        let predecessor = if start == 0 {
            0
        } else {
            self.values[start - 1].load(Ordering::Relaxed)
        };
        self.values[start].store(predecessor, Ordering::Release);

        for i in start..count {
            self.keys[i].store(self.keys[i + 1].load(Ordering::Relaxed), Ordering::Release);
            self.values[i].store(self.values[i + 1].load(Ordering::Relaxed), Ordering::Release);
        }

        self.unlock();
        true
    }

    /// Optimistic probe, exactly the page reader's discipline.
    fn search(&self, key: u64) -> Option<u64> {
        loop {
            let previous = self.switch_counter.load(Ordering::Acquire);
            let mut ret = 0u64;

            if previous % 2 == 0 {
                let k = self.keys[0].load(Ordering::Acquire);
                if k == key {
                    let v = self.values[0].load(Ordering::Acquire);
                    if v != 0 && self.keys[0].load(Ordering::Acquire) == k {
                        ret = v;
                    }
                }
                if ret == 0 {
                    let mut i = 1;
                    while i < SLOTS && self.values[i].load(Ordering::Acquire) != 0 {
                        let k = self.keys[i].load(Ordering::Acquire);
                        if k == key {
                            let v = self.values[i].load(Ordering::Acquire);
                            if self.values[i - 1].load(Ordering::Acquire) != v
                                && self.keys[i].load(Ordering::Acquire) == k
                            {
                                ret = v;
                                break;
                            }
                        }
                        i += 1;
                    }
                }
            } else {
                let mut i = SLOTS - 1;
                while i > 0 {
                    let k = self.keys[i].load(Ordering::Acquire);
                    if k == key {
                        let v = self.values[i].load(Ordering::Acquire);
                        if v != 0 && self.values[i - 1].load(Ordering::Acquire) != v {
                            ret = v;
                            break;
                        }
                    }
                    i -= 1;
                }
                if ret == 0 {
                    let k = self.keys[0].load(Ordering::Acquire);
                    if k == key {
                        let v = self.values[0].load(Ordering::Acquire);
                        if v != 0 && self.keys[0].load(Ordering::Acquire) == k {
                            ret = v;
                        }
                    }
                }
            }

            if self.switch_counter.load(Ordering::Acquire) == previous {
                return (ret != 0).then_some(ret);
            }
            thread::yield_now();
        }
    }
}

/// A value handle derived from its key, so any torn read is detectable.
fn handle(key: u64) -> u64 {
    key * 1000 + 7
}

#[test]
fn readers_never_observe_torn_records_during_inserts() {
    shuttle::check_random(
        || {
            let model = Arc::new(ShiftModel::new());

            let writer = {
                let model = Arc::clone(&model);
                thread::spawn(move || {
                    // Descending order maximizes shifting.
                    for key in (1..=5u64).rev() {
                        model.insert(key, handle(key));
                    }
                })
            };

            let reader = {
                let model = Arc::clone(&model);
                thread::spawn(move || {
                    for key in 1..=5u64 {
                        if let Some(v) = model.search(key) {
                            assert_eq!(v, handle(key), "reader saw a torn record for {key}");
                        }
                    }
                })
            };

            writer.join().unwrap();
            reader.join().unwrap();

            for key in 1..=5u64 {
                assert_eq!(model.search(key), Some(handle(key)));
            }
        },
        2000,
    );
}

#[test]
fn delete_shift_never_loses_unrelated_keys() {
    shuttle::check_random(
        || {
            let model = Arc::new(ShiftModel::new());
            for key in 1..=5u64 {
                model.insert(key, handle(key));
            }

            let deleter = {
                let model = Arc::clone(&model);
                thread::spawn(move || {
                    assert!(model.delete(3));
                })
            };

            let reader = {
                let model = Arc::clone(&model);
                thread::spawn(move || {
                    for key in [1u64, 2, 4, 5] {
                        assert_eq!(
                            model.search(key),
                            Some(handle(key)),
                            "surviving key {key} vanished mid-delete"
                        );
                    }
                })
            };

            deleter.join().unwrap();
            reader.join().unwrap();

            assert_eq!(model.search(3), None);
        },
        2000,
    );
}

#[test]
fn racing_writers_serialize_through_the_lock() {
    shuttle::check_random(
        || {
            let model = Arc::new(ShiftModel::new());

            let a = {
                let model = Arc::clone(&model);
                thread::spawn(move || {
                    model.insert(1, handle(1));
                    model.insert(4, handle(4));
                })
            };
            let b = {
                let model = Arc::clone(&model);
                thread::spawn(move || {
                    model.insert(2, handle(2));
                    model.insert(3, handle(3));
                })
            };

            a.join().unwrap();
            b.join().unwrap();

            for key in 1..=4u64 {
                assert_eq!(model.search(key), Some(handle(key)));
            }
            // Keys ended up sorted despite the interleaving.
            let keys: Vec<u64> = (0..4).map(|i| model.keys[i].load(Ordering::Relaxed)).collect();
            assert_eq!(keys, vec![1, 2, 3, 4]);
        },
        2000,
    );
}
