//! Common test utilities.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     // ...
//! }
//! ```
//!
//! Filter with `RUST_LOG`, e.g. `RUST_LOG=fastfair=debug`.

#![allow(dead_code)]

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a console tracing subscriber once per test binary.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Multiplicative scrambler: distinct keys in a deterministic
/// pseudo-random order, with no RNG dependency. The odd multiplier makes
/// the map a bijection on `u64`, so keys never repeat.
pub fn scrambled_keys(n: usize) -> Vec<i64> {
    const MULTIPLIER: u64 = 0x9e37_79b9_7f4a_7c15;

    (0..n as u64)
        .map(|i| i.wrapping_mul(MULTIPLIER) as i64)
        .filter(|&key| key != i64::MAX)
        .collect()
}
