//! Feature-gated diagnostic macros.
//!
//! The tree's hot paths log nothing; the few informational diagnostics it
//! does emit (a delete whose descent came up empty, a lost root-growth
//! race in `tree.rs`) go through these macros so the default build carries
//! no `tracing` dependency at all. With the `tracing` feature enabled they
//! forward to the `tracing` crate; without it they expand to nothing.
//!
//! ```bash
//! # See why a delete was a no-op
//! RUST_LOG=fastfair=debug cargo test --features tracing delete
//! ```

#![allow(unused_macros, unused_imports)]

/// Trace-level diagnostics. Expands to nothing without the `tracing`
/// feature.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        // No feature, no expansion: the arguments are discarded unevaluated.
    };
}

/// Debug-level diagnostics, e.g. `debug_log!(key, "delete target not
/// present")`. Expands to nothing without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Warn-level diagnostics. Expands to nothing without the `tracing`
/// feature.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
pub(crate) use warn_log;
