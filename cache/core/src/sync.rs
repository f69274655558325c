//! Synchronization primitives with optional loom support.
//!
//! Atomics used for record id allocation and counters come from here so the
//! same code can be model checked under loom. Bucket and partition locks are
//! `parking_lot` and are not swapped.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicU64, Ordering};
