//! Atomics with optional loom support, matching `cache-core`.
//!
//! The resident-entry count shared by a map and its nodes comes from here.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicU64, Ordering};
