//! Record identity shared between a store and its evictor.

use crate::sync::{AtomicU64, Ordering};
use std::fmt;

/// Identifies one resident entry (or one resident sub-range) to the evictor.
///
/// Ids are allocated from a per-store counter and never reused, so a stale id
/// held by the evictor can never match a newer entry that happens to occupy
/// the same slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    /// Wrap a raw id.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

/// Monotonic allocator for [`RecordId`]s.
#[derive(Debug)]
pub struct RecordIds {
    next: AtomicU64,
}

impl RecordIds {
    /// Create an allocator starting at id 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh id.
    #[inline]
    pub fn next(&self) -> RecordId {
        RecordId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RecordIds {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn test_concurrent_allocation_is_unique() {
        loom::model(|| {
            let ids = Arc::new(RecordIds::new());
            let other = ids.clone();

            let handle = thread::spawn(move || other.next());
            let mine = ids.next();
            let theirs = handle.join().unwrap();

            assert_ne!(mine, theirs);
        });
    }
}
