//! Access notifications emitted by stores while a bucket lock is held.
//!
//! An [`AccessObserver`] sees every create, touch, resize, and delete of an
//! entry, in the order the owning bucket's lock serializes them. It receives
//! only an [`AccessNotice`], which borrows the key and value immutably and
//! carries no handle back into the store, so an observer has no way to
//! re-enter the map that is calling it.

use crate::record::RecordId;

/// The kind of access being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    /// A new entry became resident.
    Create,
    /// An existing entry was read or written.
    Access,
    /// An existing entry's value was replaced or trimmed in place. The
    /// notice carries the new value.
    Resize,
    /// An entry is about to leave the store.
    Delete,
}

/// Bookkeeping data describing one access.
#[derive(Debug)]
pub struct AccessNotice<'a, K, V> {
    /// Key of the entry.
    pub key: &'a K,
    /// Value of the entry. For `Resize` this is the new value; for `Delete`
    /// it is the value being removed.
    pub value: &'a V,
    /// Hash that selected the entry's bucket.
    pub hash: u64,
    /// Identity of the entry.
    pub record: RecordId,
    /// What happened.
    pub op: AccessOp,
}

/// Receives access notifications from a store.
///
/// Called with the bucket lock held. Implementations must only touch state
/// private to the observer.
pub trait AccessObserver<K, V>: Send + Sync {
    /// Observe one access.
    fn on_access(&self, notice: AccessNotice<'_, K, V>);
}

/// The unit observer ignores every notice.
impl<K, V> AccessObserver<K, V> for () {
    #[inline]
    fn on_access(&self, _notice: AccessNotice<'_, K, V>) {}
}
