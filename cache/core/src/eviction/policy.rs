//! The evictor interface and the events that drive it.

use crate::access::AccessOp;
use crate::metrics::EvictorStats;
use crate::record::RecordId;
use std::fmt;
use std::sync::Weak;

/// Identifies one store (a record family) registered with an evictor.
///
/// Several caches can share one evictor; the family tells the evictor whose
/// removal path to call for a victim.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyId(u32);

impl FamilyId {
    /// Wrap a raw id.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw id.
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FamilyId({})", self.0)
    }
}

/// One bookkeeping event delivered to an evictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessEvent {
    /// Store that owns the record.
    pub family: FamilyId,
    /// Hash that placed the record; selects the evictor partition.
    pub hash: u64,
    /// The record.
    pub record: RecordId,
    /// What happened.
    pub op: AccessOp,
    /// Byte size for `Create`, new byte size for `Resize`, otherwise 0.
    pub size: u32,
}

/// A record chosen for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    /// Store that owns the record.
    pub family: FamilyId,
    /// Hash the record was placed with.
    pub hash: u64,
    /// The record.
    pub record: RecordId,
    /// Byte size the evictor has accounted for it.
    pub size: u32,
}

impl Victim {
    /// The `(family, record)` pair identifying this victim.
    #[inline]
    pub fn key(&self) -> (FamilyId, RecordId) {
        (self.family, self.record)
    }
}

/// Result of asking a store to give up a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    /// The record was removed.
    Evicted,
    /// The store's `prevent_eviction` predicate kept the record.
    Vetoed,
    /// The record was no longer present.
    Missing,
}

/// Summary of one eviction pass over a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Records evicted.
    pub evicted: u64,
    /// Bytes the evicted records were accounted for.
    pub evicted_bytes: u64,
    /// Candidates skipped because their owner vetoed eviction.
    pub punts: u64,
    /// The pass ended over budget with nothing left to try.
    pub starved: bool,
}

/// A store's removal path, as seen by an evictor.
pub trait EvictionTarget: Send + Sync {
    /// Remove `record`, placed with `hash`, unless the store vetoes it.
    ///
    /// Called with no evictor lock held. The removal reports a `Delete`
    /// access like any other erase.
    fn evict_record(&self, hash: u64, record: RecordId) -> EvictOutcome;
}

/// A pluggable capacity-enforcement policy.
///
/// An evictor consumes [`AccessEvent`]s from one or more stores, tracks the
/// bytes resident per partition, and when a partition is over budget picks
/// victims and removes them through the owning store's [`EvictionTarget`].
///
/// `record_access` runs under the reporting store's bucket lock and must only
/// touch evictor state. `evict` runs with no store lock held.
pub trait Evictor: Send + Sync {
    /// Register a store and return the family id its events must carry.
    fn register_family(&self, target: Weak<dyn EvictionTarget>) -> FamilyId;

    /// Forget a store and drop every record it still has accounted.
    fn unregister_family(&self, family: FamilyId);

    /// Apply one bookkeeping event.
    fn record_access(&self, event: AccessEvent);

    /// Whether the partition selected by `hash` is over budget.
    fn should_evict(&self, hash: u64) -> bool;

    /// Pick victims from the partition selected by `hash`, least recently
    /// used first, enough to bring it under budget. Records listed in
    /// `exclude` are passed over. Empty when the partition is under budget.
    fn select_victims(&self, hash: u64, exclude: &[(FamilyId, RecordId)]) -> Vec<Victim>;

    /// Evict from the partition selected by `hash` until it is under budget
    /// or nothing evictable remains.
    fn evict(&self, hash: u64) -> EvictionReport;

    /// Total byte budget.
    fn max_size(&self) -> u64;

    /// Number of partitions.
    fn num_partitions(&self) -> usize;

    /// Bytes currently accounted.
    fn resident_bytes(&self) -> u64;

    /// Current statistics.
    fn stats(&self) -> EvictorStats;
}
