//! Cache metrics and statistics.
//!
//! Two layers of accounting:
//!
//! - [`AtomicCounters`] / [`CounterSnapshot`]: per-cache operation counters
//! - [`EvictorCounters`] / [`EvictorStats`]: per-evictor eviction counters
//!
//! Process-wide totals are also published through `metriken` so an exporter
//! elsewhere in the process can scrape them.

use metriken::{Counter, Gauge, metric};
use std::sync::atomic::{AtomicU64, Ordering};

#[metric(
    name = "cache_object_count",
    description = "Number of records resident across all evictors"
)]
pub static CACHE_OBJECT_COUNT: Gauge = Gauge::new();

#[metric(
    name = "cache_size",
    description = "Bytes resident across all evictors"
)]
pub static CACHE_SIZE: Gauge = Gauge::new();

#[metric(
    name = "cache_num_evictions",
    description = "Records removed by eviction"
)]
pub static CACHE_EVICTIONS: Counter = Counter::new();

#[metric(
    name = "cache_num_evictions_punt",
    description = "Eviction candidates skipped because their owner vetoed removal"
)]
pub static CACHE_EVICTION_PUNTS: Counter = Counter::new();

#[metric(
    name = "cache_eviction_starved",
    description = "Eviction passes that ended over budget with nothing evictable"
)]
pub static CACHE_EVICTION_STARVED: Counter = Counter::new();

/// Outcome of a lookup, for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// Everything requested was resident.
    Hit,
    /// Part of a requested range was resident.
    Partial,
    /// Nothing requested was resident.
    Miss,
}

/// Atomic counters for tracking cache operations.
///
/// These counters can be shared across threads for lock-free updates.
#[derive(Debug, Default)]
pub struct AtomicCounters {
    /// GET operations.
    pub gets: AtomicU64,
    /// GET hits.
    pub get_hits: AtomicU64,
    /// GET operations on ranges that were only partly resident.
    pub get_partial_hits: AtomicU64,
    /// GET misses.
    pub get_misses: AtomicU64,
    /// INSERT operations.
    pub inserts: AtomicU64,
    /// INSERT operations that stored nothing because the key was present.
    pub insert_failures: AtomicU64,
    /// REMOVE operations.
    pub removes: AtomicU64,
    /// REMOVE operations that found something to remove.
    pub remove_hits: AtomicU64,
    /// Entries removed by the evictor.
    pub evictions: AtomicU64,
}

impl AtomicCounters {
    /// Create new atomic counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a GET operation.
    #[inline]
    pub fn record_get(&self, kind: LookupKind) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        match kind {
            LookupKind::Hit => self.get_hits.fetch_add(1, Ordering::Relaxed),
            LookupKind::Partial => self.get_partial_hits.fetch_add(1, Ordering::Relaxed),
            LookupKind::Miss => self.get_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record an INSERT operation.
    #[inline]
    pub fn record_insert(&self, stored: bool) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        if !stored {
            self.insert_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a REMOVE operation.
    #[inline]
    pub fn record_remove(&self, hit: bool) {
        self.removes.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.remove_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an eviction.
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counter values.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            get_hits: self.get_hits.load(Ordering::Relaxed),
            get_partial_hits: self.get_partial_hits.load(Ordering::Relaxed),
            get_misses: self.get_misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            insert_failures: self.insert_failures.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            remove_hits: self.remove_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.gets.store(0, Ordering::Relaxed);
        self.get_hits.store(0, Ordering::Relaxed);
        self.get_partial_hits.store(0, Ordering::Relaxed);
        self.get_misses.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.insert_failures.store(0, Ordering::Relaxed);
        self.removes.store(0, Ordering::Relaxed);
        self.remove_hits.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// GET operations.
    pub gets: u64,
    /// GET hits.
    pub get_hits: u64,
    /// GET partial hits.
    pub get_partial_hits: u64,
    /// GET misses.
    pub get_misses: u64,
    /// INSERT operations.
    pub inserts: u64,
    /// INSERT failures.
    pub insert_failures: u64,
    /// REMOVE operations.
    pub removes: u64,
    /// REMOVE hits.
    pub remove_hits: u64,
    /// Evictions.
    pub evictions: u64,
}

impl CounterSnapshot {
    /// Get hit rate as a percentage (0.0 - 100.0). Partial hits count as
    /// misses.
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            (self.get_hits as f64 / self.gets as f64) * 100.0
        }
    }

    /// Compute the difference between two snapshots (self - other).
    ///
    /// Useful for computing rates over an interval.
    pub fn diff(&self, other: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            gets: self.gets.saturating_sub(other.gets),
            get_hits: self.get_hits.saturating_sub(other.get_hits),
            get_partial_hits: self.get_partial_hits.saturating_sub(other.get_partial_hits),
            get_misses: self.get_misses.saturating_sub(other.get_misses),
            inserts: self.inserts.saturating_sub(other.inserts),
            insert_failures: self.insert_failures.saturating_sub(other.insert_failures),
            removes: self.removes.saturating_sub(other.removes),
            remove_hits: self.remove_hits.saturating_sub(other.remove_hits),
            evictions: self.evictions.saturating_sub(other.evictions),
        }
    }
}

/// Counters kept by an evictor.
#[derive(Debug, Default)]
pub struct EvictorCounters {
    /// Records evicted.
    pub evictions: AtomicU64,
    /// Candidates skipped because their owner vetoed eviction.
    pub punts: AtomicU64,
    /// Eviction passes that found nothing evictable while over budget.
    pub starvations: AtomicU64,
}

impl EvictorCounters {
    /// Record `count` evictions.
    #[inline]
    pub fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
            CACHE_EVICTIONS.add(count);
        }
    }

    /// Record `count` punts.
    #[inline]
    pub fn record_punts(&self, count: u64) {
        if count > 0 {
            self.punts.fetch_add(count, Ordering::Relaxed);
            CACHE_EVICTION_PUNTS.add(count);
        }
    }

    /// Record a starved eviction pass.
    #[inline]
    pub fn record_starvation(&self) {
        self.starvations.fetch_add(1, Ordering::Relaxed);
        CACHE_EVICTION_STARVED.increment();
    }
}

/// Point-in-time view of an evictor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictorStats {
    /// Bytes currently accounted across all partitions.
    pub resident_bytes: u64,
    /// Records currently tracked across all partitions.
    pub records: u64,
    /// Records evicted.
    pub evictions: u64,
    /// Candidates skipped because their owner vetoed eviction.
    pub punts: u64,
    /// Eviction passes that ended over budget with nothing evictable.
    pub starvations: u64,
}
