//! Range cache orchestration.
//!
//! [`RangeCache`] wires a [`RangeHashMap`] to a shared [`Evictor`]:
//!
//! - The map reports every sub-range create, access, resize, and delete to
//!   the evictor while the bucket lock is held
//! - After an insert releases its locks, the cache runs eviction on every
//!   partition it grew
//! - The cache registers itself as a record family, so the evictor can call
//!   back into it to remove a victim; a caller-supplied predicate may veto
//!   removal of pinned sub-ranges
//!
//! Values are [`ByteView`]s, so pieces returned by a lookup stay valid after
//! the sub-range they came from is erased or evicted.

use crate::key::{BaseKey, RangeKey, Span};
use crate::map::RangeHashMap;
use cache_core::{
    AtomicCounters, ByteView, CacheConfig, CacheError, CacheResult, CounterSnapshot, EvictOutcome,
    EvictionTarget, Evictor, EvictorObserver, FamilyId, LookupKind, RecordId,
};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Expected resident units per bucket when sizing from `capacity_items`.
const ITEMS_PER_BUCKET: usize = 16;

/// Predicate that keeps a sub-range resident while it returns `true`.
pub type PreventEviction<B> = Box<dyn Fn(&RangeKey<B>, &ByteView) -> bool + Send + Sync>;

/// Result of a range lookup: the resident pieces plus the gaps between them.
#[derive(Debug, Clone)]
pub struct RangeLookup<B> {
    pieces: Vec<(RangeKey<B>, ByteView)>,
    gaps: Vec<Span>,
    kind: LookupKind,
}

impl<B> RangeLookup<B> {
    fn new(requested: Span, pieces: Vec<(RangeKey<B>, ByteView)>) -> Self {
        let mut gaps = Vec::new();
        let mut cursor = requested.start;
        for (key, _) in &pieces {
            if key.offset > cursor {
                gaps.push(Span::new(cursor, key.offset));
            }
            cursor = key.end();
        }
        if cursor < requested.end {
            gaps.push(Span::new(cursor, requested.end));
        }

        let kind = if pieces.is_empty() {
            LookupKind::Miss
        } else if gaps.is_empty() {
            LookupKind::Hit
        } else {
            LookupKind::Partial
        };

        Self { pieces, gaps, kind }
    }

    /// Resident pieces in ascending order, clipped to the request.
    pub fn pieces(&self) -> &[(RangeKey<B>, ByteView)] {
        &self.pieces
    }

    /// Consume the lookup, returning its pieces.
    pub fn into_pieces(self) -> Vec<(RangeKey<B>, ByteView)> {
        self.pieces
    }

    /// Requested units that were not resident, in ascending order.
    pub fn gaps(&self) -> &[Span] {
        &self.gaps
    }

    /// Whether the request was fully, partly, or not at all resident.
    pub fn kind(&self) -> LookupKind {
        self.kind
    }
}

struct RangeCacheInner<B: BaseKey> {
    map: RangeHashMap<B, EvictorObserver<ByteView>>,
    evictor: Arc<dyn Evictor>,
    family: FamilyId,
    prevent_eviction: Option<PreventEviction<B>>,
    counters: AtomicCounters,
}

impl<B: BaseKey> EvictionTarget for RangeCacheInner<B> {
    fn evict_record(&self, hash: u64, record: RecordId) -> EvictOutcome {
        let outcome = self.map.erase_record(hash, record, |key, value| {
            self.prevent_eviction
                .as_ref()
                .is_some_and(|prevent| prevent(key, value))
        });
        if outcome == EvictOutcome::Evicted {
            self.counters.record_eviction();
        }
        outcome
    }
}

impl<B: BaseKey> Drop for RangeCacheInner<B> {
    fn drop(&mut self) {
        self.evictor.unregister_family(self.family);
    }
}

/// Concurrent cache of byte ranges addressed by `(base, offset, count)`.
///
/// Offsets and counts are in units of `unit_size` bytes. Inserting over
/// resident data overwrites exactly the overlapping units; lookups return
/// whatever part of a request is resident.
pub struct RangeCache<B: BaseKey> {
    inner: Arc<RangeCacheInner<B>>,
}

impl<B: BaseKey> Clone for RangeCache<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: BaseKey> RangeCache<B> {
    /// Create a cache sized for about `capacity_items` resident units of
    /// `unit_size` bytes, charging its memory to `evictor`.
    pub fn new(
        evictor: Arc<dyn Evictor>,
        capacity_items: usize,
        unit_size: usize,
    ) -> CacheResult<Self> {
        Self::build(evictor, capacity_items, unit_size, None)
    }

    /// Like [`Self::new`], but sub-ranges for which `prevent_eviction`
    /// returns `true` are skipped by the evictor.
    pub fn with_prevent_eviction<P>(
        evictor: Arc<dyn Evictor>,
        capacity_items: usize,
        unit_size: usize,
        prevent_eviction: P,
    ) -> CacheResult<Self>
    where
        P: Fn(&RangeKey<B>, &ByteView) -> bool + Send + Sync + 'static,
    {
        Self::build(
            evictor,
            capacity_items,
            unit_size,
            Some(Box::new(prevent_eviction)),
        )
    }

    /// Create a cache from the `[range]` section of `config`.
    pub fn from_config(evictor: Arc<dyn Evictor>, config: &CacheConfig) -> CacheResult<Self> {
        let unit_size = config.range.unit_size_u32()? as usize;
        Self::new(evictor, config.range.capacity_items, unit_size)
    }

    fn build(
        evictor: Arc<dyn Evictor>,
        capacity_items: usize,
        unit_size: usize,
        prevent_eviction: Option<PreventEviction<B>>,
    ) -> CacheResult<Self> {
        let unit_size = u32::try_from(unit_size).map_err(|_| CacheError::InvalidArgument)?;
        let buckets = (capacity_items / ITEMS_PER_BUCKET).max(1);
        let map = RangeHashMap::new(buckets, unit_size, ())?;

        let inner = Arc::new_cyclic(|weak: &Weak<RangeCacheInner<B>>| {
            let target: Weak<dyn EvictionTarget> = weak.clone();
            let family = evictor.register_family(target);
            let observer = EvictorObserver::new(
                evictor.clone(),
                family,
                Box::new(|value: &ByteView| u32::try_from(value.len()).unwrap_or(u32::MAX)),
            );
            RangeCacheInner {
                map: map.with_observer(observer),
                evictor,
                family,
                prevent_eviction,
                counters: AtomicCounters::new(),
            }
        });

        debug!(
            buckets,
            unit_size,
            family = inner.family.as_raw(),
            "created range cache"
        );
        Ok(Self { inner })
    }

    /// Store `bytes` for `count` units at `offset` under `base`, replacing
    /// whatever overlapped them.
    ///
    /// `bytes` must hold exactly `count * unit_size` bytes. Runs eviction on
    /// every partition the insert grew before returning.
    pub fn insert(
        &self,
        base: &B,
        offset: u64,
        count: u32,
        bytes: impl Into<ByteView>,
    ) -> CacheResult<()> {
        let span = Span::from_range(offset, count)?;
        let bytes = bytes.into();
        if bytes.len() as u64 != count as u64 * self.inner.map.unit_size() as u64 {
            return Err(CacheError::SizeMismatch);
        }

        let touched = self.inner.map.insert(base, span, bytes);
        self.inner.counters.record_insert(true);

        for hash in touched {
            self.inner.evictor.evict(hash);
        }
        Ok(())
    }

    /// Resident pieces of `count` units at `offset` under `base`.
    ///
    /// Pieces come back in ascending order, clipped to the request and split
    /// at node windows. Units between pieces are misses for the caller to
    /// fill.
    pub fn get(
        &self,
        base: &B,
        offset: u64,
        count: u32,
    ) -> CacheResult<Vec<(RangeKey<B>, ByteView)>> {
        Ok(self.lookup(base, offset, count)?.into_pieces())
    }

    /// Like [`Self::get`], also reporting the gaps and whether the request
    /// was a hit, a partial hit, or a miss.
    pub fn lookup(&self, base: &B, offset: u64, count: u32) -> CacheResult<RangeLookup<B>> {
        let span = Span::from_range(offset, count)?;
        let lookup = RangeLookup::new(span, self.inner.map.get(base, span));
        self.inner.counters.record_get(lookup.kind());
        Ok(lookup)
    }

    /// Erase `count` units at `offset` under `base`, returning the number of
    /// resident units removed.
    pub fn remove(&self, base: &B, offset: u64, count: u32) -> CacheResult<u64> {
        let span = Span::from_range(offset, count)?;
        let removed = self.inner.map.erase(base, span);
        self.inner.counters.record_remove(removed > 0);
        Ok(removed)
    }

    /// Remove every sub-range.
    pub fn clear(&self) {
        self.inner.map.clear();
    }

    /// Number of resident sub-ranges.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// Whether nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    /// Number of non-empty node windows.
    pub fn node_count(&self) -> usize {
        self.inner.map.node_count()
    }

    /// Bytes per unit.
    pub fn unit_size(&self) -> usize {
        self.inner.map.unit_size() as usize
    }

    /// The evictor this cache charges its memory to.
    pub fn evictor(&self) -> &Arc<dyn Evictor> {
        &self.inner.evictor
    }

    /// The record family this cache is registered as.
    pub fn family(&self) -> FamilyId {
        self.inner.family
    }

    /// Operation counters.
    pub fn stats(&self) -> CounterSnapshot {
        self.inner.counters.snapshot()
    }
}
