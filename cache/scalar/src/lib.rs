//! Concurrent single-value-per-key cache on the shared eviction machinery.
//!
//! [`ScalarCache`] is the point case of the range cache: each value lives
//! under one key, the key is derived from the value by a caller-supplied
//! extractor, and every entry is charged a fixed byte size to the shared
//! [`Evictor`]. It is used where whole objects are cached and ranges are
//! unnecessary.
//!
//! # Example
//!
//! ```ignore
//! use cache_core::{Evictor, LruEvictor};
//! use scalar_cache::ScalarCache;
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct Inode { id: u64, size: u64 }
//!
//! let evictor: Arc<dyn Evictor> = Arc::new(LruEvictor::new(16 * 1024 * 1024, 8)?);
//! let inodes = ScalarCache::new(evictor, 1024, 256, |inode: &Inode| inode.id, None)?;
//!
//! inodes.insert(Inode { id: 7, size: 4096 });
//! assert_eq!(inodes.get(&7).map(|i| i.size), Some(4096));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use cache_core::{
    AtomicCounters, CacheConfig, CacheResult, EvictOutcome, EvictionTarget, EvictorObserver,
    FamilyId, LookupKind, RecordId, ShardedMap, Weigher,
};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tracing::debug;

// Re-export common types from cache-core
pub use cache_core::{CacheError, CounterSnapshot, Evictor};

/// Derives an entry's key from its value.
pub type KeyExtractor<K, V> = Box<dyn Fn(&V) -> K + Send + Sync>;

/// Predicate that keeps an entry resident while it returns `true`.
pub type PreventEviction<V> = Box<dyn Fn(&V) -> bool + Send + Sync>;

struct ScalarInner<K, V> {
    map: ShardedMap<K, V, EvictorObserver<V>>,
    evictor: Arc<dyn Evictor>,
    family: FamilyId,
    key_extractor: KeyExtractor<K, V>,
    prevent_eviction: Option<PreventEviction<V>>,
    counters: AtomicCounters,
}

impl<K, V> EvictionTarget for ScalarInner<K, V>
where
    K: Hash + Ord + Send + Sync,
    V: Send + Sync,
{
    fn evict_record(&self, hash: u64, record: RecordId) -> EvictOutcome {
        let outcome = self.map.erase_record(hash, record, |_, value| {
            self.prevent_eviction
                .as_ref()
                .is_some_and(|prevent| prevent(value))
        });
        if outcome == EvictOutcome::Evicted {
            self.counters.record_eviction();
        }
        outcome
    }
}

impl<K, V> Drop for ScalarInner<K, V> {
    fn drop(&mut self) {
        self.evictor.unregister_family(self.family);
    }
}

/// Concurrent cache holding one value per key.
pub struct ScalarCache<K, V> {
    inner: Arc<ScalarInner<K, V>>,
}

impl<K, V> Clone for ScalarCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> ScalarCache<K, V>
where
    K: Hash + Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a cache with `bucket_count` buckets whose entries are each
    /// charged `value_size_hint` bytes to `evictor`.
    ///
    /// Keys are derived from values with `key_extractor`. Entries for which
    /// `prevent_eviction` returns `true` are skipped by the evictor.
    pub fn new<F>(
        evictor: Arc<dyn Evictor>,
        bucket_count: usize,
        value_size_hint: u32,
        key_extractor: F,
        prevent_eviction: Option<PreventEviction<V>>,
    ) -> CacheResult<Self>
    where
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        let map = ShardedMap::new(bucket_count, ())?;

        let inner = Arc::new_cyclic(|weak: &Weak<ScalarInner<K, V>>| {
            let target: Weak<dyn EvictionTarget> = weak.clone();
            let family = evictor.register_family(target);
            let weigher: Weigher<V> = Box::new(move |_: &V| value_size_hint);
            let observer = EvictorObserver::new(evictor.clone(), family, weigher);
            ScalarInner {
                map: map.with_observer(observer),
                evictor,
                family,
                key_extractor: Box::new(key_extractor),
                prevent_eviction,
                counters: AtomicCounters::new(),
            }
        });

        debug!(
            buckets = bucket_count,
            value_size_hint,
            family = inner.family.as_raw(),
            "created scalar cache"
        );
        Ok(Self { inner })
    }

    /// Create a cache from the `[scalar]` section of `config`.
    pub fn from_config<F>(
        evictor: Arc<dyn Evictor>,
        config: &CacheConfig,
        key_extractor: F,
        prevent_eviction: Option<PreventEviction<V>>,
    ) -> CacheResult<Self>
    where
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        Self::new(
            evictor,
            config.scalar.buckets,
            config.scalar.value_size_u32()?,
            key_extractor,
            prevent_eviction,
        )
    }

    fn store(&self, value: V, overwrite: bool) -> bool {
        let key = (self.inner.key_extractor)(&value);
        let hash = self.inner.map.hash_of(&key);
        let created = self.inner.map.insert(key, value, overwrite);
        self.inner.counters.record_insert(created || overwrite);
        // an overwrite reports the new value's size, which may have grown
        if created || overwrite {
            self.inner.evictor.evict(hash);
        }
        created
    }

    /// Insert `value` under its extracted key unless the key is present.
    ///
    /// Returns whether the value was stored.
    pub fn insert(&self, value: V) -> bool {
        self.store(value, false)
    }

    /// Insert `value` under its extracted key, replacing any existing value.
    ///
    /// Returns `true` if the key was absent.
    pub fn upsert(&self, value: V) -> bool {
        self.store(value, true)
    }

    /// Clone the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let value = self.inner.map.get(key);
        let kind = if value.is_some() {
            LookupKind::Hit
        } else {
            LookupKind::Miss
        };
        self.inner.counters.record_get(kind);
        value
    }

    /// Whether `key` is present. Does not count as an access.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.map.contains(key)
    }

    /// Remove and return the value stored under `key`.
    pub fn remove(&self, key: &K) -> Option<V> {
        let value = self.inner.map.erase(key);
        self.inner.counters.record_remove(value.is_some());
        value
    }

    /// Mutate the value under `key` in place. Returns whether it was found.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let found = self.inner.map.update(key, f);
        if found {
            self.inner.evictor.evict(self.inner.map.hash_of(key));
        }
        found
    }

    /// Mutate the value under `key`, creating it from `V::default()` first if
    /// absent, and remove it if `f` returns `true`.
    ///
    /// `f` receives the value and whether it already existed; the whole
    /// sequence is atomic with respect to other operations on `key`. Returns
    /// `true` if the key was absent.
    pub fn upsert_or_delete<F>(&self, key: K, f: F) -> bool
    where
        V: Default,
        F: FnOnce(&mut V, bool) -> bool,
    {
        let hash = self.inner.map.hash_of(&key);
        let absent = self.inner.map.upsert_or_delete(key, f);
        self.inner.evictor.evict(hash);
        absent
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.map.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
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
