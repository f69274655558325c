//! Lock-striped hash map with access notifications.
//!
//! # Design
//!
//! - A fixed array of buckets chosen by `hash(key) % bucket_count`
//! - Each bucket is a `parking_lot::RwLock` over a `SmallVec` of slots sorted
//!   by key; buckets are sized to stay short, so a binary search over a few
//!   slots replaces any tree
//! - Reads take the shared lock, everything else the exclusive lock
//! - While the lock is held, every operation reports what it did to the
//!   map's [`AccessObserver`]
//!
//! ```text
//!   key --hash--> [ bucket 0 ][ bucket 1 ][ bucket 2 ] ... [ bucket n-1 ]
//!                                  |
//!                           RwLock<[slot, slot]>
//!                                  |
//!                        slot { key, value, record }
//! ```
//!
//! Bucket operations receive the observer and record-id allocator through an
//! explicit [`MapContext`] argument rather than reaching them through shared
//! or thread-local state.

use crate::access::{AccessNotice, AccessObserver, AccessOp};
use crate::error::{CacheError, CacheResult};
use crate::eviction::EvictOutcome;
use crate::record::{RecordId, RecordIds};
use crate::sync::{AtomicU64, Ordering};
use ahash::RandomState;
use parking_lot::RwLock;
use smallvec::SmallVec;

/// Slots stored inline in a bucket before it spills to the heap.
const BUCKET_INLINE_SLOTS: usize = 2;

/// What to do with a slot after a closure has mutated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    /// Leave the slot in the bucket.
    Keep,
    /// Remove the slot from the bucket.
    Remove,
}

struct Slot<K, V> {
    key: K,
    value: V,
    record: RecordId,
}

/// Everything a bucket operation needs from its map besides the bucket.
struct MapContext<'a, O> {
    observer: &'a O,
    records: &'a RecordIds,
    len: &'a AtomicU64,
}

impl<O> MapContext<'_, O> {
    #[inline]
    fn notify<K, V>(&self, slot: &Slot<K, V>, hash: u64, op: AccessOp)
    where
        O: AccessObserver<K, V>,
    {
        self.observer.on_access(AccessNotice {
            key: &slot.key,
            value: &slot.value,
            hash,
            record: slot.record,
            op,
        });
    }

    /// Report a value changed in place: its new size, then the touch.
    #[inline]
    fn notify_rewrite<K, V>(&self, slot: &Slot<K, V>, hash: u64)
    where
        O: AccessObserver<K, V>,
    {
        self.notify(slot, hash, AccessOp::Resize);
        self.notify(slot, hash, AccessOp::Access);
    }
}

struct Bucket<K, V> {
    slots: RwLock<SmallVec<[Slot<K, V>; BUCKET_INLINE_SLOTS]>>,
}

impl<K: Ord, V> Bucket<K, V> {
    fn new() -> Self {
        Self {
            slots: RwLock::new(SmallVec::new()),
        }
    }

    fn insert<O>(
        &self,
        key: K,
        value: V,
        hash: u64,
        overwrite: bool,
        ctx: &MapContext<'_, O>,
    ) -> bool
    where
        O: AccessObserver<K, V>,
    {
        let mut slots = self.slots.write();
        match slots.binary_search_by(|slot| slot.key.cmp(&key)) {
            Ok(idx) => {
                if overwrite {
                    let slot = &mut slots[idx];
                    slot.value = value;
                    ctx.notify_rewrite(slot, hash);
                }
                false
            }
            Err(idx) => {
                let slot = Slot {
                    key,
                    value,
                    record: ctx.records.next(),
                };
                ctx.notify(&slot, hash, AccessOp::Create);
                slots.insert(idx, slot);
                ctx.len.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    fn get<O>(&self, key: &K, hash: u64, ctx: &MapContext<'_, O>) -> Option<V>
    where
        V: Clone,
        O: AccessObserver<K, V>,
    {
        let slots = self.slots.read();
        let idx = slots.binary_search_by(|slot| slot.key.cmp(key)).ok()?;
        let slot = &slots[idx];
        ctx.notify(slot, hash, AccessOp::Access);
        Some(slot.value.clone())
    }

    fn contains(&self, key: &K) -> bool {
        self.slots
            .read()
            .binary_search_by(|slot| slot.key.cmp(key))
            .is_ok()
    }

    fn erase<O>(&self, key: &K, hash: u64, ctx: &MapContext<'_, O>) -> Option<V>
    where
        O: AccessObserver<K, V>,
    {
        let mut slots = self.slots.write();
        let idx = slots.binary_search_by(|slot| slot.key.cmp(key)).ok()?;
        ctx.notify(&slots[idx], hash, AccessOp::Delete);
        ctx.len.fetch_sub(1, Ordering::Relaxed);
        Some(slots.remove(idx).value)
    }

    fn update<O, F>(&self, key: &K, hash: u64, f: F, ctx: &MapContext<'_, O>) -> bool
    where
        O: AccessObserver<K, V>,
        F: FnOnce(&mut V),
    {
        let mut slots = self.slots.write();
        let Ok(idx) = slots.binary_search_by(|slot| slot.key.cmp(key)) else {
            return false;
        };
        let slot = &mut slots[idx];
        f(&mut slot.value);
        ctx.notify_rewrite(slot, hash);
        true
    }

    fn upsert_or_delete<O, F>(&self, key: K, hash: u64, f: F, ctx: &MapContext<'_, O>) -> bool
    where
        V: Default,
        O: AccessObserver<K, V>,
        F: FnOnce(&mut V, bool) -> bool,
    {
        let mut slots = self.slots.write();
        match slots.binary_search_by(|slot| slot.key.cmp(&key)) {
            Ok(idx) => {
                let slot = &mut slots[idx];
                if f(&mut slot.value, true) {
                    ctx.notify(slot, hash, AccessOp::Delete);
                    slots.remove(idx);
                    ctx.len.fetch_sub(1, Ordering::Relaxed);
                } else {
                    ctx.notify_rewrite(slot, hash);
                }
                false
            }
            Err(idx) => {
                let mut value = V::default();
                // a value created and deleted in one call was never visible
                if !f(&mut value, false) {
                    let slot = Slot {
                        key,
                        value,
                        record: ctx.records.next(),
                    };
                    ctx.notify(&slot, hash, AccessOp::Create);
                    slots.insert(idx, slot);
                    ctx.len.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
        }
    }

    fn erase_record<O, F>(
        &self,
        hash: u64,
        record: RecordId,
        veto: F,
        ctx: &MapContext<'_, O>,
    ) -> EvictOutcome
    where
        O: AccessObserver<K, V>,
        F: FnOnce(&K, &V) -> bool,
    {
        let mut slots = self.slots.write();
        let Some(idx) = slots.iter().position(|slot| slot.record == record) else {
            return EvictOutcome::Missing;
        };
        let slot = &slots[idx];
        if veto(&slot.key, &slot.value) {
            return EvictOutcome::Vetoed;
        }
        ctx.notify(slot, hash, AccessOp::Delete);
        slots.remove(idx);
        ctx.len.fetch_sub(1, Ordering::Relaxed);
        EvictOutcome::Evicted
    }

    fn clear<O>(&self, hash_of: impl Fn(&K) -> u64, ctx: &MapContext<'_, O>)
    where
        O: AccessObserver<K, V>,
    {
        let mut slots = self.slots.write();
        for slot in slots.iter() {
            ctx.notify(slot, hash_of(&slot.key), AccessOp::Delete);
        }
        ctx.len.fetch_sub(slots.len() as u64, Ordering::Relaxed);
        slots.clear();
    }
}

/// Concurrent map from `K` to `V` striped over independently locked buckets.
///
/// Every slot carries a [`RecordId`] that identifies it to an evictor. The
/// map's observer `O` is told about every change to a slot while the bucket
/// lock is held.
pub struct ShardedMap<K, V, O = ()> {
    hash_builder: RandomState,
    buckets: Box<[Bucket<K, V>]>,
    observer: O,
    records: RecordIds,
    len: AtomicU64,
}

impl<K, V, O> ShardedMap<K, V, O>
where
    K: std::hash::Hash + Ord,
    O: AccessObserver<K, V>,
{
    /// Create a map with `bucket_count` buckets.
    ///
    /// Returns `InvalidArgument` for a zero bucket count and `OutOfMemory` if
    /// the bucket array cannot be allocated.
    pub fn new(bucket_count: usize, observer: O) -> CacheResult<Self> {
        if bucket_count == 0 {
            return Err(CacheError::InvalidArgument);
        }

        // Use fixed seeds in tests for deterministic behavior
        #[cfg(test)]
        let hash_builder = RandomState::with_seeds(
            0xbb8c484891ec6c86,
            0x0522a25ae9c769f9,
            0xeed2797b9571bc75,
            0x4feb29c1fbbd59d0,
        );
        #[cfg(not(test))]
        let hash_builder = RandomState::new();

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(bucket_count)
            .map_err(|_| CacheError::OutOfMemory)?;
        buckets.extend((0..bucket_count).map(|_| Bucket::new()));

        Ok(Self {
            hash_builder,
            buckets: buckets.into_boxed_slice(),
            observer,
            records: RecordIds::new(),
            len: AtomicU64::new(0),
        })
    }

    /// Replace the map's observer, keeping its contents and record ids.
    ///
    /// Lets the bucket array be allocated before the observer exists, as
    /// when the observer needs a handle to the structure owning the map.
    pub fn with_observer<O2>(self, observer: O2) -> ShardedMap<K, V, O2>
    where
        O2: AccessObserver<K, V>,
    {
        ShardedMap {
            hash_builder: self.hash_builder,
            buckets: self.buckets,
            observer,
            records: self.records,
            len: self.len,
        }
    }

    /// Hash used for both bucket selection and evictor partitioning.
    #[inline]
    pub fn hash_of(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Number of buckets.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of slots currently stored.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed) as usize
    }

    /// Whether the map holds no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The map's observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The allocator that issues record ids for this map's slots. Stores that
    /// keep several records per slot draw their ids from here as well.
    pub fn records(&self) -> &RecordIds {
        &self.records
    }

    #[inline]
    fn bucket(&self, hash: u64) -> &Bucket<K, V> {
        &self.buckets[(hash % self.buckets.len() as u64) as usize]
    }

    #[inline]
    fn context(&self) -> MapContext<'_, O> {
        MapContext {
            observer: &self.observer,
            records: &self.records,
            len: &self.len,
        }
    }

    /// Insert `value` under `key`.
    ///
    /// Returns `true` if a new slot was created. If `key` is present the
    /// value is replaced (reported as a resize, then an access) when
    /// `overwrite` is set and left alone otherwise; either way `false` is
    /// returned.
    pub fn insert(&self, key: K, value: V, overwrite: bool) -> bool {
        let hash = self.hash_of(&key);
        self.bucket(hash).insert(key, value, hash, overwrite, &self.context())
    }

    /// Clone the value stored under `key`, reporting an access on a hit.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let hash = self.hash_of(key);
        self.bucket(hash).get(key, hash, &self.context())
    }

    /// Whether `key` is present. Does not report an access.
    pub fn contains(&self, key: &K) -> bool {
        self.bucket(self.hash_of(key)).contains(key)
    }

    /// Remove and return the value stored under `key`.
    pub fn erase(&self, key: &K) -> Option<V> {
        let hash = self.hash_of(key);
        self.bucket(hash).erase(key, hash, &self.context())
    }

    /// Mutate the value under `key` in place. Returns whether it was found.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let hash = self.hash_of(key);
        self.bucket(hash).update(key, hash, f, &self.context())
    }

    /// Mutate the value under `key`, creating it from `V::default()` first if
    /// absent, and delete it if `f` returns `true`.
    ///
    /// `f` receives the value and whether it already existed. The whole
    /// sequence runs under one exclusive lock acquisition, which makes
    /// "decrement and delete at zero" patterns atomic. Returns `true` if the
    /// key was absent.
    pub fn upsert_or_delete<F>(&self, key: K, f: F) -> bool
    where
        V: Default,
        F: FnOnce(&mut V, bool) -> bool,
    {
        let hash = self.hash_of(&key);
        self.bucket(hash).upsert_or_delete(key, hash, f, &self.context())
    }

    /// Remove the slot holding `record` from the bucket selected by `hash`,
    /// unless `veto` returns `true` for it.
    ///
    /// This is the evictor's removal path; `hash` is the one reported with
    /// the slot's access notices.
    pub fn erase_record<F>(&self, hash: u64, record: RecordId, veto: F) -> EvictOutcome
    where
        F: FnOnce(&K, &V) -> bool,
    {
        self.bucket(hash).erase_record(hash, record, veto, &self.context())
    }

    /// Remove every slot, reporting a delete for each.
    pub fn clear(&self) {
        let ctx = self.context();
        for bucket in self.buckets.iter() {
            bucket.clear(|key| self.hash_of(key), &ctx);
        }
    }

    /// Remove every slot without notifying the observer, first handing each
    /// one to `f` with its bucket lock held.
    pub fn clear_with<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V, u64),
    {
        for bucket in self.buckets.iter() {
            let mut slots = bucket.slots.write();
            for slot in slots.iter() {
                f(&slot.key, &slot.value, self.hash_of(&slot.key));
            }
            self.len.fetch_sub(slots.len() as u64, Ordering::Relaxed);
            slots.clear();
        }
    }

    /// Run `f` on the value under `key` with the shared lock held.
    ///
    /// Does not notify the observer; `f` receives the slot's hash so it can
    /// report accesses of its own.
    pub fn read_with<R, F>(&self, key: &K, f: F) -> Option<R>
    where
        F: FnOnce(&V, u64) -> R,
    {
        let hash = self.hash_of(key);
        let slots = self.bucket(hash).slots.read();
        let idx = slots.binary_search_by(|slot| slot.key.cmp(key)).ok()?;
        Some(f(&slots[idx].value, hash))
    }

    /// Run `f` on the value under `key`, creating it with `create` if absent,
    /// all under one exclusive lock acquisition.
    ///
    /// Does not notify the observer. `f` receives the key, the value, and the
    /// slot's hash, and decides whether the slot stays.
    pub fn modify_or_insert_with<R, C, F>(&self, key: K, create: C, f: F) -> R
    where
        C: FnOnce() -> V,
        F: FnOnce(&K, &mut V, u64) -> (R, SlotAction),
    {
        let hash = self.hash_of(&key);
        let mut slots = self.bucket(hash).slots.write();
        let idx = match slots.binary_search_by(|slot| slot.key.cmp(&key)) {
            Ok(idx) => idx,
            Err(idx) => {
                slots.insert(
                    idx,
                    Slot {
                        key,
                        value: create(),
                        record: self.records.next(),
                    },
                );
                self.len.fetch_add(1, Ordering::Relaxed);
                idx
            }
        };

        let slot = &mut slots[idx];
        let (result, action) = f(&slot.key, &mut slot.value, hash);
        if action == SlotAction::Remove {
            slots.remove(idx);
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        result
    }

    /// Run `f` on the value under `key` if present, under the exclusive lock.
    ///
    /// Does not notify the observer. `f` decides whether the slot stays.
    pub fn modify<R, F>(&self, key: &K, f: F) -> Option<R>
    where
        F: FnOnce(&K, &mut V, u64) -> (R, SlotAction),
    {
        let hash = self.hash_of(key);
        let mut slots = self.bucket(hash).slots.write();
        let idx = slots.binary_search_by(|slot| slot.key.cmp(key)).ok()?;

        let slot = &mut slots[idx];
        let (result, action) = f(&slot.key, &mut slot.value, hash);
        if action == SlotAction::Remove {
            slots.remove(idx);
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        Some(result)
    }

    /// Scan the bucket selected by `hash` under the exclusive lock, stopping
    /// at the first slot for which `f` returns `Some`.
    ///
    /// Used to find a record stored inside a slot's value. Does not notify
    /// the observer.
    pub fn find_in_bucket_mut<R, F>(&self, hash: u64, mut f: F) -> Option<R>
    where
        F: FnMut(&K, &mut V) -> Option<(R, SlotAction)>,
    {
        let mut slots = self.bucket(hash).slots.write();
        for idx in 0..slots.len() {
            let slot = &mut slots[idx];
            if let Some((result, action)) = f(&slot.key, &mut slot.value) {
                if action == SlotAction::Remove {
                    slots.remove(idx);
                    self.len.fetch_sub(1, Ordering::Relaxed);
                }
                return Some(result);
            }
        }
        None
    }
}
