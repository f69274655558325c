//! Partitioned LRU evictor.
//!
//! # Design
//!
//! - Records are spread over `N` partitions by `hash % N`; each partition has
//!   a budget of `max_size / N` bytes and its own mutex
//! - A partition keeps its records on a doubly-linked recency list whose
//!   nodes live in an arena (`Vec` + free list), indexed by
//!   `(family, record)` for O(1) access and removal
//! - `Create` links at the MRU end, `Access` moves to the MRU end, `Delete`
//!   unlinks from anywhere
//!
//! ```text
//!   head (LRU)                                   tail (MRU)
//!      |                                             |
//!      v                                             v
//!   [ node ] <-> [ node ] <-> [ node ] <-> ... <-> [ node ]
//!      ^ victims are taken from here
//! ```
//!
//! Eviction never holds a partition lock while calling into a store: victims
//! are picked under the lock, the lock is released, then each victim's store
//! is asked to remove it. The store's removal reports a `Delete`, which is
//! what finally unlinks the record and releases its bytes.

use super::family::FamilyRegistry;
use super::policy::{
    AccessEvent, EvictOutcome, EvictionReport, EvictionTarget, Evictor, FamilyId, Victim,
};
use crate::access::AccessOp;
use crate::config::EvictorConfig;
use crate::error::{CacheError, CacheResult};
use crate::metrics::{CACHE_OBJECT_COUNT, CACHE_SIZE, EvictorCounters, EvictorStats};
use crate::record::RecordId;
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Weak;
use std::sync::atomic::Ordering;
use tracing::{debug, trace, warn};

/// Sentinel index for "no node".
const NIL: u32 = u32::MAX;

/// Most victims picked per partition lock acquisition.
const MAX_VICTIMS_PER_ROUND: usize = 32;

type RecordKey = (FamilyId, RecordId);

#[derive(Debug)]
struct LruNode {
    family: FamilyId,
    record: RecordId,
    hash: u64,
    size: u32,
    prev: u32,
    next: u32,
}

/// One partition: a recency list plus its byte accounting.
struct LruPartition {
    nodes: Vec<LruNode>,
    free: Vec<u32>,
    index: HashMap<RecordKey, u32, RandomState>,
    head: u32,
    tail: u32,
    filled: u64,
    budget: u64,
}

impl LruPartition {
    fn new(budget: u64) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::with_hasher(RandomState::new()),
            head: NIL,
            tail: NIL,
            filled: 0,
            budget,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn is_over_budget(&self) -> bool {
        self.filled > self.budget
    }

    fn link_back(&mut self, idx: u32) {
        let old_tail = self.tail;
        {
            let node = &mut self.nodes[idx as usize];
            node.prev = old_tail;
            node.next = NIL;
        }
        if old_tail == NIL {
            self.head = idx;
        } else {
            self.nodes[old_tail as usize].next = idx;
        }
        self.tail = idx;
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let node = &self.nodes[idx as usize];
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next as usize].prev = prev;
        }
    }

    /// Link a new record at the MRU end. Returns `false` if it was already
    /// tracked.
    fn insert(&mut self, family: FamilyId, record: RecordId, hash: u64, size: u32) -> bool {
        let key = (family, record);
        if self.index.contains_key(&key) {
            return false;
        }

        let node = LruNode {
            family,
            record,
            hash,
            size,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        };

        self.link_back(idx);
        self.index.insert(key, idx);
        self.filled += size as u64;
        true
    }

    /// Move a record to the MRU end.
    fn touch(&mut self, key: RecordKey) -> bool {
        let Some(&idx) = self.index.get(&key) else {
            return false;
        };
        if self.tail != idx {
            self.unlink(idx);
            self.link_back(idx);
        }
        true
    }

    /// Change a record's size in place, returning the old size.
    fn resize(&mut self, key: RecordKey, size: u32) -> Option<u32> {
        let &idx = self.index.get(&key)?;
        let node = &mut self.nodes[idx as usize];
        let old = node.size;
        node.size = size;
        self.filled = self.filled - old as u64 + size as u64;
        Some(old)
    }

    /// Unlink a record, returning its size.
    fn remove(&mut self, key: RecordKey) -> Option<u32> {
        let idx = self.index.remove(&key)?;
        self.unlink(idx);
        self.free.push(idx);
        let size = self.nodes[idx as usize].size;
        self.filled -= size as u64;
        Some(size)
    }

    /// Drop every record of `family`, returning `(records, bytes)`.
    fn purge_family(&mut self, family: FamilyId) -> (u64, u64) {
        let keys: Vec<RecordKey> = self
            .index
            .keys()
            .filter(|(f, _)| *f == family)
            .copied()
            .collect();

        let mut bytes = 0;
        for key in &keys {
            if let Some(size) = self.remove(*key) {
                bytes += size as u64;
            }
        }
        (keys.len() as u64, bytes)
    }

    /// Walk from the LRU end collecting enough victims to cover the overflow,
    /// passing over records for which `excluded` returns `true`.
    fn victims(&self, excluded: impl Fn(&RecordKey) -> bool) -> Vec<Victim> {
        let mut victims = Vec::new();
        if !self.is_over_budget() {
            return victims;
        }

        let overflow = self.filled - self.budget;
        let mut covered = 0u64;
        let mut idx = self.head;
        while idx != NIL && covered < overflow && victims.len() < MAX_VICTIMS_PER_ROUND {
            let node = &self.nodes[idx as usize];
            if !excluded(&(node.family, node.record)) {
                covered += node.size as u64;
                victims.push(Victim {
                    family: node.family,
                    hash: node.hash,
                    record: node.record,
                    size: node.size,
                });
            }
            idx = node.next;
        }
        victims
    }

    #[cfg(test)]
    fn order(&self) -> Vec<RecordId> {
        let mut order = Vec::new();
        let mut idx = self.head;
        while idx != NIL {
            let node = &self.nodes[idx as usize];
            order.push(node.record);
            idx = node.next;
        }
        order
    }
}

/// An [`Evictor`] keeping one LRU list per partition.
pub struct LruEvictor {
    partitions: Box<[Mutex<LruPartition>]>,
    families: FamilyRegistry,
    max_size: u64,
    counters: EvictorCounters,
}

impl LruEvictor {
    /// Create an evictor with a total budget of `max_size` bytes split
    /// evenly over `partitions` partitions.
    pub fn new(max_size: u64, partitions: usize) -> CacheResult<Self> {
        if max_size == 0 || partitions == 0 {
            return Err(CacheError::InvalidArgument);
        }

        let budget = max_size / partitions as u64;
        let partitions = (0..partitions)
            .map(|_| Mutex::new(LruPartition::new(budget)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            partitions,
            families: FamilyRegistry::new(),
            max_size,
            counters: EvictorCounters::default(),
        })
    }

    /// Create an evictor from configuration.
    pub fn from_config(config: &EvictorConfig) -> CacheResult<Self> {
        Self::new(config.max_size, config.partitions)
    }

    /// Byte budget of each partition.
    pub fn partition_budget(&self) -> u64 {
        self.max_size / self.partitions.len() as u64
    }

    /// Number of records tracked.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.lock().len()).sum()
    }

    /// Whether no records are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn partition(&self, hash: u64) -> &Mutex<LruPartition> {
        &self.partitions[(hash % self.partitions.len() as u64) as usize]
    }
}

impl Evictor for LruEvictor {
    fn register_family(&self, target: Weak<dyn EvictionTarget>) -> FamilyId {
        let family = self.families.register(target);
        debug!(family = family.as_raw(), "registered record family");
        family
    }

    fn unregister_family(&self, family: FamilyId) {
        self.families.unregister(family);

        let mut records = 0;
        let mut bytes = 0;
        for partition in self.partitions.iter() {
            let (r, b) = partition.lock().purge_family(family);
            records += r;
            bytes += b;
        }
        CACHE_OBJECT_COUNT.sub(records as i64);
        CACHE_SIZE.sub(bytes as i64);
        debug!(
            family = family.as_raw(),
            records, bytes, "unregistered record family"
        );
    }

    fn record_access(&self, event: AccessEvent) {
        let key = (event.family, event.record);
        let mut partition = self.partition(event.hash).lock();
        match event.op {
            AccessOp::Create => {
                if partition.insert(event.family, event.record, event.hash, event.size) {
                    CACHE_OBJECT_COUNT.increment();
                    CACHE_SIZE.add(event.size as i64);
                } else {
                    warn!(record = ?event.record, "create for a record already tracked");
                }
            }
            AccessOp::Access => {
                if !partition.touch(key) {
                    warn!(record = ?event.record, "access for an untracked record");
                }
            }
            AccessOp::Resize => match partition.resize(key, event.size) {
                Some(old) => {
                    CACHE_SIZE.add(event.size as i64 - old as i64);
                }
                None => warn!(record = ?event.record, "resize for an untracked record"),
            },
            AccessOp::Delete => match partition.remove(key) {
                Some(size) => {
                    CACHE_OBJECT_COUNT.decrement();
                    CACHE_SIZE.sub(size as i64);
                }
                None => warn!(record = ?event.record, "delete for an untracked record"),
            },
        }
    }

    fn should_evict(&self, hash: u64) -> bool {
        self.partition(hash).lock().is_over_budget()
    }

    fn select_victims(&self, hash: u64, exclude: &[(FamilyId, RecordId)]) -> Vec<Victim> {
        self.partition(hash).lock().victims(|key| exclude.contains(key))
    }

    fn evict(&self, hash: u64) -> EvictionReport {
        let mut report = EvictionReport::default();
        let mut skipped: HashSet<RecordKey, RandomState> = HashSet::default();

        // A candidate is offered at most once per call, so the walk ends when
        // the partition fits or every record in it has been tried.
        loop {
            let victims = self
                .partition(hash)
                .lock()
                .victims(|key| skipped.contains(key));
            if victims.is_empty() {
                report.starved = self.should_evict(hash);
                break;
            }

            for victim in victims {
                skipped.insert(victim.key());
                let outcome = match self.families.get(victim.family) {
                    Some(target) => target.evict_record(victim.hash, victim.record),
                    None => EvictOutcome::Missing,
                };
                match outcome {
                    EvictOutcome::Evicted => {
                        trace!(record = ?victim.record, size = victim.size, "evicted");
                        report.evicted += 1;
                        report.evicted_bytes += victim.size as u64;
                    }
                    EvictOutcome::Vetoed => report.punts += 1,
                    EvictOutcome::Missing => {}
                }
            }
        }

        self.counters.record_evictions(report.evicted);
        self.counters.record_punts(report.punts);
        if report.punts > 0 {
            debug!(punts = report.punts, "eviction candidates vetoed");
        }
        if report.starved {
            self.counters.record_starvation();
            warn!(
                partition = hash % self.partitions.len() as u64,
                "no evictable records, partition stays over budget"
            );
        }
        report
    }

    fn max_size(&self) -> u64 {
        self.max_size
    }

    fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    fn resident_bytes(&self) -> u64 {
        self.partitions.iter().map(|p| p.lock().filled).sum()
    }

    fn stats(&self) -> EvictorStats {
        let (resident_bytes, records) =
            self.partitions.iter().fold((0, 0), |(bytes, records), p| {
                let p = p.lock();
                (bytes + p.filled, records + p.len() as u64)
            });
        EvictorStats {
            resident_bytes,
            records,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            punts: self.counters.punts.load(Ordering::Relaxed),
            starvations: self.counters.starvations.load(Ordering::Relaxed),
        }
    }
}
