//! Sharded map from node windows to range nodes.
//!
//! `RangeHashMap` stores one [`RangeNode`] per `(base, window)` in a
//! [`ShardedMap`] and spreads every range operation over the windows it
//! touches. Each window is processed under its own bucket lock, so an
//! overwrite within one window (erase, then emplace) is atomic with respect
//! to every other operation on that window.
//!
//! The inner map has no observer. Access notices are emitted per sub-range
//! by the nodes, through this map's own observer `O`.

use crate::key::{BaseKey, NodeKey, RangeKey, Span};
use crate::node::{NodeContext, RangeEntry, RangeNode};
use crate::sync::{AtomicU64, Ordering};
use cache_core::{
    AccessObserver, AccessOp, ByteView, CacheError, CacheResult, EvictOutcome, RecordId,
    ShardedMap, SlotAction,
};
use smallvec::SmallVec;
use tracing::debug;

/// Node hashes touched by one insert. Most inserts stay inside one window.
pub type TouchedHashes = SmallVec<[u64; 2]>;

/// Map of range nodes keyed by `(base, window)`.
pub struct RangeHashMap<B, O = ()> {
    nodes: ShardedMap<NodeKey<B>, RangeNode>,
    observer: O,
    unit_size: u32,
    entries: AtomicU64,
}

impl<B, O> RangeHashMap<B, O>
where
    B: BaseKey,
    O: AccessObserver<RangeKey<B>, ByteView>,
{
    /// Create a map with `bucket_count` buckets for values of `unit_size`
    /// bytes per unit.
    pub fn new(bucket_count: usize, unit_size: u32, observer: O) -> CacheResult<Self> {
        if unit_size == 0 {
            return Err(CacheError::InvalidArgument);
        }
        Ok(Self {
            nodes: ShardedMap::new(bucket_count, ())?,
            observer,
            unit_size,
            entries: AtomicU64::new(0),
        })
    }

    /// Replace the observer, keeping the map's contents.
    pub fn with_observer<O2>(self, observer: O2) -> RangeHashMap<B, O2>
    where
        O2: AccessObserver<RangeKey<B>, ByteView>,
    {
        RangeHashMap {
            nodes: self.nodes,
            observer,
            unit_size: self.unit_size,
            entries: self.entries,
        }
    }

    /// Bytes per unit.
    #[inline]
    pub fn unit_size(&self) -> u32 {
        self.unit_size
    }

    /// The map's observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Number of resident sub-ranges.
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed) as usize
    }

    /// Whether no sub-range is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-empty nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn context<'a>(&'a self, base: &'a B, hash: u64) -> NodeContext<'a, B, O> {
        NodeContext {
            base,
            hash,
            observer: &self.observer,
            records: self.nodes.records(),
            entries: &self.entries,
        }
    }

    /// Byte range of `count` units starting `offset` units into a value.
    #[inline]
    fn byte_range(&self, offset: u64, count: u64) -> std::ops::Range<usize> {
        let unit = self.unit_size as usize;
        let start = offset as usize * unit;
        start..start + count as usize * unit
    }

    fn split(&self) -> impl Fn(&ByteView, u64, u64) -> ByteView + '_ {
        move |value, offset, count| value.slice(self.byte_range(offset, count))
    }

    /// Store `value` for `span` under `base`, first erasing whatever
    /// overlaps it.
    ///
    /// `value` must hold exactly `span.len() * unit_size` bytes. Returns the
    /// hash of every node written, for the caller to run eviction on.
    pub fn insert(&self, base: &B, span: Span, value: ByteView) -> TouchedHashes {
        debug_assert!(!span.is_empty(), "empty span");
        debug_assert_eq!(
            value.len() as u64,
            span.len() * self.unit_size as u64,
            "value does not match span"
        );

        let mut touched = TouchedHashes::new();
        for (window, piece) in span.windows() {
            let piece_value = value.slice(self.byte_range(piece.start - span.start, piece.len()));
            let key = NodeKey {
                base: base.clone(),
                window,
            };
            let hash = self
                .nodes
                .modify_or_insert_with(key, RangeNode::new, |key, node, hash| {
                    let ctx = self.context(&key.base, hash);
                    node.erase(piece, self.split(), &ctx);
                    let (_, inserted) = node.try_emplace(piece, piece_value, &ctx);
                    debug_assert!(inserted, "emplace after erase overlapped");
                    (hash, SlotAction::Keep)
                });
            touched.push(hash);
        }
        touched
    }

    /// Every resident piece of `span` under `base`, in ascending order.
    ///
    /// Each piece is clipped to `span` and split at node window boundaries;
    /// its bytes are a zero-copy view of the stored value. Every sub-range
    /// a piece came from is reported as accessed.
    pub fn get(&self, base: &B, span: Span) -> Vec<(RangeKey<B>, ByteView)> {
        let mut pieces = Vec::new();
        for (window, piece) in span.windows() {
            let key = NodeKey {
                base: base.clone(),
                window,
            };
            self.nodes.read_with(&key, |node, hash| {
                let ctx = self.context(base, hash);
                for entry in node.find(piece) {
                    ctx.notify(entry, AccessOp::Access);
                    if let Some(hit) = self.clip(base, entry, piece) {
                        pieces.push(hit);
                    }
                }
            });
        }
        pieces
    }

    fn clip(&self, base: &B, entry: &RangeEntry, span: Span) -> Option<(RangeKey<B>, ByteView)> {
        let stored = entry.span();
        let hit = stored.intersect(&span)?;
        let value = if hit == stored {
            entry.value().clone()
        } else {
            entry
                .value()
                .slice(self.byte_range(hit.start - stored.start, hit.len()))
        };
        let key = RangeKey {
            base: base.clone(),
            offset: hit.start,
            count: hit.len() as u32,
        };
        Some((key, value))
    }

    /// Erase the intersection of `span` with everything stored under
    /// `base`, returning the number of units removed.
    pub fn erase(&self, base: &B, span: Span) -> u64 {
        let mut removed = 0;
        for (window, piece) in span.windows() {
            let key = NodeKey {
                base: base.clone(),
                window,
            };
            removed += self
                .nodes
                .modify(&key, |key, node, hash| {
                    let ctx = self.context(&key.base, hash);
                    let removed = node.erase(piece, self.split(), &ctx);
                    (removed, prune(key, node))
                })
                .unwrap_or(0);
        }
        removed
    }

    /// Remove the sub-range holding `record` from the node hashed to `hash`,
    /// unless `veto` returns `true` for it.
    pub fn erase_record<F>(&self, hash: u64, record: RecordId, veto: F) -> EvictOutcome
    where
        F: Fn(&RangeKey<B>, &ByteView) -> bool,
    {
        self.nodes
            .find_in_bucket_mut(hash, |key, node| {
                if !node.contains_record(record) {
                    return None;
                }
                let ctx = self.context(&key.base, self.nodes.hash_of(key));
                let outcome = node.remove_record(
                    record,
                    |entry| {
                        let span = entry.span();
                        let range = RangeKey {
                            base: key.base.clone(),
                            offset: span.start,
                            count: span.len() as u32,
                        };
                        veto(&range, entry.value())
                    },
                    &ctx,
                );
                Some((outcome, prune(key, node)))
            })
            .unwrap_or(EvictOutcome::Missing)
    }

    /// Remove every sub-range, reporting a delete for each.
    pub fn clear(&self) {
        self.nodes.clear_with(|key, node, hash| {
            let ctx = self.context(&key.base, hash);
            for entry in node.entries() {
                ctx.notify(entry, AccessOp::Delete);
            }
        });
    }
}

fn prune<B: BaseKey>(key: &NodeKey<B>, node: &RangeNode) -> SlotAction {
    if node.is_empty() {
        debug!(base = ?key.base, window = key.window, "pruned empty node");
        SlotAction::Remove
    } else {
        SlotAction::Keep
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::testing::RecordingObserver;

    const UNIT: u32 = 4;

    fn map() -> RangeHashMap<u64, RecordingObserver> {
        RangeHashMap::new(16, UNIT, RecordingObserver::default()).unwrap()
    }

    /// `UNIT` bytes per unit, each holding the low byte of its unit index.
    fn value_for(span: Span, tag: u8) -> ByteView {
        let mut bytes = Vec::with_capacity((span.len() * UNIT as u64) as usize);
        for unit in span.start..span.end {
            bytes.extend_from_slice(&[unit as u8, tag, tag, tag]);
        }
        ByteView::from(bytes)
    }

    fn spans(pieces: &[(RangeKey<u64>, ByteView)]) -> Vec<Span> {
        pieces.iter().map(|(key, _)| key.span()).collect()
    }

    #[test]
    fn test_zero_unit_size_rejected() {
        assert!(RangeHashMap::<u64>::new(16, 0, ()).is_err());
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let map = map();
        let span = Span::new(10, 20);
        let touched = map.insert(&1, span, value_for(span, 0xa));
        assert_eq!(touched.len(), 1);

        let pieces = map.get(&1, span);
        assert_eq!(spans(&pieces), vec![span]);
        assert_eq!(pieces[0].1, value_for(span, 0xa));
        assert_eq!(map.len(), 1);
        assert_eq!(map.node_count(), 1);
    }

    #[test]
    fn test_get_clips_to_request() {
        let map = map();
        map.insert(&1, Span::new(0, 100), value_for(Span::new(0, 100), 1));

        let pieces = map.get(&1, Span::new(30, 40));
        assert_eq!(spans(&pieces), vec![Span::new(30, 40)]);
        assert_eq!(pieces[0].1, value_for(Span::new(30, 40), 1));
    }

    #[test]
    fn test_insert_overwrites_overlap() {
        let map = map();
        map.insert(&1, Span::new(0, 10), value_for(Span::new(0, 10), 0xa));
        map.insert(&1, Span::new(5, 15), value_for(Span::new(5, 15), 0xb));

        let pieces = map.get(&1, Span::new(0, 15));
        assert_eq!(spans(&pieces), vec![Span::new(0, 5), Span::new(5, 15)]);
        assert_eq!(pieces[0].1, value_for(Span::new(0, 5), 0xa));
        assert_eq!(pieces[1].1, value_for(Span::new(5, 15), 0xb));
    }

    #[test]
    fn test_insert_across_windows() {
        let map = map();
        let span = Span::new(250, 600);
        let touched = map.insert(&3, span, value_for(span, 7));
        assert_eq!(touched.len(), 3);
        assert_eq!(map.node_count(), 3);

        let pieces = map.get(&3, span);
        assert_eq!(
            spans(&pieces),
            vec![Span::new(250, 256), Span::new(256, 512), Span::new(512, 600)]
        );
        let joined: Vec<u8> = pieces.iter().flat_map(|(_, v)| v.iter().copied()).collect();
        assert_eq!(ByteView::from(joined), value_for(span, 7));
    }

    #[test]
    fn test_bases_are_independent() {
        let map = map();
        map.insert(&1, Span::new(0, 10), value_for(Span::new(0, 10), 1));
        map.insert(&2, Span::new(0, 10), value_for(Span::new(0, 10), 2));

        assert_eq!(map.get(&1, Span::new(0, 10))[0].1, value_for(Span::new(0, 10), 1));
        assert_eq!(map.get(&2, Span::new(0, 10))[0].1, value_for(Span::new(0, 10), 2));
        assert!(map.get(&3, Span::new(0, 10)).is_empty());
    }

    #[test]
    fn test_erase_prunes_empty_nodes() {
        let map = map();
        map.insert(&1, Span::new(0, 300), value_for(Span::new(0, 300), 1));
        assert_eq!(map.node_count(), 2);

        assert_eq!(map.erase(&1, Span::new(0, 256)), 256);
        assert_eq!(map.node_count(), 1);
        assert_eq!(map.erase(&1, Span::new(0, 1000)), 44);
        assert_eq!(map.node_count(), 0);
        assert!(map.is_empty());
        assert_eq!(map.erase(&1, Span::new(0, 10)), 0);
    }

    #[test]
    fn test_get_reports_access_per_entry() {
        let map = map();
        map.insert(&1, Span::new(0, 10), value_for(Span::new(0, 10), 1));
        map.insert(&1, Span::new(20, 30), value_for(Span::new(20, 30), 1));
        map.observer().clear();

        let pieces = map.get(&1, Span::new(0, 30));
        assert_eq!(pieces.len(), 2);
        assert_eq!(map.observer().ops(), vec![AccessOp::Access; 2]);

        map.observer().clear();
        assert!(map.get(&1, Span::new(10, 20)).is_empty());
        assert!(map.observer().ops().is_empty());
    }

    #[test]
    fn test_erase_record() {
        let map = map();
        map.insert(&1, Span::new(0, 10), value_for(Span::new(0, 10), 1));
        let (key, record, hash) = {
            let events = map.observer().events.lock();
            let (key, record, _) = events[0].clone();
            (key, record, map.observer().hashes.lock()[0])
        };
        assert_eq!(key.span(), Span::new(0, 10));

        assert_eq!(
            map.erase_record(hash, record, |k, _| k.offset == 0),
            EvictOutcome::Vetoed
        );
        assert_eq!(map.erase_record(hash, record, |_, _| false), EvictOutcome::Evicted);
        assert_eq!(map.erase_record(hash, record, |_, _| false), EvictOutcome::Missing);
        assert_eq!(map.node_count(), 0);
    }

    #[test]
    fn test_clear() {
        let map = map();
        for base in 0..8u64 {
            map.insert(&base, Span::new(0, 10), value_for(Span::new(0, 10), 1));
        }
        map.observer().clear();

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.node_count(), 0);
        assert_eq!(map.observer().ops(), vec![AccessOp::Delete; 8]);
    }
}
