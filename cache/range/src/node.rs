//! Sorted, disjoint sub-ranges of one node window.
//!
//! A [`RangeNode`] holds every resident sub-range of one `(base, window)`.
//! Entries are kept sorted by start and pairwise disjoint at all times:
//!
//! ```text
//!   window:  |0 ............................................. 256|
//!   entries:    [10,20)     [40,60)  [60,64)          [200,256)
//! ```
//!
//! Erasing a span removes entries it covers, trims entries it overlaps at
//! one end, and splits an entry it falls strictly inside:
//!
//! ```text
//!   before:   [0 ........................................ 100)
//!   erase:                  [40 ...... 60)
//!   after:    [0 ......... 40)              [60 .......... 100)
//!              head, trimmed in place        tail, new record
//! ```
//!
//! Storage is a `SmallVec` with room for [`INLINE_RANGES`] entries that
//! doubles when a node needs more.

use crate::key::{RangeKey, Span};
use crate::sync::{AtomicU64, Ordering};
use cache_core::{
    AccessNotice, AccessObserver, AccessOp, ByteView, EvictOutcome, RecordId, RecordIds,
};
use smallvec::SmallVec;
use tracing::trace;

/// Entries stored inline before a node spills to the heap.
pub const INLINE_RANGES: usize = 8;

/// Node sizes above which lookups switch from a linear scan to binary search.
pub const BINARY_SEARCH_THRESHOLD: usize = 8;

/// One resident sub-range.
#[derive(Debug, Clone)]
pub struct RangeEntry {
    span: Span,
    value: ByteView,
    record: RecordId,
}

impl RangeEntry {
    /// Units this entry covers.
    #[inline]
    pub fn span(&self) -> Span {
        self.span
    }

    /// Bytes for exactly [`Self::span`].
    #[inline]
    pub fn value(&self) -> &ByteView {
        &self.value
    }

    /// Identity of this entry for the evictor.
    #[inline]
    pub fn record(&self) -> RecordId {
        self.record
    }
}

/// What node operations need from the map around them.
///
/// Passed explicitly to every operation that creates, touches, trims, or
/// removes an entry.
pub struct NodeContext<'a, B, O> {
    /// Base key of the node.
    pub base: &'a B,
    /// Hash of the node's key; reported with every notice.
    pub hash: u64,
    /// Receives a notice for every entry-level change.
    pub observer: &'a O,
    /// Issues record ids for new entries.
    pub records: &'a RecordIds,
    /// Running count of resident entries across the map.
    pub entries: &'a AtomicU64,
}

impl<B, O> NodeContext<'_, B, O>
where
    B: Clone,
    O: AccessObserver<RangeKey<B>, ByteView>,
{
    /// Report `op` on `entry` to the observer.
    pub fn notify(&self, entry: &RangeEntry, op: AccessOp) {
        match op {
            AccessOp::Create => {
                self.entries.fetch_add(1, Ordering::Relaxed);
            }
            AccessOp::Delete => {
                self.entries.fetch_sub(1, Ordering::Relaxed);
            }
            AccessOp::Access | AccessOp::Resize => {}
        }

        let key = RangeKey {
            base: self.base.clone(),
            offset: entry.span.start,
            count: entry.span.len() as u32,
        };
        self.observer.on_access(AccessNotice {
            key: &key,
            value: &entry.value,
            hash: self.hash,
            record: entry.record,
            op,
        });
    }
}

/// The sub-ranges of one node window.
#[derive(Debug, Default)]
pub struct RangeNode {
    entries: SmallVec<[RangeEntry; INLINE_RANGES]>,
}

impl RangeNode {
    /// Create an empty node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the node holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in ascending order.
    #[inline]
    pub fn entries(&self) -> &[RangeEntry] {
        &self.entries
    }

    /// Index of the first entry ending after `unit`.
    fn first_ending_after(&self, unit: u64) -> usize {
        if self.entries.len() <= BINARY_SEARCH_THRESHOLD {
            self.entries
                .iter()
                .position(|e| e.span.end > unit)
                .unwrap_or(self.entries.len())
        } else {
            self.entries.partition_point(|e| e.span.end <= unit)
        }
    }

    /// Insert `value` for `span` unless it overlaps an existing entry.
    ///
    /// Returns the new entry and `true`, or the first overlapping entry and
    /// `false`. A span identical to a resident one counts as an overlap.
    pub fn try_emplace<B, O>(
        &mut self,
        span: Span,
        value: ByteView,
        ctx: &NodeContext<'_, B, O>,
    ) -> (&RangeEntry, bool)
    where
        B: Clone,
        O: AccessObserver<RangeKey<B>, ByteView>,
    {
        debug_assert!(!span.is_empty(), "empty span");

        let idx = self.first_ending_after(span.start);
        if idx < self.entries.len() && self.entries[idx].span.start < span.end {
            return (&self.entries[idx], false);
        }

        let entry = RangeEntry {
            span,
            value,
            record: ctx.records.next(),
        };
        ctx.notify(&entry, AccessOp::Create);
        self.entries.insert(idx, entry);
        (&self.entries[idx], true)
    }

    /// Every entry intersecting `span`, in ascending order.
    pub fn find(&self, span: Span) -> Vec<&RangeEntry> {
        debug_assert!(!span.is_empty(), "empty span");

        let idx = self.first_ending_after(span.start);
        self.entries[idx..]
            .iter()
            .take_while(|e| e.span.start < span.end)
            .collect()
    }

    /// Remove the intersection of `span` with every entry, returning the
    /// number of units removed.
    ///
    /// `split(value, offset, count)` must return the part of `value` that
    /// covers `count` units starting `offset` units into it. It is used to
    /// trim entries overlapping `span` at one end, and twice to split an
    /// entry `span` falls strictly inside.
    pub fn erase<B, O, S>(&mut self, span: Span, split: S, ctx: &NodeContext<'_, B, O>) -> u64
    where
        B: Clone,
        O: AccessObserver<RangeKey<B>, ByteView>,
        S: Fn(&ByteView, u64, u64) -> ByteView,
    {
        debug_assert!(!span.is_empty(), "empty span");

        let mut idx = self.first_ending_after(span.start);
        if idx == self.entries.len() || self.entries[idx].span.start >= span.end {
            return 0;
        }

        let entry = &self.entries[idx];
        if entry.span.start < span.start && entry.span.end > span.end {
            let whole = entry.span;
            let head = Span::new(whole.start, span.start);
            let tail = Span::new(span.end, whole.end);
            let tail_value = split(&entry.value, tail.start - whole.start, tail.len());
            let head_value = split(&entry.value, 0, head.len());

            let entry = &mut self.entries[idx];
            entry.span = head;
            entry.value = head_value;
            ctx.notify(&self.entries[idx], AccessOp::Resize);

            let tail_entry = RangeEntry {
                span: tail,
                value: tail_value,
                record: ctx.records.next(),
            };
            ctx.notify(&tail_entry, AccessOp::Create);
            self.entries.insert(idx + 1, tail_entry);

            trace!(?whole, ?head, ?tail, "split entry");
            return span.len();
        }

        let mut removed = 0;

        // keep the head of an entry starting before the span
        if self.entries[idx].span.start < span.start {
            let entry = &mut self.entries[idx];
            let kept = Span::new(entry.span.start, span.start);
            removed += entry.span.end - span.start;
            entry.value = split(&entry.value, 0, kept.len());
            entry.span = kept;
            ctx.notify(&self.entries[idx], AccessOp::Resize);
            trace!(?kept, "trimmed entry tail");
            idx += 1;
        }

        let first = idx;
        while idx < self.entries.len() && self.entries[idx].span.end <= span.end {
            let entry = &self.entries[idx];
            removed += entry.span.len();
            ctx.notify(entry, AccessOp::Delete);
            trace!(span = ?entry.span, "erased entry");
            idx += 1;
        }
        self.entries.drain(first..idx);

        // keep the tail of an entry ending after the span
        if first < self.entries.len() && self.entries[first].span.start < span.end {
            let entry = &mut self.entries[first];
            let cut = span.end - entry.span.start;
            let kept = Span::new(span.end, entry.span.end);
            entry.value = split(&entry.value, cut, kept.len());
            entry.span = kept;
            removed += cut;
            ctx.notify(&self.entries[first], AccessOp::Resize);
            trace!(?kept, "trimmed entry head");
        }

        removed
    }

    /// Whether an entry with `record` is resident.
    pub fn contains_record(&self, record: RecordId) -> bool {
        self.entries.iter().any(|e| e.record == record)
    }

    /// Remove the entry holding `record` unless `veto` returns `true` for it.
    pub fn remove_record<B, O, F>(
        &mut self,
        record: RecordId,
        veto: F,
        ctx: &NodeContext<'_, B, O>,
    ) -> EvictOutcome
    where
        B: Clone,
        O: AccessObserver<RangeKey<B>, ByteView>,
        F: FnOnce(&RangeEntry) -> bool,
    {
        let Some(idx) = self.entries.iter().position(|e| e.record == record) else {
            return EvictOutcome::Missing;
        };
        if veto(&self.entries[idx]) {
            return EvictOutcome::Vetoed;
        }
        ctx.notify(&self.entries[idx], AccessOp::Delete);
        self.entries.remove(idx);
        EvictOutcome::Evicted
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::testing::RecordingObserver;

    struct Fixture {
        observer: RecordingObserver,
        records: RecordIds,
        entries: AtomicU64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                observer: RecordingObserver::default(),
                records: RecordIds::new(),
                entries: AtomicU64::new(0),
            }
        }

        fn ctx(&self) -> NodeContext<'_, u64, RecordingObserver> {
            NodeContext {
                base: &7,
                hash: 99,
                observer: &self.observer,
                records: &self.records,
                entries: &self.entries,
            }
        }
    }

    /// One byte per unit; byte `i` holds `i` (mod 256) of the whole window.
    fn bytes_for(span: Span) -> ByteView {
        ByteView::from((span.start..span.end).map(|u| u as u8).collect::<Vec<_>>())
    }

    fn split(value: &ByteView, offset: u64, count: u64) -> ByteView {
        value.slice(offset as usize..(offset + count) as usize)
    }

    fn spans(node: &RangeNode) -> Vec<Span> {
        node.entries().iter().map(|e| e.span()).collect()
    }

    fn assert_disjoint_sorted(node: &RangeNode) {
        for pair in node.entries().windows(2) {
            assert!(
                pair[0].span().end <= pair[1].span().start,
                "{:?} overlaps {:?}",
                pair[0].span(),
                pair[1].span()
            );
        }
    }

    fn assert_content(node: &RangeNode) {
        for entry in node.entries() {
            assert_eq!(entry.value().len() as u64, entry.span().len());
            assert_eq!(entry.value(), &bytes_for(entry.span()));
        }
    }

    #[test]
    fn test_try_emplace_disjoint() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();

        for span in [Span::new(20, 30), Span::new(0, 10), Span::new(40, 50)] {
            let (entry, inserted) = node.try_emplace(span, bytes_for(span), &fx.ctx());
            assert!(inserted);
            assert_eq!(entry.span(), span);
        }

        assert_eq!(
            spans(&node),
            vec![Span::new(0, 10), Span::new(20, 30), Span::new(40, 50)]
        );
        assert_eq!(fx.observer.ops(), vec![AccessOp::Create; 3]);
        assert_eq!(fx.entries.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_try_emplace_overlap_fails() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        node.try_emplace(Span::new(10, 20), bytes_for(Span::new(10, 20)), &fx.ctx());

        for span in [
            Span::new(10, 20),
            Span::new(5, 11),
            Span::new(19, 25),
            Span::new(12, 14),
            Span::new(0, 100),
        ] {
            let (existing, inserted) = node.try_emplace(span, bytes_for(span), &fx.ctx());
            assert!(!inserted, "{:?} should overlap", span);
            assert_eq!(existing.span(), Span::new(10, 20));
        }

        // touching at the boundary is not an overlap
        let span = Span::new(20, 25);
        let (_, inserted) = node.try_emplace(span, bytes_for(span), &fx.ctx());
        assert!(inserted);
        assert_eq!(node.len(), 2);
    }

    #[test]
    fn test_find() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        for span in [Span::new(0, 10), Span::new(20, 30), Span::new(40, 50)] {
            node.try_emplace(span, bytes_for(span), &fx.ctx());
        }

        let found: Vec<_> = node.find(Span::new(5, 45)).iter().map(|e| e.span()).collect();
        assert_eq!(
            found,
            vec![Span::new(0, 10), Span::new(20, 30), Span::new(40, 50)]
        );
        assert!(node.find(Span::new(10, 20)).is_empty());
        assert_eq!(node.find(Span::new(29, 30)).len(), 1);
        assert!(node.find(Span::new(50, 256)).is_empty());
    }

    #[test]
    fn test_erase_splits_strictly_containing_entry() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        node.try_emplace(Span::new(0, 100), bytes_for(Span::new(0, 100)), &fx.ctx());
        fx.observer.clear();

        let removed = node.erase(Span::new(40, 60), split, &fx.ctx());

        assert_eq!(removed, 20);
        assert_eq!(spans(&node), vec![Span::new(0, 40), Span::new(60, 100)]);
        assert_content(&node);
        assert_eq!(fx.observer.ops(), vec![AccessOp::Resize, AccessOp::Create]);
        assert_ne!(node.entries()[0].record(), node.entries()[1].record());
    }

    #[test]
    fn test_erase_trims_both_ends_and_removes_middle() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        for span in [
            Span::new(0, 10),
            Span::new(10, 20),
            Span::new(25, 30),
            Span::new(30, 40),
        ] {
            node.try_emplace(span, bytes_for(span), &fx.ctx());
        }
        fx.observer.clear();

        let removed = node.erase(Span::new(5, 35), split, &fx.ctx());

        assert_eq!(removed, 5 + 10 + 5 + 5);
        assert_eq!(spans(&node), vec![Span::new(0, 5), Span::new(35, 40)]);
        assert_content(&node);
        assert_eq!(
            fx.observer.ops(),
            vec![
                AccessOp::Resize,
                AccessOp::Delete,
                AccessOp::Delete,
                AccessOp::Resize
            ]
        );
        assert_eq!(fx.entries.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_erase_exact_entry() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        node.try_emplace(Span::new(10, 20), bytes_for(Span::new(10, 20)), &fx.ctx());

        assert_eq!(node.erase(Span::new(10, 20), split, &fx.ctx()), 10);
        assert!(node.is_empty());
    }

    #[test]
    fn test_erase_gap_is_noop() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        node.try_emplace(Span::new(0, 10), bytes_for(Span::new(0, 10)), &fx.ctx());
        node.try_emplace(Span::new(20, 30), bytes_for(Span::new(20, 30)), &fx.ctx());
        fx.observer.clear();

        assert_eq!(node.erase(Span::new(10, 20), split, &fx.ctx()), 0);
        assert_eq!(node.len(), 2);
        assert!(fx.observer.ops().is_empty());
    }

    #[test]
    fn test_erase_prefix_and_suffix() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        node.try_emplace(Span::new(10, 50), bytes_for(Span::new(10, 50)), &fx.ctx());

        assert_eq!(node.erase(Span::new(0, 20), split, &fx.ctx()), 10);
        assert_eq!(spans(&node), vec![Span::new(20, 50)]);

        assert_eq!(node.erase(Span::new(45, 100), split, &fx.ctx()), 5);
        assert_eq!(spans(&node), vec![Span::new(20, 45)]);
        assert_content(&node);
    }

    #[test]
    fn test_grows_past_inline_capacity_and_uses_binary_search() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();

        // 32 two-unit entries with one-unit gaps
        for i in 0..32u64 {
            let span = Span::new(i * 3, i * 3 + 2);
            assert!(node.try_emplace(span, bytes_for(span), &fx.ctx()).1);
        }
        assert_eq!(node.len(), 32);
        assert!(node.len() > BINARY_SEARCH_THRESHOLD);
        assert_disjoint_sorted(&node);

        let found = node.find(Span::new(31, 40));
        let found: Vec<_> = found.iter().map(|e| e.span()).collect();
        assert_eq!(
            found,
            vec![
                Span::new(30, 32),
                Span::new(33, 35),
                Span::new(36, 38),
                Span::new(39, 41)
            ]
        );

        // carving holes in many entries keeps the invariant
        for i in 0..32u64 {
            node.erase(Span::new(i * 3 + 1, i * 3 + 2), split, &fx.ctx());
        }
        assert_eq!(node.len(), 32);
        assert_disjoint_sorted(&node);
        assert_content(&node);
    }

    #[test]
    fn test_remove_record() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        node.try_emplace(Span::new(0, 10), bytes_for(Span::new(0, 10)), &fx.ctx());
        let record = node.entries()[0].record();

        assert_eq!(
            node.remove_record(record, |_| true, &fx.ctx()),
            EvictOutcome::Vetoed
        );
        assert!(node.contains_record(record));

        assert_eq!(
            node.remove_record(record, |_| false, &fx.ctx()),
            EvictOutcome::Evicted
        );
        assert!(node.is_empty());

        assert_eq!(
            node.remove_record(record, |_| false, &fx.ctx()),
            EvictOutcome::Missing
        );
    }

    #[test]
    fn test_notices_carry_range_key() {
        let fx = Fixture::new();
        let mut node = RangeNode::new();
        node.try_emplace(Span::new(3, 9), bytes_for(Span::new(3, 9)), &fx.ctx());

        let events = fx.observer.events.lock();
        let (key, _, op) = &events[0];
        assert_eq!(*op, AccessOp::Create);
        assert_eq!(
            key,
            &RangeKey {
                base: 7,
                offset: 3,
                count: 6
            }
        );
    }
}
