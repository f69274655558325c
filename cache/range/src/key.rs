//! Range keys, spans, and node windows.

use cache_core::{CacheError, CacheResult};
use std::fmt;
use std::hash::Hash;

/// Units covered by one node window.
///
/// A base's address space is cut into windows of this many units and each
/// window is stored as its own node, so nodes stay small enough to scan.
pub const NODE_SPAN: u64 = 256;

/// Requirements on a base key.
pub trait BaseKey: Hash + Ord + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> BaseKey for T where T: Hash + Ord + Clone + fmt::Debug + Send + Sync + 'static {}

/// A half-open interval `[start, end)` of units.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    /// First unit.
    pub start: u64,
    /// One past the last unit.
    pub end: u64,
}

impl Span {
    /// Create `[start, end)`.
    #[inline]
    pub const fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Span of `count` units starting at `offset`, rejecting empty and
    /// overflowing ranges.
    pub fn from_range(offset: u64, count: u32) -> CacheResult<Self> {
        if count == 0 {
            return Err(CacheError::InvalidArgument);
        }
        let end = offset
            .checked_add(count as u64)
            .ok_or(CacheError::RangeOverflow)?;
        Ok(Self { start: offset, end })
    }

    /// Number of units covered.
    #[inline]
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the span covers nothing.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the two spans share at least one unit.
    #[inline]
    pub const fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely inside this span.
    #[inline]
    pub const fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The units the two spans share, if any.
    #[inline]
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Span { start, end })
    }

    /// Split the span at node window boundaries.
    ///
    /// Yields `(window_start, piece)` pairs in ascending order; every piece
    /// lies inside `[window_start, window_start + NODE_SPAN)`.
    pub fn windows(&self) -> impl Iterator<Item = (u64, Span)> {
        let end = self.end;
        let mut cursor = self.start;
        std::iter::from_fn(move || {
            if cursor >= end {
                return None;
            }
            let window = cursor - cursor % NODE_SPAN;
            let piece_end = window.saturating_add(NODE_SPAN).min(end);
            let piece = Span::new(cursor, piece_end);
            cursor = piece_end;
            Some((window, piece))
        })
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A composite key naming `count` units starting at `offset` under `base`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeKey<B> {
    /// Grouping identifier the offsets are relative to.
    pub base: B,
    /// First unit.
    pub offset: u64,
    /// Number of units.
    pub count: u32,
}

impl<B> RangeKey<B> {
    /// Create a key, rejecting empty and overflowing ranges.
    pub fn new(base: B, offset: u64, count: u32) -> CacheResult<Self> {
        Span::from_range(offset, count)?;
        Ok(Self {
            base,
            offset,
            count,
        })
    }

    /// One past the last unit.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.count as u64
    }

    /// The units covered.
    #[inline]
    pub fn span(&self) -> Span {
        Span::new(self.offset, self.end())
    }
}

/// Identifies one node: a base and the first unit of its window.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey<B> {
    /// Base the node belongs to.
    pub base: B,
    /// First unit of the node's window; a multiple of [`NODE_SPAN`].
    pub window: u64,
}
