//! Concurrent cache for byte ranges with split-on-overlap semantics.
//!
//! Data is addressed by a base key (a file or chunk id) plus a half-open
//! range of fixed-size units under it. Resident sub-ranges of one base never
//! overlap: inserting over existing data trims, splits, or drops exactly the
//! overlapping parts, and lookups return whatever part of a request is
//! resident, leaving the gaps for the caller to fill from the backing store.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------+
//! |                  RangeCache                     |
//! |                                                 |
//! |  +-------------------------------------------+  |
//! |  | RangeHashMap                              |  |
//! |  | - ShardedMap<(base, window), RangeNode>   |  |
//! |  | - one node per 256-unit window            |  |
//! |  | - sorted, disjoint sub-ranges per node    |  |
//! |  +-------------------------------------------+  |
//! |        |  create / access / resize / delete     |
//! |        v                                        |
//! |  +-------------------------------------------+  |
//! |  | Evictor (shared, e.g. LruEvictor)         |  |
//! |  +-------------------------------------------+  |
//! +-------------------------------------------------+
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cache_core::{Evictor, LruEvictor};
//! use range_cache::RangeCache;
//! use std::sync::Arc;
//!
//! let evictor: Arc<dyn Evictor> = Arc::new(LruEvictor::new(64 * 1024 * 1024, 8)?);
//! let cache = RangeCache::<u64>::new(evictor, 16 * 1024, 4096)?;
//!
//! // two 4KB blocks of file 7
//! cache.insert(&7, 10, 2, vec![0u8; 8192])?;
//!
//! let lookup = cache.lookup(&7, 8, 6)?;
//! for (range, bytes) in lookup.pieces() {
//!     println!("{:?}: {} bytes", range, bytes.len());
//! }
//! for gap in lookup.gaps() {
//!     println!("miss: {:?}", gap);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod key;
mod map;
mod node;
mod sync;

pub use cache::{PreventEviction, RangeCache, RangeLookup};
pub use key::{BaseKey, NODE_SPAN, NodeKey, RangeKey, Span};
pub use map::{RangeHashMap, TouchedHashes};
pub use node::{BINARY_SEARCH_THRESHOLD, INLINE_RANGES, NodeContext, RangeEntry, RangeNode};

// Re-export common types from cache-core
pub use cache_core::{ByteView, CacheError, CacheResult, CounterSnapshot, Evictor, LookupKind};
