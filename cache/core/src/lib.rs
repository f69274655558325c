//! cache-core: shared building blocks for range-aware, size-bounded caches.
//!
//! This crate provides the pieces the concrete caches are assembled from:
//!
//! - **ByteView**: refcounted, zero-copy byte views used for every value
//! - **ShardedMap**: lock-striped map that reports every access to an observer
//! - **Eviction**: the pluggable `Evictor` interface and a partitioned LRU
//! - **Configuration**: `CacheConfig` loaded from TOML
//! - **Metrics**: per-cache and per-evictor counters plus `metriken` totals
//!
//! # Architecture
//!
//! ```text
//!          +-------------------------------+
//!          |   RangeCache / ScalarCache    |
//!          +-------------------------------+
//!               |                    ^
//!               | get/insert/erase   | evict_record (no locks held)
//!               v                    |
//!          +-------------+  notice  +------------------+
//!          | ShardedMap  | -------> |     Evictor      |
//!          | (RwLock per |  (under  | (Mutex per       |
//!          |   bucket)   |  bucket  |   partition,     |
//!          +-------------+   lock)  |   LRU list)      |
//!                                   +------------------+
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cache_core::{Evictor, LruEvictor};
//! use range_cache::RangeCache;
//! use std::sync::Arc;
//!
//! // 64MB over 8 partitions, shared by every cache built on it
//! let evictor: Arc<dyn Evictor> = Arc::new(LruEvictor::new(64 * 1024 * 1024, 8)?);
//! let blocks = RangeCache::<u64>::new(evictor.clone(), 16 * 1024, 4096)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core types
mod access;
mod byte_view;
mod config;
mod error;
mod record;
mod sync;

pub use access::{AccessNotice, AccessObserver, AccessOp};
pub use byte_view::ByteView;
pub use config::{
    CacheConfig, ConfigError, EvictorConfig, RangeConfig, ScalarConfig, parse_size,
};
pub use error::{CacheError, CacheResult};
pub use record::{RecordId, RecordIds};

// Storage
mod sharded_map;

pub use sharded_map::{ShardedMap, SlotAction};

// Eviction
mod eviction;

pub use eviction::{
    AccessEvent, EvictOutcome, EvictionReport, EvictionTarget, Evictor, EvictorObserver,
    FamilyId, FamilyRegistry, LruEvictor, Victim, Weigher,
};

// Metrics
pub mod metrics;

pub use metrics::{AtomicCounters, CounterSnapshot, EvictorStats, LookupKind};
