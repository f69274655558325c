//! Eviction policies.
//!
//! - [`Evictor`]: the pluggable policy interface, fed with [`AccessEvent`]s
//! - [`LruEvictor`]: partitioned LRU implementation
//! - [`EvictionTarget`]: a store's removal path, called back by the evictor
//! - [`EvictorObserver`]: adapts a store's access notices into evictor events
//!
//! # Protocol
//!
//! 1. A store reports each create, access, resize, and delete while it holds
//!    the bucket lock. The evictor only updates its own partition.
//! 2. Once the bucket lock is released, the store calls [`Evictor::evict`]
//!    for the partition it grew.
//! 3. The evictor picks victims, releases its partition lock, and asks each
//!    victim's store to remove it. The store may veto (pinned entries); the
//!    evictor then moves on to the next least recently used record.
//!
//! Locks are only ever taken in the order bucket, then partition.

mod family;
mod lru;
mod observer;
mod policy;

pub use family::FamilyRegistry;
pub use lru::LruEvictor;
pub use observer::{EvictorObserver, Weigher};
pub use policy::{
    AccessEvent, EvictOutcome, EvictionReport, EvictionTarget, Evictor, FamilyId, Victim,
};
