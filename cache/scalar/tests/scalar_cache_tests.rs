//! Eviction and concurrency tests for ScalarCache.

use cache_core::{Evictor, LruEvictor};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use scalar_cache::{PreventEviction, ScalarCache};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const VALUE_SIZE: u32 = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Object {
    id: u64,
    version: u32,
    pinned: bool,
}

fn object(id: u64) -> Object {
    Object {
        id,
        ..Default::default()
    }
}

fn lru(max_size: u64, partitions: usize) -> Arc<dyn Evictor> {
    Arc::new(LruEvictor::new(max_size, partitions).expect("valid evictor"))
}

fn create_cache(
    evictor: &Arc<dyn Evictor>,
    prevent_eviction: Option<PreventEviction<Object>>,
) -> ScalarCache<u64, Object> {
    ScalarCache::new(
        evictor.clone(),
        256,
        VALUE_SIZE,
        |object: &Object| object.id,
        prevent_eviction,
    )
    .expect("valid cache")
}

// =============================================================================
// Eviction Order
// =============================================================================

#[test]
fn test_access_protects_from_eviction() {
    let evictor = lru(3 * VALUE_SIZE as u64, 1);
    let cache = create_cache(&evictor, None);

    cache.insert(object(1));
    cache.insert(object(2));
    cache.insert(object(3));
    assert!(cache.get(&1).is_some());
    cache.insert(object(4));

    assert!(cache.contains(&1));
    assert!(!cache.contains(&2));
    assert!(cache.contains(&3));
    assert!(cache.contains(&4));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_without_access_oldest_goes_first() {
    let evictor = lru(3 * VALUE_SIZE as u64, 1);
    let cache = create_cache(&evictor, None);

    for id in 1..=5 {
        cache.insert(object(id));
    }

    assert!(!cache.contains(&1));
    assert!(!cache.contains(&2));
    for id in 3..=5 {
        assert!(cache.contains(&id));
    }
}

#[test]
fn test_contains_does_not_refresh() {
    let evictor = lru(2 * VALUE_SIZE as u64, 1);
    let cache = create_cache(&evictor, None);

    cache.insert(object(1));
    cache.insert(object(2));
    assert!(cache.contains(&1));
    cache.insert(object(3));

    assert!(!cache.contains(&1));
    assert!(cache.contains(&2));
}

#[test]
fn test_eviction_bound() {
    let max_size = 64 * VALUE_SIZE as u64;
    let evictor = lru(max_size, 4);
    let cache = create_cache(&evictor, None);

    for id in 0..10_000 {
        cache.insert(object(id));
        assert!(evictor.resident_bytes() <= max_size + VALUE_SIZE as u64);
    }
    assert_eq!(evictor.stats().records, cache.len() as u64);
    assert!(cache.len() <= 64);
}

#[test]
fn test_pinned_entries_are_skipped() {
    let evictor = lru(8 * VALUE_SIZE as u64, 1);
    let cache = create_cache(&evictor, Some(Box::new(|object: &Object| object.pinned)));

    cache.insert(Object {
        id: 0,
        version: 0,
        pinned: true,
    });
    for id in 1..100 {
        cache.insert(object(id));
    }

    assert!(cache.contains(&0));
    assert!(evictor.stats().punts > 0);
    assert_eq!(cache.len(), 8);
}

#[test]
fn test_unpinning_allows_eviction() {
    let evictor = lru(4 * VALUE_SIZE as u64, 1);
    let cache = create_cache(&evictor, Some(Box::new(|object: &Object| object.pinned)));

    cache.insert(Object {
        id: 0,
        version: 0,
        pinned: true,
    });
    for id in 1..10 {
        cache.insert(object(id));
    }
    assert!(cache.contains(&0));

    cache.update(&0, |object| object.pinned = false);
    for id in 10..20 {
        cache.insert(object(id));
    }
    assert!(!cache.contains(&0));
}

#[test]
fn test_predicate_can_read_external_state() {
    let hold = Arc::new(AtomicBool::new(true));
    let evictor = lru(2 * VALUE_SIZE as u64, 1);
    let flag = hold.clone();
    let cache = create_cache(
        &evictor,
        Some(Box::new(move |object: &Object| {
            object.id == 1 && flag.load(Ordering::Relaxed)
        })),
    );

    cache.insert(object(1));
    cache.insert(object(2));
    cache.insert(object(3));
    assert!(cache.contains(&1));

    hold.store(false, Ordering::Relaxed);
    cache.insert(object(4));
    assert!(!cache.contains(&1));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_refcounts() {
    let evictor = lru(1 << 20, 4);
    let cache = create_cache(&evictor, None);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    for key in 0..16u64 {
                        cache.upsert_or_delete(key, |object, _| {
                            object.version += 1;
                            false
                        });
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..16u64 {
        assert_eq!(cache.get(&key).map(|object| object.version), Some(4000));
    }

    // release every reference, deleting at zero
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    for key in 0..16u64 {
                        cache.upsert_or_delete(key, |object, existed| {
                            assert!(existed);
                            object.version -= 1;
                            object.version == 0
                        });
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.is_empty());
    assert_eq!(evictor.resident_bytes(), 0);
}

#[test]
fn test_concurrent_mixed_with_eviction() {
    let max_size = 128 * VALUE_SIZE as u64;
    let evictor = lru(max_size, 4);
    let cache = create_cache(&evictor, None);

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(t);
                for _ in 0..20_000 {
                    let id = rng.random_range(0..1024u64);
                    match rng.random_range(0..10) {
                        0..=3 => {
                            cache.upsert(Object {
                                id,
                                version: t as u32,
                                pinned: false,
                            });
                        }
                        4 => {
                            cache.remove(&id);
                        }
                        _ => {
                            if let Some(object) = cache.get(&id) {
                                assert_eq!(object.id, id);
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(evictor.stats().records, cache.len() as u64);
    assert!(evictor.resident_bytes() <= max_size);
    assert!(cache.stats().evictions > 0);
}
