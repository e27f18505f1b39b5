use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::backend::MemoryBackend;
use crate::key::{Key, Value};

#[test]
fn test_default_capacity_matches_store_options() {
    // §4.8/§6's default of 5000, mirrored by `StoreOptions` in
    // `src/database.rs` — the two must not drift apart.
    assert_eq!(DEFAULT_CAPACITY, 5000);
}

#[test]
fn test_lru_never_exceeds_capacity_under_random_access() {
    let mut rng = StdRng::seed_from_u64(0xCAFE_1234);
    let capacity = 16;
    let mut cached = CachedBackend::with_capacity(MemoryBackend::new(), capacity);
    cached.create_table("t").unwrap();

    let mut last_touched = Key::Int(0);
    for _ in 0..2000 {
        let k = Key::Int(rng.gen_range(0..500));
        cached.put("t", k.clone(), Value::Int(1)).unwrap();
        // Re-reading the same key right after a write must hit the
        // cache and count as the most-recent touch.
        assert_eq!(cached.get("t", &k).unwrap(), Some(Value::Int(1)));
        last_touched = k;
    }

    let cache = cached.caches.get("t").unwrap();
    assert!(cache.len() <= capacity);
    assert!(cache.peek(&last_touched).is_some());
}

#[test]
fn test_lru_evicts_the_least_recently_touched_key() {
    let mut cached = CachedBackend::with_capacity(MemoryBackend::new(), 2);
    cached.create_table("t").unwrap();

    cached.put("t", Key::Int(1), Value::Int(1)).unwrap();
    cached.put("t", Key::Int(2), Value::Int(2)).unwrap();
    // Touch key 1 so key 2 becomes the least-recently-used entry.
    assert_eq!(cached.get("t", &Key::Int(1)).unwrap(), Some(Value::Int(1)));
    cached.put("t", Key::Int(3), Value::Int(3)).unwrap();

    let cache = cached.caches.get("t").unwrap();
    assert_eq!(cache.len(), 2);
    assert!(cache.peek(&Key::Int(1)).is_some());
    assert!(cache.peek(&Key::Int(3)).is_some());
    assert!(cache.peek(&Key::Int(2)).is_none());
}
