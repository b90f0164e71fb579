//! Retention invariants: LRU ordering, capacity enforcement, TTL expiry,
//! and metrics consistency across operation sequences.

use std::time::Duration;

use flightcache::builder::CacheBuilder;
use flightcache::cache::{Cache, Ttl};
use flightcache::clock::ManualClock;

fn bounded(maxsize: usize) -> Cache<String, i32> {
    CacheBuilder::new().maxsize(maxsize).build().unwrap()
}

// -- capacity & recency -----------------------------------------------------

#[test]
fn eviction_drops_the_least_recently_used() {
    let cache = bounded(2);

    cache.set("a".into(), 1);
    cache.set("b".into(), 2);
    cache.get(&"a".to_string());
    cache.set("c".into(), 3);

    assert!(cache.contains(&"a".to_string()));
    assert!(!cache.contains(&"b".to_string()));
    assert!(cache.contains(&"c".to_string()));
    assert_eq!(cache.metrics().evictions, 1);
}

#[test]
fn len_never_exceeds_maxsize() {
    let cache = bounded(10);

    for i in 0..100 {
        cache.set(format!("key-{i}"), i);
        assert!(cache.len() <= 10);
    }
    assert_eq!(cache.len(), 10);
    assert_eq!(cache.metrics().evictions, 90);
}

#[test]
fn touched_entries_outlive_untouched_ones() {
    let cache = bounded(3);

    cache.set("a".into(), 1);
    cache.set("b".into(), 2);
    cache.set("c".into(), 3);

    // touch "a" via lookup, then push two new entries through
    cache.get(&"a".to_string());
    cache.set("d".into(), 4);
    cache.set("e".into(), 5);

    assert!(cache.contains(&"a".to_string()));
    assert!(!cache.contains(&"b".to_string()));
    assert!(!cache.contains(&"c".to_string()));
}

#[test]
fn overwriting_does_not_grow_the_cache() {
    let cache = bounded(2);

    cache.set("a".into(), 1);
    cache.set("a".into(), 2);
    cache.set("a".into(), 3);

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.metrics().evictions, 0);
    assert_eq!(cache.get(&"a".to_string()).map(|v| *v), Some(3));
}

#[test]
fn keys_track_recency_order() {
    let cache = bounded(8);

    cache.set("a".into(), 1);
    cache.set("b".into(), 2);
    cache.set("c".into(), 3);
    cache.get(&"b".to_string());

    assert_eq!(
        cache.keys(),
        vec!["b".to_string(), "c".to_string(), "a".to_string()]
    );
}

#[test]
fn repeated_get_is_stable_without_intervening_writes() {
    let cache = bounded(8);

    cache.set("k".into(), 42);
    let first = cache.get(&"k".to_string()).unwrap();
    let second = cache.get(&"k".to_string()).unwrap();
    assert_eq!(*first, *second);
}

// -- ttl expiry -------------------------------------------------------------

#[test]
fn expired_entries_are_never_returned() {
    let clock = ManualClock::new();
    let cache: Cache<String, String> = CacheBuilder::new()
        .default_ttl(Duration::from_secs(1))
        .clock(clock.clone())
        .build()
        .unwrap();

    cache.set("k".into(), "v".into());
    assert_eq!(cache.get(&"k".to_string()).map(|v| v.to_string()), Some("v".into()));

    clock.advance(Duration::from_secs(2));
    assert!(cache.get(&"k".to_string()).is_none());
}

#[tokio::test]
async fn reload_after_expiry_stores_a_fresh_deadline() {
    let clock = ManualClock::new();
    let cache: Cache<String, String> = CacheBuilder::new()
        .default_ttl(Duration::from_secs(1))
        .clock(clock.clone())
        .build()
        .unwrap();

    cache.set("k".into(), "v".into());
    clock.advance(Duration::from_secs(2));

    let reloaded = cache
        .get_with(&"k".to_string(), || async { Ok("v2".to_string()) })
        .await
        .unwrap();
    assert_eq!(reloaded.as_str(), "v2");

    // within the refreshed lifetime the entry is fresh again
    clock.advance(Duration::from_millis(500));
    assert_eq!(
        cache.get(&"k".to_string()).map(|v| v.to_string()),
        Some("v2".into())
    );

    clock.advance(Duration::from_secs(1));
    assert!(cache.get(&"k".to_string()).is_none());
}

#[test]
fn per_key_ttl_overrides_the_default() {
    let clock = ManualClock::new();
    let cache: Cache<String, i32> = CacheBuilder::new()
        .default_ttl(Duration::from_secs(1))
        .clock(clock.clone())
        .build()
        .unwrap();

    cache.set_ttl("short".into(), 1, Ttl::Default);
    cache.set_ttl("long".into(), 2, Ttl::After(Duration::from_secs(60)));
    cache.set_ttl("forever".into(), 3, Ttl::Never);

    clock.advance(Duration::from_secs(30));
    assert!(!cache.contains(&"short".to_string()));
    assert!(cache.contains(&"long".to_string()));
    assert!(cache.contains(&"forever".to_string()));

    clock.advance(Duration::from_secs(60));
    assert!(!cache.contains(&"long".to_string()));
    assert!(cache.contains(&"forever".to_string()));
}

#[test]
fn opportunistic_sweep_reclaims_expired_entries_on_writes() {
    let clock = ManualClock::new();
    let cache: Cache<String, i32> = CacheBuilder::new()
        .unlimited()
        .default_ttl(Duration::from_secs(1))
        .clock(clock.clone())
        .build()
        .unwrap();

    for i in 0..5 {
        cache.set(format!("stale-{i}"), i);
    }
    clock.advance(Duration::from_secs(2));

    // the write's piggybacked sweep removes the expired tail
    cache.set_ttl("fresh".into(), 99, Ttl::Never);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.metrics().expirations, 5);
}

// -- metrics ----------------------------------------------------------------

#[test]
fn hit_rate_follows_the_counters() {
    let cache = bounded(8);
    assert_eq!(cache.metrics().hit_rate(), 0.0);

    cache.set("a".into(), 1);
    cache.get(&"a".to_string());
    cache.get(&"a".to_string());
    cache.get(&"a".to_string());
    cache.get(&"missing".to_string());

    let snapshot = cache.metrics();
    assert_eq!(snapshot.hits, 3);
    assert_eq!(snapshot.misses, 1);
    assert!((snapshot.hit_rate() - 0.75).abs() < f64::EPSILON);
}

#[test]
fn clear_keeps_counters_and_drops_entries() {
    let cache = bounded(8);

    cache.set("a".into(), 1);
    cache.get(&"a".to_string());
    cache.clear();

    let snapshot = cache.metrics();
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.size, 0);
    assert!(cache.is_empty());
}

#[test]
fn snapshot_size_tracks_the_store() {
    let cache = bounded(8);

    cache.set("a".into(), 1);
    cache.set("b".into(), 2);
    assert_eq!(cache.metrics().size, 2);

    cache.delete(&"a".to_string());
    assert_eq!(cache.metrics().size, 1);
}
