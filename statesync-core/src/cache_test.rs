use std::time::Duration;

use serde_json::json;

use super::cache::*;

const TTL: Duration = Duration::from_millis(60_000);

#[tokio::test(start_paused = true)]
async fn test_fresh_hit_before_half_ttl() {
    let cache = StoreCache::default();
    cache.set("users:{}", json!([1, 2]));

    tokio::time::advance(Duration::from_millis(29_000)).await;

    let hit = cache.get("users:{}", TTL).expect("entry is fresh");
    assert_eq!(hit.data, json!([1, 2]));
    assert!(!hit.stale);
}

#[tokio::test(start_paused = true)]
async fn test_stale_hit_between_half_ttl_and_ttl() {
    let cache = StoreCache::default();
    cache.set("users:{}", json!([1, 2]));

    tokio::time::advance(Duration::from_millis(40_000)).await;

    let hit = cache.get("users:{}", TTL).expect("entry is stale but usable");
    assert_eq!(hit.data, json!([1, 2]));
    assert!(hit.stale);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_evicted_on_access() {
    let cache = StoreCache::default();
    cache.set("users:{}", json!([1, 2]));

    tokio::time::advance(Duration::from_millis(61_000)).await;

    assert!(cache.get("users:{}", TTL).is_none());
    assert_eq!(cache.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_set_refreshes_timestamp() {
    let cache = StoreCache::default();
    cache.set("k", json!(1));

    tokio::time::advance(Duration::from_millis(50_000)).await;
    cache.set("k", json!(2));
    tokio::time::advance(Duration::from_millis(20_000)).await;

    // 70s after the first set, 20s after the refresh: still fresh
    let hit = cache.get("k", TTL).expect("refreshed entry lives on");
    assert_eq!(hit.data, json!(2));
    assert!(!hit.stale);
}

#[tokio::test]
async fn test_lru_eviction_at_capacity() {
    let cache = StoreCache::new(2);
    cache.set("a", json!(1));
    cache.set("b", json!(2));

    // Touch "a" so "b" becomes least-recently-used
    assert!(cache.get("a", TTL).is_some());

    cache.set("c", json!(3));

    assert!(cache.get("a", TTL).is_some());
    assert!(cache.get("b", TTL).is_none());
    assert!(cache.get("c", TTL).is_some());
}

#[tokio::test]
async fn test_refresh_does_not_count_as_growth() {
    let cache = StoreCache::new(2);
    cache.set("a", json!(1));
    cache.set("b", json!(2));
    cache.set("b", json!(3));

    assert_eq!(cache.len(), 2);
    assert!(cache.get("a", TTL).is_some());
    assert_eq!(cache.get("b", TTL).unwrap().data, json!(3));
}

#[tokio::test]
async fn test_remove_prefix_scopes_to_store() {
    let cache = StoreCache::default();
    cache.set("users:list:{}", json!([1]));
    cache.set("users:list:{page=2}", json!([2]));
    cache.set("users:one:3:{}", json!({"id": "3"}));
    cache.set("posts:list:{}", json!([9]));

    cache.remove_prefix("users:");

    assert!(cache.get("users:list:{}", TTL).is_none());
    assert!(cache.get("users:list:{page=2}", TTL).is_none());
    assert!(cache.get("users:one:3:{}", TTL).is_none());
    assert!(cache.get("posts:list:{}", TTL).is_some());
}

#[tokio::test]
async fn test_remove_single_key() {
    let cache = StoreCache::default();
    cache.set("a", json!(1));
    cache.set("b", json!(2));

    cache.remove("a");

    assert!(cache.get("a", TTL).is_none());
    assert!(cache.get("b", TTL).is_some());
}
