//! Redis cache tests against a throwaway container.
//!
//! Run with `cargo test --features integration` (requires Docker).
#![cfg(feature = "integration")]

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use testcontainers_modules::redis::Redis;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner;

use steamhistory::cache::{CacheStore, CachedReader, MAX_PAYLOAD_BYTES, RedisCache, history_key};
use steamhistory::db::{Database, MemoryStore};
use steamhistory::error::CacheError;

async fn cache() -> (RedisCache, ContainerAsync<Redis>) {
    let node = Redis::default().start().await.unwrap();
    let port = node.get_host_port_ipv4(6379).await.unwrap();
    let cache = RedisCache::connect(&format!("redis://127.0.0.1:{}/", port))
        .await
        .unwrap();
    (cache, node)
}

#[tokio::test]
async fn test_round_trip_and_expiry() {
    let (cache, _node) = cache().await;

    assert_eq!(cache.get("top").await.unwrap(), None);
    cache
        .set("top", b"[1,2]".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(cache.get("top").await.unwrap(), Some(b"[1,2]".to_vec()));

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(cache.get("top").await.unwrap(), None);
}

#[tokio::test]
async fn test_oversized_payload_rejected() {
    let (cache, _node) = cache().await;
    let err = cache
        .set("big", vec![0; MAX_PAYLOAD_BYTES + 1], Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::TooLarge { .. }));
}

#[tokio::test]
async fn test_views_are_shared_between_readers() {
    let (cache, _node) = cache().await;
    let db = Arc::new(MemoryStore::new());
    db.insert_app(570, "Dota 2", true);
    db.append_record(570, chrono::Utc::now(), 800_000)
        .await
        .unwrap();

    let first = CachedReader::new(db.clone(), Arc::new(cache.clone()));
    let payload = first.history(570).await.unwrap();
    assert_eq!(cache.get(&history_key(570)).await.unwrap(), Some(payload.clone()));

    // A second process sees the cached view, not the newer sample
    db.append_record(570, chrono::Utc::now(), 1).await.unwrap();
    let second = CachedReader::new(db, Arc::new(cache));
    assert_eq!(second.history(570).await.unwrap(), payload);
}
