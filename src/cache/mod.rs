//! Best-effort key/value cache for read views.
//!
//! The cache is an injected [`CacheStore`] handle. Entries expire after their
//! TTL and are never invalidated explicitly, so readers may see data up to one
//! TTL old.

mod aside;
mod remote;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use crate::error::CacheError;

pub use aside::{
    CachedReader, HISTORY_TTL, HistoryView, POPULAR_TTL, SEARCH_TTL, history_key, popular_key,
    search_key,
};
pub use remote::RedisCache;

/// Largest payload accepted, matching memcached's default item size.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Default byte budget of [`MemoryCache`].
pub const DEFAULT_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

/// Key/value cache with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Payload stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
}

pub(crate) fn check_payload_size(payload: &[u8]) -> Result<(), CacheError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(CacheError::TooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

#[derive(Clone)]
struct Entry {
    payload: Arc<[u8]>,
    ttl: Duration,
}

/// Each entry lives for the TTL it was written with; a rewrite restarts it.
struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process cache weighed by payload size.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }

    /// Cache holding at most `max_bytes` of keys and payloads.
    pub fn with_capacity(max_bytes: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|key: &String, entry: &Entry| -> u32 {
                (key.len() + entry.payload.len())
                    .try_into()
                    .unwrap_or(u32::MAX)
            })
            .expire_after(EntryTtl)
            .build();

        Self { entries }
    }

    /// Number of live entries once pending maintenance has run.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self
            .entries
            .get(key)
            .await
            .map(|entry| entry.payload.to_vec()))
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        check_payload_size(&payload)?;

        let entry = Entry {
            payload: payload.into(),
            ttl,
        };
        self.entries.insert(key.to_string(), entry).await;
        Ok(())
    }
}
