//! Cache-aside read views.
//!
//! Each view is looked up in the cache first. On a miss it is computed from
//! the database, serialized to JSON, stored with the view's TTL and returned.
//! Cache failures are logged and otherwise ignored.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::CacheStore;
use crate::db::Database;
use crate::error::Error;

/// TTL of per-app history views.
pub const HISTORY_TTL: Duration = Duration::from_secs(30 * 60);

/// TTL of the daily popularity ranking.
pub const POPULAR_TTL: Duration = Duration::from_secs(30 * 60);

/// TTL of search results.
pub const SEARCH_TTL: Duration = Duration::from_secs(12 * 60 * 60);

const POPULAR_LIMIT: usize = 10;
const SEARCH_LIMIT: usize = 50;

/// Payload of the history view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryView {
    pub name: String,
    /// `[unix_seconds, count]` pairs, oldest first.
    pub history: Vec<[i64; 2]>,
}

pub fn history_key(app_id: u32) -> String {
    format!("history_{}", app_id)
}

pub fn popular_key() -> &'static str {
    "top"
}

/// Stable key for a search query.
pub fn search_key(query: &str) -> String {
    format!("search_{:x}", Sha256::digest(query.as_bytes()))
}

/// Read views backed by a database and a cache.
pub struct CachedReader {
    db: Arc<dyn Database>,
    cache: Arc<dyn CacheStore>,
}

impl CachedReader {
    pub fn new(db: Arc<dyn Database>, cache: Arc<dyn CacheStore>) -> Self {
        Self { db, cache }
    }

    /// JSON history of one app.
    pub async fn history(&self, app_id: u32) -> Result<Vec<u8>, Error> {
        self.get_or_compute(&history_key(app_id), HISTORY_TTL, move || async move {
            let app = self
                .db
                .get_by_id(app_id)
                .await?
                .ok_or(Error::NotFound(app_id))?;
            let records = self.db.read_all(app_id).await?;

            let view = HistoryView {
                name: app.name,
                history: records.iter().map(|r| r.as_pair()).collect(),
            };
            Ok::<_, Error>(serde_json::to_vec(&view)?)
        })
        .await
    }

    /// JSON ranking of the most popular apps over the last 24 hours.
    pub async fn popular_today(&self) -> Result<Vec<u8>, Error> {
        self.get_or_compute(popular_key(), POPULAR_TTL, move || async move {
            let since = Utc::now() - chrono::Duration::hours(24);
            let ranking = self.db.most_popular_since(since, POPULAR_LIMIT).await?;
            Ok::<_, Error>(serde_json::to_vec(&ranking)?)
        })
        .await
    }

    /// JSON list of apps whose name contains `query`.
    pub async fn search(&self, query: &str) -> Result<Vec<u8>, Error> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("empty search query".to_string()));
        }

        self.get_or_compute(&search_key(query), SEARCH_TTL, move || async move {
            let apps = self.db.search(query, SEARCH_LIMIT).await?;
            Ok::<_, Error>(serde_json::to_vec(&apps)?)
        })
        .await
    }

    async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Vec<u8>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, Error>>,
    {
        match self.cache.get(key).await {
            Ok(Some(payload)) => {
                tracing::trace!(key, "Cache hit");
                return Ok(payload);
            }
            Ok(None) => tracing::trace!(key, "Cache miss"),
            Err(e) => tracing::warn!(key, error = %e, "Cache lookup failed"),
        }

        let payload = compute().await?;

        if let Err(e) = self.cache.set(key, payload.clone(), ttl).await {
            tracing::warn!(key, error = %e, "Failed to store cache entry");
        }
        Ok(payload)
    }
}
