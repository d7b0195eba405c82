//! Database abstraction layer.

#[cfg(any(test, feature = "integration"))]
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::history::{App, AppInfo, CatalogCounts, HistoryAggregate, PopularApp, UsageRecord};

#[cfg(any(test, feature = "integration"))]
pub use memory::MemoryStore;

/// Catalog and history storage.
///
/// Writes are keyed by app id. Implementations must accept concurrent writes
/// for different apps; a single app is never written by two workers of the
/// same batch.
#[async_trait]
pub trait Database: Send + Sync {
    // --- Catalog ---

    /// All apps currently marked usable.
    async fn all_usable(&self) -> Result<Vec<App>, DatabaseError>;

    /// All apps currently marked unusable.
    async fn all_unusable(&self) -> Result<Vec<App>, DatabaseError>;

    async fn get_by_id(&self, id: u32) -> Result<Option<App>, DatabaseError>;

    /// Insert new apps as usable and rename existing ones.
    ///
    /// The usable flag of existing apps is left alone and apps missing from
    /// `apps` are kept. Returns the number of rows written.
    async fn upsert_many(&self, apps: &[AppInfo]) -> Result<u64, DatabaseError>;

    /// Fails with [`DatabaseError::NotFound`] for unknown ids.
    async fn set_usable(&self, id: u32, usable: bool) -> Result<(), DatabaseError>;

    async fn catalog_counts(&self) -> Result<CatalogCounts, DatabaseError>;

    /// Case-insensitive substring match on app names, ordered by id.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<App>, DatabaseError>;

    // --- History ---

    async fn append_record(
        &self,
        app_id: u32,
        timestamp: DateTime<Utc>,
        count: u32,
    ) -> Result<(), DatabaseError>;

    /// Every sample of an app, oldest first. Empty when it has no history.
    async fn read_all(&self, app_id: u32) -> Result<Vec<UsageRecord>, DatabaseError>;

    /// Drop an app's history. Returns the number of samples removed.
    async fn delete_all(&self, app_id: u32) -> Result<u64, DatabaseError>;

    async fn aggregate(&self, app_id: u32) -> Result<HistoryAggregate, DatabaseError>;

    /// Apps ranked by their highest sample recorded at or after `since`.
    async fn most_popular_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PopularApp>, DatabaseError>;
}
