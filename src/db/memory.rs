//! In-process [`Database`] implementation.
//!
//! Each app's history sits behind its own mutex. The outer map lock is held
//! only long enough to find, create or drop an entry, so workers writing to
//! different apps never wait on each other's appends.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::DatabaseError;
use crate::history::{App, AppInfo, CatalogCounts, HistoryAggregate, PopularApp, UsageRecord};

type History = Arc<Mutex<Vec<UsageRecord>>>;

/// Catalog and histories held in memory.
#[derive(Default)]
pub struct MemoryStore {
    catalog: RwLock<BTreeMap<u32, App>>,
    histories: RwLock<HashMap<u32, History>>,
    unavailable: AtomicBool,
    failing: RwLock<HashSet<u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every per-app call for `app_id` fail, leaving other apps working.
    pub fn fail_app(&self, app_id: u32) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app_id);
    }

    /// Insert or overwrite a catalog entry, flag included.
    pub fn insert_app(&self, id: u32, name: impl Into<String>, usable: bool) {
        let app = App {
            id,
            name: name.into(),
            usable,
        };
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, app);
    }

    /// Whether a history namespace exists for `app_id`.
    pub fn has_history(&self, app_id: u32) -> bool {
        self.histories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&app_id)
    }

    fn check_available(&self) -> Result<(), DatabaseError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DatabaseError::Pool("store unavailable".to_string()));
        }
        Ok(())
    }

    fn check_app(&self, app_id: u32) -> Result<(), DatabaseError> {
        self.check_available()?;
        let failing = self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&app_id);
        if failing {
            return Err(DatabaseError::Query(format!("query for app {} failed", app_id)));
        }
        Ok(())
    }

    fn history(&self, app_id: u32) -> Option<History> {
        self.histories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&app_id)
            .cloned()
    }

    fn history_or_create(&self, app_id: u32) -> History {
        if let Some(history) = self.history(app_id) {
            return history;
        }
        self.histories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(app_id)
            .or_default()
            .clone()
    }

    fn apps_by_usable(&self, usable: bool) -> Vec<App> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|app| app.usable == usable)
            .cloned()
            .collect()
    }

    fn not_found(id: u32) -> DatabaseError {
        DatabaseError::NotFound {
            entity: "app".to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl Database for MemoryStore {
    async fn all_usable(&self) -> Result<Vec<App>, DatabaseError> {
        self.check_available()?;
        Ok(self.apps_by_usable(true))
    }

    async fn all_unusable(&self) -> Result<Vec<App>, DatabaseError> {
        self.check_available()?;
        Ok(self.apps_by_usable(false))
    }

    async fn get_by_id(&self, id: u32) -> Result<Option<App>, DatabaseError> {
        self.check_available()?;
        Ok(self
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    async fn upsert_many(&self, apps: &[AppInfo]) -> Result<u64, DatabaseError> {
        self.check_available()?;
        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let mut written = BTreeSet::new();
        for info in apps {
            written.insert(info.id);
            catalog
                .entry(info.id)
                .and_modify(|app| app.name.clone_from(&info.name))
                .or_insert_with(|| App {
                    id: info.id,
                    name: info.name.clone(),
                    usable: true,
                });
        }
        Ok(written.len() as u64)
    }

    async fn set_usable(&self, id: u32, usable: bool) -> Result<(), DatabaseError> {
        self.check_app(id)?;
        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        let app = catalog.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        app.usable = usable;
        Ok(())
    }

    async fn catalog_counts(&self) -> Result<CatalogCounts, DatabaseError> {
        self.check_available()?;
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        let usable = catalog.values().filter(|app| app.usable).count() as u64;
        let total = catalog.len() as u64;
        Ok(CatalogCounts {
            total,
            usable,
            unusable: total - usable,
        })
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<App>, DatabaseError> {
        self.check_available()?;
        let needle = query.to_lowercase();
        Ok(self
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|app| app.name.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_record(
        &self,
        app_id: u32,
        timestamp: DateTime<Utc>,
        count: u32,
    ) -> Result<(), DatabaseError> {
        self.check_app(app_id)?;
        let known = self
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&app_id);
        if !known {
            return Err(Self::not_found(app_id));
        }

        let history = self.history_or_create(app_id);
        let mut records = history.lock().unwrap_or_else(PoisonError::into_inner);
        let at = records.partition_point(|r| r.timestamp <= timestamp);
        records.insert(
            at,
            UsageRecord {
                app_id,
                timestamp,
                count,
            },
        );
        Ok(())
    }

    async fn read_all(&self, app_id: u32) -> Result<Vec<UsageRecord>, DatabaseError> {
        self.check_app(app_id)?;
        Ok(self
            .history(app_id)
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default())
    }

    async fn delete_all(&self, app_id: u32) -> Result<u64, DatabaseError> {
        self.check_app(app_id)?;
        let removed = self
            .histories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&app_id);
        Ok(removed
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).len() as u64)
            .unwrap_or(0))
    }

    async fn aggregate(&self, app_id: u32) -> Result<HistoryAggregate, DatabaseError> {
        self.check_app(app_id)?;
        let Some(history) = self.history(app_id) else {
            return Ok(HistoryAggregate::default());
        };
        let records = history.lock().unwrap_or_else(PoisonError::into_inner);
        if records.is_empty() {
            return Ok(HistoryAggregate::default());
        }
        let sum: u64 = records.iter().map(|r| u64::from(r.count)).sum();
        Ok(HistoryAggregate {
            count: records.len() as u64,
            average: sum as f64 / records.len() as f64,
        })
    }

    async fn most_popular_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PopularApp>, DatabaseError> {
        self.check_available()?;
        let histories: Vec<(u32, History)> = self
            .histories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, h)| (*id, h.clone()))
            .collect();

        let mut ranking = Vec::new();
        for (id, history) in histories {
            let peak = history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|r| r.timestamp >= since)
                .map(|r| r.count)
                .max();
            let Some(peak) = peak else { continue };
            let name = self
                .catalog
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&id)
                .map(|app| app.name.clone())
                .unwrap_or_default();
            ranking.push(PopularApp { id, name, peak });
        }

        ranking.sort_by(|a, b| b.peak.cmp(&a.peak).then(a.id.cmp(&b.id)));
        ranking.truncate(limit);
        Ok(ranking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_keeps_usable_flag() {
        let store = MemoryStore::new();
        store.insert_app(10, "Old Name", false);

        store
            .upsert_many(&[AppInfo::new(10, "New Name"), AppInfo::new(20, "Fresh")])
            .await
            .unwrap();

        let existing = store.get_by_id(10).await.unwrap().unwrap();
        assert_eq!(existing.name, "New Name");
        assert!(!existing.usable);

        let fresh = store.get_by_id(20).await.unwrap().unwrap();
        assert!(fresh.usable);
    }

    #[tokio::test]
    async fn test_refresh_never_removes_apps() {
        let store = MemoryStore::new();
        store.insert_app(1, "Kept", true);

        store.upsert_many(&[AppInfo::new(2, "Other")]).await.unwrap();

        let kept = store.get_by_id(1).await.unwrap().unwrap();
        assert!(kept.usable);
        assert_eq!(store.catalog_counts().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_history_is_created_lazily_and_ordered() {
        let store = MemoryStore::new();
        store.insert_app(5, "Five", true);
        assert!(!store.has_history(5));

        store.append_record(5, at(200), 2).await.unwrap();
        store.append_record(5, at(100), 1).await.unwrap();
        assert!(store.has_history(5));

        let records = store.read_all(5).await.unwrap();
        let counts: Vec<u32> = records.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_append_for_unknown_app_fails() {
        let store = MemoryStore::new();
        let err = store.append_record(99, at(0), 1).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
        assert!(!store.has_history(99));
    }

    #[tokio::test]
    async fn test_delete_all_drops_namespace() {
        let store = MemoryStore::new();
        store.insert_app(3, "Three", true);
        store.append_record(3, at(1), 4).await.unwrap();
        store.append_record(3, at(2), 6).await.unwrap();

        assert_eq!(store.delete_all(3).await.unwrap(), 2);
        assert!(!store.has_history(3));
        assert!(store.read_all(3).await.unwrap().is_empty());
        assert_eq!(store.delete_all(3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aggregate() {
        let store = MemoryStore::new();
        store.insert_app(7, "Seven", true);
        assert!(store.aggregate(7).await.unwrap().is_empty());

        for (i, count) in [1, 2, 3, 6].into_iter().enumerate() {
            store.append_record(7, at(i as i64), count).await.unwrap();
        }

        let aggregate = store.aggregate(7).await.unwrap();
        assert_eq!(aggregate.count, 4);
        assert_eq!(aggregate.average, 3.0);
    }

    #[tokio::test]
    async fn test_set_usable_unknown_app() {
        let store = MemoryStore::new();
        let err = store.set_usable(1, false).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let store = MemoryStore::new();
        store.insert_app(570, "Dota 2", true);
        store.insert_app(730, "Counter-Strike 2", true);
        store.insert_app(440, "Team Fortress 2", false);

        let found = store.search("DOTA", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 570);

        let all = store.search(" 2", 2).await.unwrap();
        let ids: Vec<u32> = all.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![440, 570]);
    }

    #[tokio::test]
    async fn test_most_popular_since() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_app(1, "One", true);
        store.insert_app(2, "Two", true);
        store.insert_app(3, "Three", true);

        store.append_record(1, now - Duration::hours(48), 9000).await.unwrap();
        store.append_record(1, now, 10).await.unwrap();
        store.append_record(2, now, 500).await.unwrap();
        store.append_record(3, now - Duration::hours(30), 700).await.unwrap();

        let ranking = store
            .most_popular_since(now - Duration::hours(24), 10)
            .await
            .unwrap();
        assert_eq!(
            ranking,
            vec![
                PopularApp { id: 2, name: "Two".to_string(), peak: 500 },
                PopularApp { id: 1, name: "One".to_string(), peak: 10 },
            ]
        );
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.all_usable().await.unwrap_err(),
            DatabaseError::Pool(_)
        ));

        store.set_unavailable(false);
        assert!(store.all_usable().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_different_apps() {
        let store = Arc::new(MemoryStore::new());
        for id in 0..50 {
            store.insert_app(id, format!("App {}", id), true);
        }

        let mut handles = Vec::new();
        for id in 0..50u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..20 {
                    store.append_record(id, at(i), id).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for id in 0..50u32 {
            let records = store.read_all(id).await.unwrap();
            assert_eq!(records.len(), 20);
            assert!(records.iter().all(|r| r.app_id == id && r.count == id));
        }
    }

    #[tokio::test]
    async fn test_failing_app_is_isolated() {
        let store = MemoryStore::new();
        store.insert_app(1, "Broken", true);
        store.insert_app(2, "Fine", true);
        store.fail_app(1);

        assert!(store.append_record(1, at(0), 1).await.is_err());
        assert!(store.aggregate(1).await.is_err());
        assert!(store.set_usable(1, false).await.is_err());

        store.append_record(2, at(0), 1).await.unwrap();
        assert_eq!(store.all_usable().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_counts_distinct_apps() {
        let store = MemoryStore::new();
        let written = store
            .upsert_many(&[
                AppInfo::new(1, "First"),
                AppInfo::new(1, "First again"),
                AppInfo::new(2, "Second"),
            ])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.get_by_id(1).await.unwrap().unwrap().name, "First again");
    }
}
