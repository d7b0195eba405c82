//! PostgreSQL store for the app catalog and usage history.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tokio_postgres::Row;

use crate::config::DatabaseConfig;
use crate::db::Database;
use crate::error::DatabaseError;
use crate::history::{App, AppInfo, CatalogCounts, HistoryAggregate, PopularApp, UsageRecord};

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Catalog rows sent per `UNNEST` statement.
const UPSERT_CHUNK: usize = 10_000;

/// Database store for catalog and history.
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Create a new store and connect to the database.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    /// Apply pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **conn)
            .await?;

        for migration in report.applied_migrations() {
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applied migration"
            );
        }
        Ok(())
    }

    /// Get a connection from the pool.
    pub async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }

    // ==================== Catalog ====================

    async fn apps_by_usable(&self, usable: bool) -> Result<Vec<App>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, name, usable FROM apps WHERE usable = $1 ORDER BY id",
                &[&usable],
            )
            .await?;

        rows.iter().map(app_from_row).collect()
    }

    /// Get a catalog entry by id.
    pub async fn get_app(&self, id: u32) -> Result<Option<App>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, name, usable FROM apps WHERE id = $1",
                &[&i64::from(id)],
            )
            .await?;

        row.as_ref().map(app_from_row).transpose()
    }

    /// Refresh the catalog in one transaction.
    ///
    /// Duplicate ids keep the last name given. Rows are sent as arrays, a
    /// chunk per statement, since the Steam app list runs to hundreds of
    /// thousands of entries.
    pub async fn upsert_apps(&self, apps: &[AppInfo]) -> Result<u64, DatabaseError> {
        let latest: BTreeMap<i64, &str> = apps
            .iter()
            .map(|app| (i64::from(app.id), app.name.as_str()))
            .collect();
        let rows: Vec<(i64, &str)> = latest.into_iter().collect();

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let stmt = tx
            .prepare(
                r#"
                INSERT INTO apps (id, name)
                SELECT * FROM UNNEST($1::bigint[], $2::text[])
                ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
                "#,
            )
            .await?;

        let mut written = 0;
        for chunk in rows.chunks(UPSERT_CHUNK) {
            let ids: Vec<i64> = chunk.iter().map(|(id, _)| *id).collect();
            let names: Vec<&str> = chunk.iter().map(|(_, name)| *name).collect();
            written += tx.execute(&stmt, &[&ids, &names]).await?;
        }
        tx.commit().await?;

        tracing::debug!(written, "Upserted catalog rows");
        Ok(written)
    }

    /// Change an app's classification.
    pub async fn update_usable(&self, id: u32, usable: bool) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE apps SET usable = $2 WHERE id = $1",
                &[&i64::from(id), &usable],
            )
            .await?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "app".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ==================== History ====================

    /// Append one sample to an app's history.
    pub async fn add_usage_record(
        &self,
        app_id: u32,
        timestamp: DateTime<Utc>,
        count: u32,
    ) -> Result<(), DatabaseError> {
        let count = i32::try_from(count)
            .map_err(|_| DatabaseError::Query(format!("count {} out of range", count)))?;

        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO usage_records (app_id, recorded_at, count) VALUES ($1, $2, $3)",
            &[&i64::from(app_id), &timestamp, &count],
        )
        .await?;
        Ok(())
    }

    /// Full history of an app, oldest first.
    pub async fn usage_history(&self, app_id: u32) -> Result<Vec<UsageRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT recorded_at, count FROM usage_records
                WHERE app_id = $1
                ORDER BY recorded_at ASC
                "#,
                &[&i64::from(app_id)],
            )
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(UsageRecord {
                app_id,
                timestamp: row.get("recorded_at"),
                count: row.get::<_, i32>("count").max(0) as u32,
            });
        }
        Ok(records)
    }

    /// Remove an app's history.
    pub async fn remove_usage_history(&self, app_id: u32) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let removed = conn
            .execute(
                "DELETE FROM usage_records WHERE app_id = $1",
                &[&i64::from(app_id)],
            )
            .await?;
        Ok(removed)
    }
}

pub(super) fn app_from_row(row: &Row) -> Result<App, DatabaseError> {
    let id: i64 = row.get("id");
    Ok(App {
        id: u32::try_from(id)
            .map_err(|_| DatabaseError::Query(format!("app id {} out of range", id)))?,
        name: row.get("name"),
        usable: row.get("usable"),
    })
}

#[async_trait]
impl Database for Store {
    async fn all_usable(&self) -> Result<Vec<App>, DatabaseError> {
        self.apps_by_usable(true).await
    }

    async fn all_unusable(&self) -> Result<Vec<App>, DatabaseError> {
        self.apps_by_usable(false).await
    }

    async fn get_by_id(&self, id: u32) -> Result<Option<App>, DatabaseError> {
        self.get_app(id).await
    }

    async fn upsert_many(&self, apps: &[AppInfo]) -> Result<u64, DatabaseError> {
        self.upsert_apps(apps).await
    }

    async fn set_usable(&self, id: u32, usable: bool) -> Result<(), DatabaseError> {
        self.update_usable(id, usable).await
    }

    async fn catalog_counts(&self) -> Result<CatalogCounts, DatabaseError> {
        self.count_apps().await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<App>, DatabaseError> {
        self.search_apps(query, limit).await
    }

    async fn append_record(
        &self,
        app_id: u32,
        timestamp: DateTime<Utc>,
        count: u32,
    ) -> Result<(), DatabaseError> {
        self.add_usage_record(app_id, timestamp, count).await
    }

    async fn read_all(&self, app_id: u32) -> Result<Vec<UsageRecord>, DatabaseError> {
        self.usage_history(app_id).await
    }

    async fn delete_all(&self, app_id: u32) -> Result<u64, DatabaseError> {
        self.remove_usage_history(app_id).await
    }

    async fn aggregate(&self, app_id: u32) -> Result<HistoryAggregate, DatabaseError> {
        self.usage_aggregate(app_id).await
    }

    async fn most_popular_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PopularApp>, DatabaseError> {
        self.popular_apps_since(since, limit).await
    }
}
