//! Aggregates and ranked queries over the catalog and history.
//!
//! Analytics methods are implemented directly on [`Store`] for convenience.

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::history::store::app_from_row;
use crate::history::{App, CatalogCounts, HistoryAggregate, PopularApp, Store};

impl Store {
    /// Number of samples and their mean for one app.
    pub async fn usage_aggregate(&self, app_id: u32) -> Result<HistoryAggregate, DatabaseError> {
        let conn = self.conn().await?;

        let row = conn
            .query_one(
                r#"
                SELECT
                    COUNT(*) as total,
                    AVG(count)::float8 as average
                FROM usage_records
                WHERE app_id = $1
                "#,
                &[&i64::from(app_id)],
            )
            .await?;

        let total: i64 = row.get("total");
        Ok(HistoryAggregate {
            count: total as u64,
            average: row.get::<_, Option<f64>>("average").unwrap_or(0.0),
        })
    }

    /// Catalog size by classification.
    pub async fn count_apps(&self) -> Result<CatalogCounts, DatabaseError> {
        let conn = self.conn().await?;

        let row = conn
            .query_one(
                r#"
                SELECT
                    COUNT(*) as total,
                    COUNT(*) FILTER (WHERE usable) as usable,
                    COUNT(*) FILTER (WHERE NOT usable) as unusable
                FROM apps
                "#,
                &[],
            )
            .await?;

        Ok(CatalogCounts {
            total: row.get::<_, i64>("total") as u64,
            usable: row.get::<_, i64>("usable") as u64,
            unusable: row.get::<_, i64>("unusable") as u64,
        })
    }

    /// Apps whose name contains `query`, ignoring case.
    pub async fn search_apps(&self, query: &str, limit: usize) -> Result<Vec<App>, DatabaseError> {
        let conn = self.conn().await?;
        let pattern = format!("%{}%", escape_like(query));
        let limit = limit as i64;

        let rows = conn
            .query(
                r#"
                SELECT id, name, usable FROM apps
                WHERE name ILIKE $1
                ORDER BY id
                LIMIT $2
                "#,
                &[&pattern, &limit],
            )
            .await?;

        rows.iter().map(app_from_row).collect()
    }

    /// Apps ranked by peak player count over samples taken since `since`.
    pub async fn popular_apps_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PopularApp>, DatabaseError> {
        let conn = self.conn().await?;
        let limit = limit as i64;

        let rows = conn
            .query(
                r#"
                SELECT a.id, a.name, MAX(r.count) as peak
                FROM usage_records r
                JOIN apps a ON a.id = r.app_id
                WHERE r.recorded_at >= $1
                GROUP BY a.id, a.name
                ORDER BY peak DESC, a.id
                LIMIT $2
                "#,
                &[&since, &limit],
            )
            .await?;

        let mut ranking = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            ranking.push(PopularApp {
                id: u32::try_from(id)
                    .map_err(|_| DatabaseError::Query(format!("app id {} out of range", id)))?,
                name: row.get("name"),
                peak: row.get::<_, i32>("peak").max(0) as u32,
            });
        }

        Ok(ranking)
    }
}

/// Escape `LIKE` wildcards so user input only ever matches literally.
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
