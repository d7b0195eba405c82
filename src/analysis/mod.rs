//! Classification of apps into usable and unusable.
//!
//! Two independent passes, both idempotent:
//!
//! - [`detect_unusable_apps`] looks at the collected history of each usable
//!   app and retires the ones that are consistently empty, deleting their
//!   history.
//! - [`detect_usable_apps`] takes one live sample of each unusable app and
//!   brings back the ones that have players again. Any samples left over from
//!   before retirement are dropped first, so the history starts empty and
//!   fills on the next collection run.
//!
//! The criteria are asymmetric (long-run average to retire, single sample to
//! revive). An app hovering around both thresholds can flip every cycle and
//! lose its history each time it is retired.

use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::db::Database;
use crate::error::Error;
use crate::history::{App, CatalogCounts};
use crate::steam::PlayerCountSource;
use crate::tracker::{Outcome, PoolReport, run_pool};

/// An app needs more samples than this before it can be retired.
pub const MIN_RECORDS_FOR_DEACTIVATION: u64 = 10;

/// Retire apps whose mean player count is below this.
pub const DEACTIVATION_AVERAGE_THRESHOLD: f64 = 1.0;

/// Revive apps whose live player count is above this.
pub const REACTIVATION_LIVE_THRESHOLD: u32 = 5;

/// Result of one classification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationReport {
    pub examined: usize,
    pub changed: usize,
    pub failed: usize,
}

impl From<PoolReport> for ClassificationReport {
    fn from(report: PoolReport) -> Self {
        Self {
            examined: report.dispatched,
            changed: report.done,
            failed: report.failed,
        }
    }
}

/// Whether an app's history qualifies it for retirement.
pub fn should_deactivate(record_count: u64, average: f64) -> bool {
    record_count > MIN_RECORDS_FOR_DEACTIVATION && average < DEACTIVATION_AVERAGE_THRESHOLD
}

/// Whether a live sample qualifies an unusable app for tracking again.
pub fn should_reactivate(live_count: u32) -> bool {
    live_count > REACTIVATION_LIVE_THRESHOLD
}

/// Mark usable apps with no players as unusable and drop their history.
///
/// Reads each aggregate once; samples appended concurrently by an
/// overlapping collection run may or may not be seen.
pub async fn detect_unusable_apps(db: &dyn Database) -> Result<ClassificationReport, Error> {
    let apps = db.all_usable().await?;
    let mut report = ClassificationReport {
        examined: apps.len(),
        ..Default::default()
    };

    for app in &apps {
        let aggregate = match db.aggregate(app.id).await {
            Ok(aggregate) => aggregate,
            Err(e) => {
                tracing::warn!(app_id = app.id, error = %e, "Failed to aggregate history");
                report.failed += 1;
                continue;
            }
        };

        if aggregate.is_empty() || !should_deactivate(aggregate.count, aggregate.average) {
            continue;
        }

        if let Err(e) = db.set_usable(app.id, false).await {
            tracing::warn!(app_id = app.id, error = %e, "Failed to mark app as unusable");
            report.failed += 1;
            continue;
        }
        tracing::info!(
            app_id = app.id,
            name = %app.name,
            records = aggregate.count,
            average = aggregate.average,
            "Marked app as unusable"
        );
        report.changed += 1;

        match db.delete_all(app.id).await {
            Ok(removed) => tracing::debug!(app_id = app.id, removed, "Removed history"),
            Err(e) => {
                tracing::warn!(app_id = app.id, error = %e, "Failed to remove history")
            }
        }
    }

    Ok(report)
}

/// Mark unusable apps that have players again as usable.
///
/// An app is only flipped once its leftover history is gone; if that delete
/// fails the app stays unusable and counts as failed.
pub async fn detect_usable_apps(
    db: Arc<dyn Database>,
    source: Arc<dyn PlayerCountSource>,
    config: &TrackerConfig,
) -> Result<ClassificationReport, Error> {
    let apps = db.all_unusable().await?;
    tracing::info!(apps = apps.len(), "Checking unusable apps");

    let report = run_pool(apps, config.worker_count, move |app| {
        let db = Arc::clone(&db);
        let source = Arc::clone(&source);
        async move { reactivate_one(db.as_ref(), source.as_ref(), app).await }
    })
    .await;

    Ok(ClassificationReport::from(report))
}

async fn reactivate_one(db: &dyn Database, source: &dyn PlayerCountSource, app: App) -> Outcome {
    let live = match source.player_count(app.id).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(app_id = app.id, error = %e, "Failed to fetch player count");
            return Outcome::Failed;
        }
    };

    if !should_reactivate(live) {
        return Outcome::Skipped;
    }

    // Late appends from an overlapping run, or a failed delete in the
    // retiring pass, may have left samples behind.
    match db.delete_all(app.id).await {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(app_id = app.id, removed, "Dropped stale history"),
        Err(e) => {
            tracing::warn!(app_id = app.id, error = %e, "Failed to clear stale history");
            return Outcome::Failed;
        }
    }

    match db.set_usable(app.id, true).await {
        Ok(()) => {
            tracing::info!(app_id = app.id, name = %app.name, live, "Marked app as usable");
            Outcome::Done
        }
        Err(e) => {
            tracing::warn!(app_id = app.id, error = %e, "Failed to mark app as usable");
            Outcome::Failed
        }
    }
}

/// Total, usable and unusable app counts.
pub async fn catalog_counts(db: &dyn Database) -> Result<CatalogCounts, Error> {
    Ok(db.catalog_counts().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::steam::MockSteam;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn fill_history(store: &MemoryStore, app_id: u32, counts: &[u32]) {
        for (i, &count) in counts.iter().enumerate() {
            let at = Utc.timestamp_opt(1_000 + i as i64 * 60, 0).unwrap();
            store.append_record(app_id, at, count).await.unwrap();
        }
    }

    #[test]
    fn test_thresholds() {
        assert!(should_deactivate(11, 0.99));
        assert!(!should_deactivate(10, 0.0));
        assert!(!should_deactivate(11, 1.0));

        assert!(should_reactivate(6));
        assert!(!should_reactivate(5));
    }

    #[tokio::test]
    async fn test_pass_a_retires_quiet_app() {
        let store = MemoryStore::new();
        store.insert_app(10, "Quiet", true);
        // 12 records averaging 0.5
        fill_history(&store, 10, &[0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1]).await;

        let report = detect_unusable_apps(&store).await.unwrap();

        assert_eq!(report.changed, 1);
        assert!(!store.get_by_id(10).await.unwrap().unwrap().usable);
        assert!(store.read_all(10).await.unwrap().is_empty());
        assert!(!store.has_history(10));
    }

    #[tokio::test]
    async fn test_pass_a_keeps_active_and_young_apps() {
        let store = MemoryStore::new();
        store.insert_app(1, "Busy", true);
        store.insert_app(2, "Young", true);
        store.insert_app(3, "Empty", true);
        let mut busy = vec![0; 10];
        busy.push(50);
        fill_history(&store, 1, &busy).await;
        fill_history(&store, 2, &[0; 10]).await;

        let report = detect_unusable_apps(&store).await.unwrap();

        assert_eq!(
            report,
            ClassificationReport {
                examined: 3,
                changed: 0,
                failed: 0,
            }
        );
        assert_eq!(store.read_all(1).await.unwrap().len(), 11);
        assert_eq!(store.read_all(2).await.unwrap().len(), 10);
        assert!(store.get_by_id(3).await.unwrap().unwrap().usable);
    }

    #[tokio::test]
    async fn test_pass_a_is_idempotent() {
        let store = MemoryStore::new();
        store.insert_app(1, "Quiet", true);
        store.insert_app(2, "Busy", true);
        fill_history(&store, 1, &[0; 11]).await;
        fill_history(&store, 2, &[3; 11]).await;

        detect_unusable_apps(&store).await.unwrap();
        let first = (store.all_usable().await.unwrap(), store.all_unusable().await.unwrap());

        let second_report = detect_unusable_apps(&store).await.unwrap();
        let second = (store.all_usable().await.unwrap(), store.all_unusable().await.unwrap());

        assert_eq!(first, second);
        assert_eq!(second_report.changed, 0);
    }

    #[tokio::test]
    async fn test_pass_a_store_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            detect_unusable_apps(&store).await.unwrap_err(),
            Error::Database(_)
        ));
    }

    #[tokio::test]
    async fn test_pass_b_revives_busy_apps() {
        let store = Arc::new(MemoryStore::new());
        store.insert_app(20, "Revived", false);
        store.insert_app(21, "Still quiet", false);
        store.insert_app(22, "Unreachable", false);
        store.insert_app(23, "Already usable", true);
        let steam = Arc::new(
            MockSteam::new()
                .with_count(20, 8)
                .with_count(21, 5)
                .with_failure(22)
                .with_count(23, 1000),
        );

        let report = detect_usable_apps(store.clone(), steam.clone(), &TrackerConfig::default())
            .await
            .unwrap();

        assert_eq!(
            report,
            ClassificationReport {
                examined: 3,
                changed: 1,
                failed: 1,
            }
        );
        assert_eq!(steam.calls(), 3);
        assert!(store.get_by_id(20).await.unwrap().unwrap().usable);
        assert!(!store.has_history(20));
        assert!(!store.get_by_id(21).await.unwrap().unwrap().usable);
        assert!(!store.get_by_id(22).await.unwrap().unwrap().usable);
    }

    #[tokio::test]
    async fn test_reactivated_app_starts_fresh_history() {
        let store = Arc::new(MemoryStore::new());
        store.insert_app(10, "Flapping", true);
        fill_history(&store, 10, &[0; 12]).await;

        detect_unusable_apps(store.as_ref()).await.unwrap();
        let steam = Arc::new(MockSteam::new().with_count(10, 9));
        detect_usable_apps(store.clone(), steam.clone(), &TrackerConfig::default())
            .await
            .unwrap();
        crate::tracker::record_history(store.clone(), steam, &TrackerConfig::default())
            .await
            .unwrap();

        let history = store.read_all(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].count, 9);
    }

    #[tokio::test]
    async fn test_catalog_counts() {
        let store = MemoryStore::new();
        store.insert_app(1, "A", true);
        store.insert_app(2, "B", false);
        store.insert_app(3, "C", true);

        assert_eq!(
            catalog_counts(&store).await.unwrap(),
            CatalogCounts {
                total: 3,
                usable: 2,
                unusable: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_pass_a_continues_past_failing_app() {
        let store = MemoryStore::new();
        for id in 1..=3 {
            store.insert_app(id, format!("Quiet {}", id), true);
            fill_history(&store, id, &[0; 11]).await;
        }
        store.fail_app(2);

        let report = detect_unusable_apps(&store).await.unwrap();

        assert_eq!(
            report,
            ClassificationReport {
                examined: 3,
                changed: 2,
                failed: 1,
            }
        );
        assert!(!store.get_by_id(1).await.unwrap().unwrap().usable);
        assert!(store.get_by_id(2).await.unwrap().unwrap().usable);
        assert!(!store.get_by_id(3).await.unwrap().unwrap().usable);
        assert!(!store.has_history(1));
        assert!(!store.has_history(3));
    }

    #[tokio::test]
    async fn test_reactivation_drops_late_samples() {
        let store = Arc::new(MemoryStore::new());
        store.insert_app(10, "Flapping", true);
        fill_history(&store, 10, &[0; 12]).await;

        detect_unusable_apps(store.as_ref()).await.unwrap();
        // A collection run that listed the app before it was retired
        store.append_record(10, Utc::now(), 0).await.unwrap();

        let steam = Arc::new(MockSteam::new().with_count(10, 9));
        let report = detect_usable_apps(store.clone(), steam, &TrackerConfig::default())
            .await
            .unwrap();

        assert_eq!(report.changed, 1);
        assert!(store.get_by_id(10).await.unwrap().unwrap().usable);
        assert!(store.read_all(10).await.unwrap().is_empty());
        assert!(!store.has_history(10));
    }

    #[tokio::test]
    async fn test_reactivation_waits_for_history_delete() {
        let store = Arc::new(MemoryStore::new());
        store.insert_app(20, "Busy again", false);
        store.insert_app(21, "Also busy", false);
        store.fail_app(20);
        let steam = Arc::new(MockSteam::new().with_count(20, 50).with_count(21, 50));

        let report = detect_usable_apps(store.clone(), steam, &TrackerConfig::default())
            .await
            .unwrap();

        assert_eq!(report.changed, 1);
        assert_eq!(report.failed, 1);
        assert!(!store.get_by_id(20).await.unwrap().unwrap().usable);
        assert!(store.get_by_id(21).await.unwrap().unwrap().usable);
    }
}
