//! Player-count collection.
//!
//! [`record_history`] samples every usable app once and appends the result to
//! its history. [`update_metadata`] refreshes the catalog from the app list.

pub mod pool;

use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::db::Database;
use crate::error::Error;
use crate::history::now_seconds;
use crate::steam::{AppListSource, PlayerCountSource};

pub use pool::{Outcome, PoolReport, run_pool};

/// Result of one collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl From<PoolReport> for BatchReport {
    fn from(report: PoolReport) -> Self {
        Self {
            dispatched: report.dispatched,
            succeeded: report.done,
            failed: report.failed + report.skipped,
        }
    }
}

/// Record the current player count of every usable app.
///
/// Fails only if the usable set cannot be read. Per-app fetch or write
/// failures are logged and skipped; nothing is retried within a run.
pub async fn record_history(
    db: Arc<dyn Database>,
    source: Arc<dyn PlayerCountSource>,
    config: &TrackerConfig,
) -> Result<BatchReport, Error> {
    let apps = db.all_usable().await?;
    let ids: Vec<u32> = apps.iter().map(|app| app.id).collect();

    tracing::info!(
        apps = ids.len(),
        workers = config.worker_count,
        "Recording app usage"
    );

    let report = run_pool(ids, config.worker_count, move |app_id| {
        let db = Arc::clone(&db);
        let source = Arc::clone(&source);
        async move { record_one(db.as_ref(), source.as_ref(), app_id).await }
    })
    .await;

    let report = BatchReport::from(report);
    tracing::info!(
        dispatched = report.dispatched,
        succeeded = report.succeeded,
        failed = report.failed,
        "History is recorded"
    );
    Ok(report)
}

async fn record_one(db: &dyn Database, source: &dyn PlayerCountSource, app_id: u32) -> Outcome {
    let count = match source.player_count(app_id).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(app_id, error = %e, "Failed to fetch player count");
            return Outcome::Failed;
        }
    };

    match db.append_record(app_id, now_seconds(), count).await {
        Ok(()) => Outcome::Done,
        Err(e) => {
            tracing::warn!(app_id, error = %e, "Failed to store usage record");
            Outcome::Failed
        }
    }
}

/// Refresh app names and add new apps from the app list.
///
/// Returns the number of catalog rows written.
pub async fn update_metadata(
    db: &dyn Database,
    source: &dyn AppListSource,
) -> Result<u64, Error> {
    let apps = source.app_list().await?;
    tracing::info!(apps = apps.len(), "Updating app metadata");

    let written = db.upsert_many(&apps).await?;
    tracing::info!(written, "Metadata updated");
    Ok(written)
}
