//! Fixed-width worker pool shared by the batch operations.
//!
//! One producer feeds every item into a bounded queue and closes it; `width`
//! workers drain the queue, each finishing its item before taking the next;
//! the call returns once every worker has exited.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

/// What happened to one dispatched item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The item's work was carried out.
    Done,
    /// The item was processed but needed no change.
    Skipped,
    /// The item failed and was logged.
    Failed,
}

/// Tally of a pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub dispatched: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PoolReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Done => self.done += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: PoolReport) {
        self.done += other.done;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    fn accounted(&self) -> usize {
        self.done + self.skipped + self.failed
    }
}

/// Run `job` over every item with `width` concurrent workers.
///
/// Returns after all items have terminated. Items lost to a panicking worker
/// are counted as failed.
pub async fn run_pool<T, F, Fut>(items: Vec<T>, width: usize, job: F) -> PoolReport
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let width = width.max(1);
    let mut report = PoolReport {
        dispatched: items.len(),
        ..Default::default()
    };

    let (tx, rx) = mpsc::channel::<T>(width);
    let rx = Arc::new(Mutex::new(rx));
    let job = Arc::new(job);

    let mut workers = JoinSet::new();
    for _ in 0..width {
        let rx = Arc::clone(&rx);
        let job = Arc::clone(&job);
        workers.spawn(async move {
            let mut tally = PoolReport::default();
            loop {
                let next = rx.lock().await.recv().await;
                let Some(item) = next else { break };
                tally.record(job(item).await);
            }
            tally
        });
    }

    for item in items {
        if tx.send(item).await.is_err() {
            tracing::error!("All workers exited before the queue was drained");
            break;
        }
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(tally) => report.merge(tally),
            Err(e) => tracing::error!(error = %e, "Worker task failed"),
        }
    }

    let lost = report.dispatched.saturating_sub(report.accounted());
    report.failed += lost;
    report
}
