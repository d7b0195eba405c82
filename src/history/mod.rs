//! History and catalog persistence.
//!
//! Stores the app catalog and every app's player-count samples in PostgreSQL.
//! Each app's history is the set of `usage_records` rows carrying its id;
//! it appears with the first sample and is dropped when the app is
//! classified unusable.

mod analytics;
mod records;
mod store;

pub use analytics::escape_like;
pub use records::{
    App, AppInfo, CatalogCounts, HistoryAggregate, PopularApp, UsageRecord, now_seconds,
};
pub use store::Store;
