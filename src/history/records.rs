//! Catalog and usage record types.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// A Steam application as returned by the app-list source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: u32,
    pub name: String,
}

impl AppInfo {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A catalog entry.
///
/// Only usable apps have their player counts collected. The flag is changed
/// exclusively by the classifier; catalog refreshes never touch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: u32,
    pub name: String,
    pub usable: bool,
}

/// One player-count sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub app_id: u32,
    pub timestamp: DateTime<Utc>,
    pub count: u32,
}

impl UsageRecord {
    /// `[unix_seconds, count]` pair used by the history view.
    pub fn as_pair(&self) -> [i64; 2] {
        [self.timestamp.timestamp(), i64::from(self.count)]
    }
}

/// Record count and mean player count of one app's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistoryAggregate {
    pub count: u64,
    pub average: f64,
}

impl HistoryAggregate {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Catalog size broken down by classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub total: u64,
    pub usable: u64,
    pub unusable: u64,
}

/// An entry of the popularity ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularApp {
    pub id: u32,
    pub name: String,
    pub peak: u32,
}

/// Current time truncated to whole seconds, the precision records are kept at.
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
