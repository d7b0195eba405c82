//! Canned Steam responses for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::SourceError;
use crate::history::AppInfo;
use crate::steam::{AppListSource, PlayerCountSource};

/// Fixed player counts and app list.
///
/// Apps without a configured count, and apps marked failing, return an error.
#[derive(Debug, Default)]
pub struct MockSteam {
    counts: HashMap<u32, u32>,
    failing: HashSet<u32>,
    apps: Vec<AppInfo>,
    calls: AtomicUsize,
}

impl MockSteam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, app_id: u32, count: u32) -> Self {
        self.counts.insert(app_id, count);
        self
    }

    pub fn with_failure(mut self, app_id: u32) -> Self {
        self.failing.insert(app_id);
        self
    }

    pub fn with_apps(mut self, apps: Vec<AppInfo>) -> Self {
        self.apps = apps;
        self
    }

    /// Number of player-count requests served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerCountSource for MockSteam {
    async fn player_count(&self, app_id: u32) -> Result<u32, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.contains(&app_id) {
            return Err(SourceError::BadStatus {
                app_id,
                status: 500,
            });
        }

        self.counts.get(&app_id).copied().ok_or_else(|| {
            SourceError::InvalidResponse(format!("app {} has no player_count", app_id))
        })
    }
}

#[async_trait]
impl AppListSource for MockSteam {
    async fn app_list(&self) -> Result<Vec<AppInfo>, SourceError> {
        Ok(self.apps.clone())
    }
}
