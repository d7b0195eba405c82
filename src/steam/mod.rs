//! External data sources.
//!
//! The Steam Web API provides both the live player count of an app and the
//! full app list. Both are modelled as traits so batch operations can run
//! against fakes.

mod client;
#[cfg(any(test, feature = "integration"))]
mod mock;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::history::AppInfo;

pub use client::SteamClient;
#[cfg(any(test, feature = "integration"))]
pub use mock::MockSteam;

/// Source of live player counts. Must tolerate hundreds of concurrent calls.
#[async_trait]
pub trait PlayerCountSource: Send + Sync {
    /// Number of players currently in `app_id`.
    async fn player_count(&self, app_id: u32) -> Result<u32, SourceError>;
}

/// Source of the full app catalog.
#[async_trait]
pub trait AppListSource: Send + Sync {
    async fn app_list(&self) -> Result<Vec<AppInfo>, SourceError>;
}
