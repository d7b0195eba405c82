//! steamhistory - player-count history for Steam applications.
//!
//! Periodically samples the concurrent player count of every tracked app,
//! stores the samples per app, and keeps the set of tracked ("usable") apps
//! limited to those that actually have players.
//!
//! - [`tracker`] collects samples with a fixed-width worker pool.
//! - [`analysis`] retires and revives apps.
//! - [`db`] and [`history`] hold the catalog and the histories.
//! - [`cache`] serves read views through a TTL cache.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod logging;
pub mod steam;
pub mod tracker;

pub use config::Config;
pub use error::{Error, Result};
