use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use steamhistory::analysis::{self, ClassificationReport};
use steamhistory::cache::{CacheStore, CachedReader, MemoryCache, RedisCache};
use steamhistory::config::{CacheConfig, Config};
use steamhistory::db::Database;
use steamhistory::history::Store;
use steamhistory::logging::init_logging;
use steamhistory::steam::SteamClient;
use steamhistory::tracker;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of concurrent workers for batch operations
    ///
    /// Can be overridden with WORKER_COUNT environment variable
    #[arg(short, long, env = "WORKER_COUNT")]
    workers: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Refresh the app catalog from the Steam app list
    UpdateMetadata,

    /// Record the current player count of every usable app
    RecordHistory,

    /// Mark usable apps without players as unusable and drop their history
    DetectUnusable,

    /// Mark unusable apps that have players again as usable
    DetectUsable,

    /// Show catalog size by classification
    Counts,

    /// Print the history of an app as JSON
    History {
        /// Steam app id
        app_id: u32,
    },

    /// Print today's most popular apps as JSON
    Popular,

    /// Search apps by name and print them as JSON
    Search {
        /// Part of the app name
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(workers) = cli.workers {
        config.tracker = config.tracker.with_worker_count(workers);
    }

    let store = Arc::new(
        Store::new(&config.database)
            .await
            .context("failed to connect to the database")?,
    );
    let db: Arc<dyn Database> = store.clone();
    let steam = Arc::new(SteamClient::new(&config.steam)?);

    match cli.command {
        Command::Migrate => {
            store.run_migrations().await?;
            tracing::info!("Migrations applied");
        }
        Command::UpdateMetadata => {
            tracker::update_metadata(db.as_ref(), steam.as_ref()).await?;
        }
        Command::RecordHistory => {
            tracker::record_history(db, steam, &config.tracker).await?;
        }
        Command::DetectUnusable => {
            let report = analysis::detect_unusable_apps(db.as_ref()).await?;
            log_classification("Unusable app detection finished", report);
        }
        Command::DetectUsable => {
            let report = analysis::detect_usable_apps(db, steam, &config.tracker).await?;
            log_classification("Usable app detection finished", report);
        }
        Command::Counts => {
            let counts = analysis::catalog_counts(db.as_ref()).await?;
            println!("total:    {}", counts.total);
            println!("usable:   {}", counts.usable);
            println!("unusable: {}", counts.unusable);
        }
        Command::History { app_id } => {
            let reader = CachedReader::new(db, cache_store(&config.cache).await);
            print_payload(&reader.history(app_id).await?)?;
        }
        Command::Popular => {
            let reader = CachedReader::new(db, cache_store(&config.cache).await);
            print_payload(&reader.popular_today().await?)?;
        }
        Command::Search { query } => {
            let reader = CachedReader::new(db, cache_store(&config.cache).await);
            print_payload(&reader.search(&query).await?)?;
        }
    }

    Ok(())
}

/// Shared Redis cache when configured and reachable, in-process otherwise.
async fn cache_store(config: &CacheConfig) -> Arc<dyn CacheStore> {
    if let Some(url) = config.redis_url() {
        match RedisCache::connect(url).await {
            Ok(cache) => return Arc::new(cache),
            Err(e) => tracing::warn!(error = %e, "Redis cache unavailable, using in-process cache"),
        }
    }
    Arc::new(MemoryCache::with_capacity(config.capacity_bytes))
}

fn log_classification(message: &str, report: ClassificationReport) {
    tracing::info!(
        examined = report.examined,
        changed = report.changed,
        failed = report.failed,
        "{}",
        message
    );
}

fn print_payload(payload: &[u8]) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(payload)?;
    writeln!(stdout)?;
    Ok(())
}
