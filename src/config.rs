//! Configuration loaded from the environment.
//!
//! `.env` is read first (via `dotenvy`), then:
//!
//! | Variable                     | Default                           |
//! |------------------------------|-----------------------------------|
//! | `DATABASE_URL`               | required                          |
//! | `DATABASE_POOL_SIZE`         | 16                                |
//! | `STEAM_API_BASE`             | `https://api.steampowered.com`    |
//! | `STEAM_REQUEST_TIMEOUT_SECS` | 30                                |
//! | `WORKER_COUNT`               | 200                               |
//! | `REDIS_URL`                  | unset (in-process cache)          |
//! | `CACHE_CAPACITY_BYTES`       | 67108864                          |

use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::cache::DEFAULT_CAPACITY_BYTES;
use crate::error::ConfigError;

/// Default width of the fetcher and reactivation worker pools.
pub const DEFAULT_WORKER_COUNT: usize = 200;

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub steam: SteamConfig,
    pub tracker: TrackerConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database: DatabaseConfig::from_env()?,
            steam: SteamConfig::from_env()?,
            tracker: TrackerConfig::from_env()?,
            cache: CacheConfig::from_env()?,
        })
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    url: SecretString,
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: SecretString::from(url.into()),
            pool_size: 16,
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
        Ok(Self {
            url: SecretString::from(url),
            pool_size: parse_env("DATABASE_POOL_SIZE", 16)?,
        })
    }

    /// Connection URL. Contains credentials, never log it.
    pub fn url(&self) -> &str {
        self.url.expose_secret()
    }
}

/// Steam Web API settings.
#[derive(Debug, Clone)]
pub struct SteamConfig {
    pub api_base: String,
    pub request_timeout: Duration,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.steampowered.com".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SteamConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            api_base: std::env::var("STEAM_API_BASE").unwrap_or(defaults.api_base),
            request_timeout: Duration::from_secs(parse_env(
                "STEAM_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }
}

/// Settings shared by the batch operations.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Number of concurrent workers per batch.
    pub worker_count: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }
}

impl TrackerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let worker_count = parse_env("WORKER_COUNT", DEFAULT_WORKER_COUNT)?;
        if worker_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKER_COUNT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self { worker_count })
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }
}

/// Read-view cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    redis_url: Option<SecretString>,
    pub capacity_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
        }
    }
}

impl CacheConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(SecretString::from);
        Ok(Self {
            redis_url,
            capacity_bytes: parse_env("CACHE_CAPACITY_BYTES", DEFAULT_CAPACITY_BYTES)?,
        })
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(SecretString::from(url.into()));
        self
    }

    /// Redis server shared by all processes, if configured.
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_ref().map(|url| url.expose_secret())
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
