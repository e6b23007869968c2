//! Run configuration
//!
//! All values are supplied from the environment (optionally via a `.env`
//! file). Credentials are opaque tokens; nothing here inspects them.

use crate::error::{HarvestError, Result};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Upstream listings endpoint.
pub const DEFAULT_API_URL: &str = "https://pro.scouterdev.io/api/penny-items";

/// Per-request timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

/// Delay between partition requests in milliseconds.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1200;

/// Maximum unique items admitted to staging per run.
pub const DEFAULT_MAX_UNIQUES: usize = 6000;

/// Rows per store write.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Pause between store writes in milliseconds.
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 100;

/// Staging rows older than this are pruned before new rows are admitted.
pub const DEFAULT_RETENTION_DAYS: i64 = 60;
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Atlanta metro zip codes used when no override is configured.
pub const DEFAULT_PARTITIONS: &[&str] = &[
    "30301", // Downtown
    "30303", // Atlanta
    "30305", // Buckhead
    "30308", // Midtown
    "30309", // Midtown
    "30310", // West End
    "30318", // West Midtown
    "30324", // Lindbergh
    "30327", // Buckhead
    "30339", // Vinings
];

/// Opaque session credentials for the upstream API.
#[derive(Clone)]
pub struct Credentials {
    pub cookie: String,
    pub guild_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cookie", &"[redacted]")
            .field("guild_id", &self.guild_id)
            .finish()
    }
}

/// Settings for the partition fetch stage
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub request_delay: Duration,
    pub partitions: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            partitions: DEFAULT_PARTITIONS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl FetchConfig {
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_partitions<I, S>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitions = partitions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Settings for the staging store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Postgres connection string; `None` only for dry runs.
    pub database_url: Option<String>,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub retention_days: i64,
    pub max_uniques: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: Duration::from_millis(DEFAULT_BATCH_PAUSE_MS),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_uniques: DEFAULT_MAX_UNIQUES,
        }
    }
}

/// Full configuration for one staging-warmer run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub credentials: Credentials,
    pub fetch: FetchConfig,
    pub store: StoreConfig,
}

impl HarvestConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env(require_store: bool) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok(), require_store)
    }

    /// Load from an arbitrary key lookup.
    ///
    /// Every missing required variable is reported in a single error.
    pub fn from_lookup<F>(lookup: F, require_store: bool) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cookie = get("PENNY_RAW_COOKIE");
        let guild_id = get("PENNY_GUILD_ID");
        let database_url = get("DATABASE_URL");

        let mut missing = Vec::new();
        if cookie.is_none() {
            missing.push("PENNY_RAW_COOKIE");
        }
        if guild_id.is_none() {
            missing.push("PENNY_GUILD_ID");
        }
        if require_store && database_url.is_none() {
            missing.push("DATABASE_URL");
        }
        if !missing.is_empty() {
            return Err(HarvestError::config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let mut fetch = FetchConfig::default();
        if let Some(url) = get("PENNY_API_URL") {
            fetch.api_url = url;
        }
        if let Some(secs) = parse_number::<u64>(&get, "PENNY_FETCH_TIMEOUT_SECS")? {
            fetch.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_number::<u64>(&get, "PENNY_REQUEST_DELAY_MS")? {
            fetch.request_delay = Duration::from_millis(ms);
        }
        if let Some(zips) = get("PENNY_ZIP_CODES") {
            let partitions: Vec<String> = zips
                .split(',')
                .map(str::trim)
                .filter(|z| !z.is_empty())
                .map(str::to_string)
                .collect();
            if !partitions.is_empty() {
                fetch.partitions = partitions;
            }
        }

        let mut store = StoreConfig {
            database_url,
            ..StoreConfig::default()
        };
        if let Some(n) = parse_number::<usize>(&get, "MAX_UNIQUES")? {
            store.max_uniques = n;
        }
        if let Some(n) = parse_number::<usize>(&get, "BATCH_SIZE")? {
            store.batch_size = n;
        }
        if let Some(ms) = parse_number::<u64>(&get, "PENNY_BATCH_PAUSE_MS")? {
            store.batch_pause = Duration::from_millis(ms);
        }
        if let Some(days) = parse_number::<i64>(&get, "STAGING_RETENTION_DAYS")? {
            store.retention_days = days;
        }

        let config = HarvestConfig {
            credentials: Credentials {
                // checked above
                cookie: cookie.unwrap_or_default(),
                guild_id: guild_id.unwrap_or_default(),
            },
            fetch,
            store,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.partitions.is_empty() {
            return Err(HarvestError::config("Partition list cannot be empty"));
        }
        if self.fetch.request_delay.is_zero() {
            return Err(HarvestError::config(
                "PENNY_REQUEST_DELAY_MS must be greater than 0",
            ));
        }
        if self.fetch.timeout.is_zero() {
            return Err(HarvestError::config(
                "PENNY_FETCH_TIMEOUT_SECS must be greater than 0",
            ));
        }
        if self.store.batch_size == 0 {
            return Err(HarvestError::config("BATCH_SIZE must be greater than 0"));
        }
        if self.store.max_uniques == 0 {
            return Err(HarvestError::config("MAX_UNIQUES must be greater than 0"));
        }
        if self.store.retention_days <= 0 {
            return Err(HarvestError::config(
                "STAGING_RETENTION_DAYS must be greater than 0",
            ));
        }
        if self.store.retention_days > MAX_RETENTION_DAYS {
            return Err(HarvestError::config(format!(
                "STAGING_RETENTION_DAYS must be at most {}",
                MAX_RETENTION_DAYS
            )));
        }
        Ok(())
    }
}

fn parse_number<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| HarvestError::config(format!("{} must be a number, got '{}'", key, raw))),
    }
}
