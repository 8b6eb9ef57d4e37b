//! Configuration for the transfer ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Unit-of-work configuration
    pub transaction: TransactionConfig,

    /// Retry configuration
    pub retry: RetryConfig,

    /// Ledger rules
    pub ledger: LedgerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/transfers"),
            service_name: "transfer-core".to_string(),
            rocksdb: RocksDBConfig::default(),
            transaction: TransactionConfig::default(),
            retry: RetryConfig::default(),
            ledger: LedgerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Unit-of-work configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Upper bound on a single row-lock wait (milliseconds).
    /// Capped further by the time left before the unit's deadline.
    pub lock_timeout_ms: u64,

    /// Timeout used when a caller does not pass one (milliseconds)
    pub default_timeout_ms: u64,

    /// Enable RocksDB deadlock detection
    pub deadlock_detect: bool,
}

impl TransactionConfig {
    /// Default timeout as a `Duration`
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 1_000,
            default_timeout_ms: 5_000,
            deadlock_detect: true,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts in total, including the first one
    pub max_attempts: u32,

    /// Delay before attempt n+1 is `base_delay_ms * n`
    pub base_delay_ms: u64,

    /// Relative jitter applied to each delay (0.0 disables)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            jitter_factor: 0.0,
        }
    }
}

/// Ledger rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Allow balances to go below zero
    pub allow_overdraft: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            allow_overdraft: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("TRANSFER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Some(ms) = env_parse("TRANSFER_LOCK_TIMEOUT_MS")? {
            config.transaction.lock_timeout_ms = ms;
        }

        if let Some(ms) = env_parse("TRANSFER_DEFAULT_TIMEOUT_MS")? {
            config.transaction.default_timeout_ms = ms;
        }

        if let Some(attempts) = env_parse("TRANSFER_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }

        if let Some(allow) = env_parse("TRANSFER_ALLOW_OVERDRAFT")? {
            config.ledger.allow_overdraft = allow;
        }

        if let Some(json) = env_parse("TRANSFER_LOG_JSON")? {
            config.logging.json = json;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> crate::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("{}={}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
