//! Configuration for the ledger

use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for segment storage
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Wire protocol listen address
    pub listen_addr: String,

    /// Write-behind batching configuration
    pub batching: BatchingConfig,

    /// Startup recovery configuration
    pub recovery: RecoveryConfig,

    /// Provisioned accounts
    pub accounts: Vec<AccountConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-core".to_string(),
            listen_addr: "0.0.0.0:5001".to_string(),
            batching: BatchingConfig::default(),
            recovery: RecoveryConfig::default(),
            accounts: AccountConfig::defaults(),
        }
    }
}

/// Batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Buffered transactions per account before a segment is written
    pub max_batch_size: usize,

    /// Bound of the write-behind queue; senders wait when it is full
    pub queue_capacity: usize,

    /// Periodic flush of every non-empty buffer (milliseconds, 0 = off)
    pub flush_interval_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,   // 100 transactions per segment
            queue_capacity: 1000,
            flush_interval_ms: 0,
        }
    }
}

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Rebuild balances and recent transactions from segments at boot
    pub enabled: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One provisioned account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account id (first character significant)
    pub id: AccountId,

    /// Credit limit, fixed for the life of the process
    pub limit: i64,
}

impl AccountConfig {
    /// The five stock accounts
    pub fn defaults() -> Vec<Self> {
        [
            (b'1', 100_000),
            (b'2', 80_000),
            (b'3', 1_000_000),
            (b'4', 10_000_000),
            (b'5', 500_000),
        ]
        .into_iter()
        .map(|(id, limit)| Self {
            id: AccountId::new(id),
            limit,
        })
        .collect()
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `LEDGER_*` environment overrides on top of `self`
    pub fn with_env_overrides(mut self) -> crate::Result<Self> {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(addr) = std::env::var("LEDGER_LISTEN_ADDR") {
            self.listen_addr = addr;
        }

        if let Ok(enabled) = std::env::var("LEDGER_RECOVERY_ENABLED") {
            self.recovery.enabled = enabled.parse().map_err(|_| {
                crate::Error::Config(format!("LEDGER_RECOVERY_ENABLED: {:?}", enabled))
            })?;
        }

        if let Ok(size) = std::env::var("LEDGER_BATCH_SIZE") {
            self.batching.max_batch_size = size
                .parse()
                .map_err(|_| crate::Error::Config(format!("LEDGER_BATCH_SIZE: {:?}", size)))?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check invariants the ledger relies on
    pub fn validate(&self) -> crate::Result<()> {
        if self.batching.max_batch_size == 0 {
            return Err(crate::Error::Config("max_batch_size must be > 0".to_string()));
        }
        if self.batching.queue_capacity == 0 {
            return Err(crate::Error::Config("queue_capacity must be > 0".to_string()));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.limit < 0 || account.limit > i64::from(i32::MAX) {
                return Err(crate::Error::Config(format!(
                    "account {} has limit {} outside 0..=i32::MAX",
                    account.id, account.limit
                )));
            }
            if !seen.insert(account.id) {
                return Err(crate::Error::Config(format!(
                    "account {} provisioned twice",
                    account.id
                )));
            }
        }

        Ok(())
    }
}
