//! masterstore configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::{RetryPolicy, StoreConfig};

/// Default etcd key of the master lock
pub const DEFAULT_LOCK_PATH: &str = "/master/lock";

/// Default etcd key of the master state
pub const DEFAULT_STATE_PATH: &str = "/master/state";

/// Main masterstore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordination backend ("etcd" or "memory")
    pub backend: String,

    /// Coordination service cluster addresses
    pub endpoints: Vec<String>,

    /// Key identifying the distributed mutex
    #[serde(rename = "lock-path")]
    pub lock_path: String,

    /// Key identifying the stored state blob
    #[serde(rename = "state-path")]
    pub state_path: String,

    /// Session lease duration in seconds
    #[serde(rename = "ttl-secs")]
    pub ttl_secs: u64,

    /// Connection timeout in milliseconds
    #[serde(rename = "dial-timeout-ms")]
    pub dial_timeout_ms: u64,

    /// Give up initial lock acquisition after this long (unset: wait forever)
    #[serde(rename = "acquire-timeout-ms")]
    pub acquire_timeout_ms: Option<u64>,

    /// Deadline for a single save/load including retries (unset: none)
    #[serde(rename = "op-timeout-ms")]
    pub op_timeout_ms: Option<u64>,

    /// Ownership-loss retry policy
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: "etcd".to_string(),
            endpoints: Vec::new(),
            lock_path: DEFAULT_LOCK_PATH.to_string(),
            state_path: DEFAULT_STATE_PATH.to_string(),
            ttl_secs: 60,
            dial_timeout_ms: 5_000,
            acquire_timeout_ms: None,
            op_timeout_ms: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.backend == "etcd" && self.endpoints.is_empty() {
            return Err(eyre::eyre!("No etcd endpoints configured. Set `endpoints` in the config file."));
        }
        if self.lock_path.is_empty() || self.state_path.is_empty() {
            return Err(eyre::eyre!("lock-path and state-path must not be empty"));
        }
        if self.lock_path == self.state_path {
            return Err(eyre::eyre!(
                "lock-path and state-path must differ (both are {})",
                self.lock_path
            ));
        }
        if self.ttl_secs == 0 {
            return Err(eyre::eyre!("ttl-secs must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(eyre::eyre!("retry.max-attempts must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .masterstore.yml
        let local_config = PathBuf::from(".masterstore.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/masterstore/masterstore.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("masterstore").join("masterstore.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Runtime settings for [`crate::StateStore`]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            lock_path: self.lock_path.clone(),
            state_path: self.state_path.clone(),
            ttl: Duration::from_secs(self.ttl_secs),
            acquire_timeout: self.acquire_timeout_ms.map(Duration::from_millis),
            op_timeout: self.op_timeout_ms.map(Duration::from_millis),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }
}

/// Retry behaviour when ownership is found lost
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Transactions attempted per save/load before giving up
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Backoff before the first reacquisition, doubled each time
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the backoff
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}
