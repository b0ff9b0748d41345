//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Default location of the persistent backing file
pub const DEFAULT_DB_PATH: &str = ".swarm/memory.db";

/// Main store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backing file of the persistent backend
    pub db_path: PathBuf,

    /// How long a writer waits for the SQLite write lock
    pub lock_timeout_ms: u64,

    /// SQLite page cache size
    pub cache_size_kib: u64,

    /// Journal sync policy
    pub synchronous: SyncMode,

    /// Skip the persistent backend and run in memory only
    pub force_volatile: bool,

    /// Period of the optional background TTL sweep
    pub sweep_interval_secs: Option<u64>,

    /// Retry policy for lock contention
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            lock_timeout_ms: 5000,
            cache_size_kib: 8192,
            synchronous: SyncMode::Full,
            force_volatile: false,
            sweep_interval_secs: None,
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backing file
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Set the lock wait timeout
    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }

    /// Run without the persistent backend
    pub fn with_force_volatile(mut self, volatile: bool) -> Self {
        self.force_volatile = volatile;
        self
    }

    /// Enable the periodic TTL sweep
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = Some(secs);
        self
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sweep period, if enabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults overridden by `COORD_MEMORY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("COORD_MEMORY_DB") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(ms) = lookup("COORD_MEMORY_LOCK_TIMEOUT_MS") {
            self.lock_timeout_ms = parse_env("COORD_MEMORY_LOCK_TIMEOUT_MS", &ms)?;
        }
        if let Some(flag) = lookup("COORD_MEMORY_VOLATILE") {
            self.force_volatile = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(secs) = lookup("COORD_MEMORY_SWEEP_SECS") {
            self.sweep_interval_secs = Some(parse_env("COORD_MEMORY_SWEEP_SECS", &secs)?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the backends cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.force_volatile && self.db_path.as_os_str().is_empty() {
            return Err(StoreError::Config("db_path must not be empty".into()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(StoreError::Config("lock_timeout_ms must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(StoreError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(StoreError::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// SQLite `synchronous` setting under WAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Durable across process crashes
    Normal,
    /// Also durable across power loss: every commit is fsynced
    Full,
}

impl SyncMode {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Bounded exponential backoff for lock contention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay_ms: u64,

    /// Cap on any single delay
    pub max_delay_ms: u64,

    /// Add ±25% random jitter
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 2000,
            jitter: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| StoreError::Config(format!("{} has invalid value '{}'", name, raw)))
}
