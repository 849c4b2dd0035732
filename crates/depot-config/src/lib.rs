//! Configuration management for depot.
//!
//! Parses `depot.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `store.root`

mod expand;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use depot_lock::{FileLockProvider, LockProvider, MemoryLockProvider, NullLockProvider};
use depot_store::{FsResourceStore, StoreError};
use serde::Deserialize;

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "depot.toml";

/// Deployment configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DepotConfig {
    /// Store configuration.
    pub store: StoreConfig,
    /// Change watching configuration.
    pub watch: WatchConfig,
    /// Locking configuration.
    pub lock: LockConfig,

    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Store configuration.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding the resource tree. Must already exist and be
    /// writable when the store is built.
    pub root: Option<String>,
}

/// Change watching configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

/// Lock provider selection.
#[derive(Clone, Copy, Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategy {
    /// No locking at all.
    None,
    /// In-process locking only.
    #[default]
    Memory,
    /// Cross-process advisory file locks under the store root.
    File,
}

/// Locking configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Which lock provider guards the store.
    pub strategy: LockStrategy,
    /// Milliseconds between file lock retries.
    pub retry_delay_ms: u64,
    /// Total seconds to spend waiting for one file lock.
    pub timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::default(),
            retry_delay_ms: 20,
            timeout_secs: 120,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`store.root`").
        field: String,
        /// Error message (e.g., "${`DEPOT_ROOT`} not set").
        message: String,
    },
    /// Store construction failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DepotConfig {
    /// Load configuration from file.
    ///
    /// If `config_path` is provided, loads from that file. Otherwise,
    /// searches for `depot.toml` in the current directory and parents,
    /// falling back to defaults when none is found.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit `config_path` doesn't exist or parsing
    /// fails.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)
        } else {
            Ok(Self::default())
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;
        config.validate()?;
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref root) = self.store.root {
            self.store.root = Some(expand::expand_env(root, "store.root")?);
        }
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(root) = &self.store.root
            && root.is_empty()
        {
            return Err(ConfigError::Validation(
                "store.root cannot be empty".to_owned(),
            ));
        }
        if self.watch.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "watch.poll_interval_secs must be greater than 0".to_owned(),
            ));
        }
        if self.lock.retry_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "lock.retry_delay_ms must be greater than 0".to_owned(),
            ));
        }
        if self.lock.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "lock.timeout_secs must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }

    /// Poll interval for the store watcher.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.watch.poll_interval_secs)
    }

    /// Lock provider matching the configured strategy, rooted at `root` for
    /// file locking.
    #[must_use]
    pub fn lock_provider(&self, root: &Path) -> Arc<dyn LockProvider> {
        match self.lock.strategy {
            LockStrategy::None => Arc::new(NullLockProvider),
            LockStrategy::Memory => Arc::new(MemoryLockProvider::new()),
            LockStrategy::File => Arc::new(FileLockProvider::with_budget(
                root,
                Duration::from_millis(self.lock.retry_delay_ms),
                Duration::from_secs(self.lock.timeout_secs),
            )),
        }
    }

    /// Assemble the filesystem store described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` when `store.root` is not set, and
    /// `ConfigError::Store` when the root directory is missing or not
    /// writable.
    pub fn build_store(&self) -> Result<FsResourceStore, ConfigError> {
        let root = self.store.root.as_deref().ok_or_else(|| {
            ConfigError::Validation("store.root required to build a store".to_owned())
        })?;
        let root = Path::new(root);
        let store =
            FsResourceStore::with_options(root, self.lock_provider(root), self.poll_interval())?;
        Ok(store)
    }
}
