//! Configuration for the certpilot certificate engine.
//!
//! Configuration is a TOML document with four sections. Every value has a
//! default, so an empty file (or no file at all) yields a working setup:
//!
//! ```toml
//! [dispatcher]
//! issue-queue-capacity = 10
//! renew-queue-capacity = 10
//! workers = 10
//!
//! [scanner]
//! period-secs = 3600
//! default-renew-at-days = 30
//! scan-on-startup = false
//!
//! [exchange]
//! timeout-secs = 600
//!
//! [storage]
//! path = "/var/lib/certpilot"
//! ```
//!
//! Queue capacities and the worker count are fixed for the lifetime of the
//! process and must each fall within 1-100.

pub mod lint;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;

pub use lint::{lint_config, LintWarning};

/// Smallest accepted value for queue capacities and the worker count
pub const MIN_POOL_SIZE: usize = 1;

/// Largest accepted value for queue capacities and the worker count
pub const MAX_POOL_SIZE: usize = 100;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML or has unknown fields
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its accepted range
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Admission queues and worker pool
    #[validate(nested)]
    pub dispatcher: DispatcherConfig,

    /// Periodic renewal sweep
    #[validate(nested)]
    pub scanner: ScannerConfig,

    /// CA exchange limits
    #[validate(nested)]
    pub exchange: ExchangeConfig,

    /// Certificate storage
    pub storage: StorageConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;

        debug!(
            issue_queue_capacity = config.dispatcher.issue_queue_capacity,
            renew_queue_capacity = config.dispatcher.renew_queue_capacity,
            workers = config.dispatcher.workers,
            scan_period_secs = config.scanner.period_secs,
            "Parsed configuration"
        );

        Ok(config)
    }

    /// Load from an optional path, falling back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                info!("No configuration file given, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Admission queue and worker pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Capacity of the first-issuance queue
    #[validate(range(min = 1, max = 100))]
    pub issue_queue_capacity: usize,

    /// Capacity of the auto-renew queue
    #[validate(range(min = 1, max = 100))]
    pub renew_queue_capacity: usize,

    /// Number of workers draining both queues
    #[validate(range(min = 1, max = 100))]
    pub workers: usize,
}

fn default_queue_capacity() -> usize { 10 }
fn default_workers() -> usize { 10 }

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            issue_queue_capacity: default_queue_capacity(),
            renew_queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

/// Renewal sweep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScannerConfig {
    /// Seconds between sweeps
    #[validate(range(min = 1))]
    pub period_secs: u64,

    /// Renewal threshold applied to new certificates that don't set one
    pub default_renew_at_days: u32,

    /// Run one sweep immediately at startup instead of waiting a full period
    pub scan_on_startup: bool,
}

fn default_scan_period_secs() -> u64 { 3600 }
fn default_renew_at_days() -> u32 { 30 }

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            period_secs: default_scan_period_secs(),
            default_renew_at_days: default_renew_at_days(),
            scan_on_startup: false,
        }
    }
}

impl ScannerConfig {
    /// Sweep period as a [`Duration`]
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// CA exchange settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExchangeConfig {
    /// Upper bound on a single issuance or renewal exchange
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

fn default_exchange_timeout_secs() -> u64 { 600 }

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exchange_timeout_secs(),
        }
    }
}

impl ExchangeConfig {
    /// Exchange timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// On-disk certificate storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding one JSON document per certificate
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/certpilot"),
        }
    }
}
