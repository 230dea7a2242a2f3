//! Configuration module for drivetree.

use serde::Deserialize;
use std::path::Path;

use crate::{DriveError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/drivetree.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory used by the local blob store.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Timeout applied to every blob store call, in seconds.
    #[serde(default = "default_blob_timeout")]
    pub blob_timeout_secs: u64,
    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
    /// Storage limit assigned to new owners, in bytes.
    #[serde(default = "default_quota_bytes")]
    pub default_quota_bytes: i64,
}

fn default_storage_path() -> String {
    "data/blobs".to_string()
}

fn default_blob_timeout() -> u64 {
    30
}

fn default_max_upload_size() -> u64 {
    100
}

fn default_quota_bytes() -> i64 {
    5 * 1024 * 1024 * 1024 // 5GB
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            blob_timeout_secs: default_blob_timeout(),
            max_upload_size_mb: default_max_upload_size(),
            default_quota_bytes: default_quota_bytes(),
        }
    }
}

/// Share link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    /// Base URL that share tokens are appended to.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Number of characters in a generated share token.
    #[serde(default = "default_token_length")]
    pub token_length: usize,
}

fn default_public_base_url() -> String {
    "http://localhost:8080/s/".to_string()
}

fn default_token_length() -> usize {
    32
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
            token_length: default_token_length(),
        }
    }
}

/// Background maintenance configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Quota reconciliation interval in seconds.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Interval between retries of failed blob deletions, in seconds.
    #[serde(default = "default_blob_retry_interval")]
    pub blob_retry_interval_secs: u64,
    /// Attempts after which a failed blob deletion is abandoned.
    #[serde(default = "default_max_blob_retries")]
    pub max_blob_retries: i64,
}

fn default_reconcile_interval() -> u64 {
    3600 // 1 hour
}

fn default_blob_retry_interval() -> u64 {
    300 // 5 minutes
}

fn default_max_blob_retries() -> i64 {
    10
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            blob_retry_interval_secs: default_blob_retry_interval(),
            max_blob_retries: default_max_blob_retries(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/drivetree.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Share link configuration.
    #[serde(default)]
    pub share: ShareConfig,
    /// Maintenance configuration.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(DriveError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DriveError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `DRIVETREE_DATABASE_PATH`: Override the database path
    /// - `DRIVETREE_PUBLIC_BASE_URL`: Override the share link base URL
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("DRIVETREE_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
        if let Ok(base_url) = std::env::var("DRIVETREE_PUBLIC_BASE_URL") {
            if !base_url.is_empty() {
                self.share.public_base_url = base_url;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - the share base URL cannot be parsed
    /// - the blob timeout or a maintenance interval is zero
    /// - the share token length is too short to be unguessable
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.share.public_base_url).map_err(|e| {
            DriveError::Config(format!(
                "invalid share.public_base_url '{}': {e}",
                self.share.public_base_url
            ))
        })?;
        if self.storage.blob_timeout_secs == 0 {
            return Err(DriveError::Config(
                "storage.blob_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.maintenance.reconcile_interval_secs == 0
            || self.maintenance.blob_retry_interval_secs == 0
        {
            return Err(DriveError::Config(
                "maintenance intervals must be greater than zero".to_string(),
            ));
        }
        if self.share.token_length < 16 {
            return Err(DriveError::Config(
                "share.token_length must be at least 16".to_string(),
            ));
        }
        Ok(())
    }
}
