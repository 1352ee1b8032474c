//! Configuration module for Cabinet.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{CabinetError, Result};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/cabinet.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local object store.
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Base URL that delegated-access URLs are issued against.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Secret used to sign delegated-access URLs (must be set).
    #[serde(default)]
    pub signing_secret: String,
}

fn default_storage_root() -> String {
    "data/objects".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_url: default_public_url(),
            signing_secret: String::new(),
        }
    }
}

/// Upload flow configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Lifetime of issued upload and download URLs in seconds.
    #[serde(default = "default_url_expiry")]
    pub url_expiry_secs: u64,
    /// Age after which an unreferenced object is considered orphaned.
    #[serde(default = "default_orphan_grace")]
    pub orphan_grace_hours: u64,
}

fn default_url_expiry() -> u64 {
    3600 // 1 hour
}

fn default_orphan_grace() -> u64 {
    24
}

impl UploadConfig {
    /// URL expiry as a Duration.
    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.url_expiry_secs)
    }

    /// Orphan grace period as a Duration.
    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_hours.saturating_mul(3600))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            url_expiry_secs: default_url_expiry(),
            orphan_grace_hours: default_orphan_grace(),
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
    "logs/cabinet.log".to_string()
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
    /// Object storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload flow configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CabinetError::Io)?;
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
        toml::from_str(s).map_err(|e| CabinetError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CABINET_SIGNING_SECRET`: Override the URL signing secret
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("CABINET_SIGNING_SECRET") {
            if !secret.is_empty() {
                self.storage.signing_secret = secret;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - the signing secret is not set
    /// - the URL expiry is zero or longer than seven days
    pub fn validate(&self) -> Result<()> {
        if self.storage.signing_secret.is_empty() {
            return Err(CabinetError::Config(
                "signing_secret is not set. \
                 Set it in config.toml or via CABINET_SIGNING_SECRET environment variable."
                    .to_string(),
            ));
        }
        if self.upload.url_expiry_secs == 0
            || self.upload.url_expiry() > crate::storage::MAX_PRESIGN_EXPIRY
        {
            return Err(CabinetError::Config(format!(
                "url_expiry_secs must be between 1 and {}",
                crate::storage::MAX_PRESIGN_EXPIRY.as_secs()
            )));
        }
        Ok(())
    }
}
