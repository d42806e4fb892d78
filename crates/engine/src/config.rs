//! Runtime configuration via `inox.toml`
//!
//! The file controls how contexts created by the embedding program access
//! shared values and how local databases are located. A commented default
//! file is written on first use.

use crate::error::{DatabaseError, Result};
use inox_core::{ContextConfig, IsolationLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "inox.toml";

/// Storage section of the configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Snapshot file of the local database, in-memory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Configuration loaded from `inox.toml`.
///
/// # Example
///
/// ```toml
/// isolation = "serializable"
/// lock_poll_interval_ms = 10
///
/// [storage]
/// path = "data/main.json"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InoxConfig {
    /// Isolation level: `"serializable"` or `"read-uncommitted"`.
    #[serde(default = "default_isolation_str")]
    pub isolation: String,
    /// Maximum wait for another transaction, no limit when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_wait_timeout_ms: Option<u64>,
    /// Wake-up interval of blocking waits.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
    /// Whether databases are opened expecting a schema update.
    #[serde(default)]
    pub expected_schema_update: bool,
    /// Local database storage.
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_isolation_str() -> String {
    "serializable".to_string()
}

fn default_lock_poll_interval_ms() -> u64 {
    10
}

impl Default for InoxConfig {
    fn default() -> Self {
        Self {
            isolation: default_isolation_str(),
            transaction_wait_timeout_ms: None,
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            expected_schema_update: false,
            storage: StorageConfig::default(),
        }
    }
}

impl InoxConfig {
    /// Parse the isolation string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"serializable"` or
    /// `"read-uncommitted"`.
    pub fn isolation_level(&self) -> Result<IsolationLevel> {
        match self.isolation.as_str() {
            "serializable" => Ok(IsolationLevel::Serializable),
            "read-uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            other => Err(DatabaseError::Config(format!(
                "invalid isolation level '{other}' in {CONFIG_FILE_NAME}, expected \"serializable\" or \"read-uncommitted\""
            ))),
        }
    }

    /// Context configuration with the configured isolation and waits
    pub fn context_config(&self) -> Result<ContextConfig> {
        if self.lock_poll_interval_ms == 0 {
            return Err(DatabaseError::Config(
                "lock_poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(ContextConfig {
            isolation: self.isolation_level()?,
            transaction_wait_timeout: self.transaction_wait_timeout_ms.map(Duration::from_millis),
            lock_poll_interval: Duration::from_millis(self.lock_poll_interval_ms),
            ..ContextConfig::default()
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Inox runtime configuration
#
# Isolation level of value accesses: "serializable" (default) or "read-uncommitted"
#   "serializable"     = a transaction waits for the transaction holding a value
#   "read-uncommitted" = reads never wait
isolation = "serializable"

# Maximum wait for another transaction in milliseconds (default: no limit)
# transaction_wait_timeout_ms = 5000

# Wake-up interval of blocking waits in milliseconds (default: 10)
lock_poll_interval_ms = 10

# Whether databases are opened expecting a schema update (default: false)
expected_schema_update = false

# Snapshot file of the local database. In-memory when unset.
# [storage]
# path = "data/main.json"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DatabaseError::Io(format!("failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: InoxConfig = toml::from_str(&content).map_err(|e| {
            DatabaseError::Config(format!("failed to parse config file '{}': {}", path.display(), e))
        })?;
        config.context_config()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                DatabaseError::Io(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DatabaseError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            DatabaseError::Io(format!("failed to write config file '{}': {}", path.display(), e))
        })
    }
}
