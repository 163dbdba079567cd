//! Configuration types and parsing for tidemark.yml

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file names searched by [`Config::load_from_dir`], in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["tidemark.yml", "tidemark.yaml"];

/// Main configuration from tidemark.yml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Store connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Where the execution history lives inside the store
    #[serde(default)]
    pub history: HistoryConfig,

    /// Advisory lock behaviour for overlapping runs
    #[serde(default)]
    pub lock: LockConfig,

    /// Administrative HTTP trigger settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Store backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// DuckDB file or in-memory database
    #[default]
    DuckDb,
    /// Process-local store without persistence
    Memory,
}

/// Store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Backend type (duckdb or memory)
    #[serde(rename = "type", default)]
    pub db_type: DbType,

    /// Database path (for DuckDB file-based or :memory:)
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::default(),
            path: default_db_path(),
        }
    }
}

/// Location of the history and lock tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Schema holding `schema_migrations` and `migration_lock`
    #[serde(default = "default_history_schema")]
    pub schema: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            schema: default_history_schema(),
        }
    }
}

/// Advisory lock wait settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// How long a run waits for another run's lock before giving up
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between lock acquisition attempts
    #[serde(default = "default_lock_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Break a lock held longer than this, assuming its holder died.
    ///
    /// Unset means a lock is never broken automatically; `tm unlock` clears
    /// it by hand. Must exceed the longest expected migration.
    #[serde(default)]
    pub stale_after_ms: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            poll_interval_ms: default_lock_poll_interval_ms(),
            stale_after_ms: None,
        }
    }
}

/// Administrative trigger server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token required on admin routes; unauthenticated when unset
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_token: None,
        }
    }
}

const DEFAULT_DB_PATH: &str = ":memory:";

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_history_schema() -> String {
    "tidemark".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_lock_poll_interval_ms() -> u64 {
    250
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Config {
    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory.
    ///
    /// Looks for tidemark.yml or tidemark.yaml and falls back to defaults
    /// when neither exists.
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        for name in CONFIG_FILE_NAMES {
            let path = dir.join(name);
            if path.exists() {
                return Self::load(&path);
            }
        }
        log::debug!(
            "No config file in {}, using defaults",
            dir.display()
        );
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoreResult<()> {
        let schema = &self.history.schema;
        if schema.is_empty()
            || !schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            || schema.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "history.schema '{schema}' must be a plain identifier (letters, digits, underscores)"
                ),
            });
        }

        if self.lock.poll_interval_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "lock.poll_interval_ms must be greater than zero".to_string(),
            });
        }

        if self.lock.poll_interval_ms > self.lock.timeout_ms {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "lock.poll_interval_ms ({}) must not exceed lock.timeout_ms ({})",
                    self.lock.poll_interval_ms, self.lock.timeout_ms
                ),
            });
        }

        if self.lock.stale_after_ms == Some(0) {
            return Err(CoreError::ConfigInvalid {
                message: "lock.stale_after_ms must be greater than zero when set".to_string(),
            });
        }

        if self.database.path.is_empty() {
            return Err(CoreError::ConfigInvalid {
                message: "database.path cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
