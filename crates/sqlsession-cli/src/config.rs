//! Configuration file for the sqlsession binary

use serde::{Deserialize, Serialize};
use sqlsession_core::{StoreConfig, load_config};
use sqlsession_postgres::PostgresBackendConfig;
use std::path::Path;

/// Top-level config file
///
/// ```yaml
/// database_url: sqlite://~/.sqlsession/sessions.db
/// schema:
///   table: web_sessions
/// retry:
///   max_retries: 5
/// logging:
///   level: debug
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// `sqlite:...`, `postgres://...` or `postgresql://...`
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub postgres: PostgresBackendConfig,

    #[serde(flatten)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Let sqlx log every query it runs
    #[serde(default)]
    pub log_sql_queries: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql_queries: false,
        }
    }
}

impl CliConfig {
    pub fn from_file(path: impl AsRef<Path>) -> sqlsession_core::Result<Self> {
        load_config(path)
    }
}
