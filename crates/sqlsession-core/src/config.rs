//! Store configuration and config file loading

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::session::DEFAULT_TTL_MS;
use crate::{Error, RecordSchema, Result, RetryPolicy};

/// Configuration shared by the session store and its backends
///
/// # Example
/// ```
/// use sqlsession_core::{RecordSchema, RetryPolicy, StoreConfig};
///
/// let config = StoreConfig::default()
///     .with_schema(RecordSchema::default().with_table("web_sessions"))
///     .with_retry(RetryPolicy::default().with_max_retries(5))
///     .with_create_table(false);
/// assert_eq!(config.schema.table, "web_sessions");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Table and column names
    #[serde(default)]
    pub schema: RecordSchema,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Record lifetime when a session has no `cookie.maxAge`
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: i64,

    /// Create the table and expiry index when the connection is established
    #[serde(default = "default_true")]
    pub create_table: bool,
}

fn default_ttl_ms() -> i64 {
    DEFAULT_TTL_MS
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            schema: RecordSchema::default(),
            retry: RetryPolicy::default(),
            default_ttl_ms: default_ttl_ms(),
            create_table: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = ttl.num_milliseconds();
        self
    }

    pub fn with_create_table(mut self, create_table: bool) -> Self {
        self.create_table = create_table;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::milliseconds(self.default_ttl_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        if self.default_ttl_ms <= 0 {
            return Err(Error::Config(format!(
                "default_ttl_ms must be positive (got {})",
                self.default_ttl_ms
            )));
        }
        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(format!(
                "retry.min_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.min_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: impl Into<PathBuf>) -> Result<PathBuf> {
    let path = path.into();
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path),
    }
}

/// Read a YAML or TOML config file (format chosen by extension, YAML default)
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = expand_tilde(path.as_ref())?;
    if !path.exists() {
        return Err(Error::ConfigNotFound(path.display().to_string()));
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        error!("Failed to read config file {:?}: {}", path, e);
        Error::Io(e)
    })?;

    let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
        toml::from_str(&contents).map_err(|e| {
            error!("Failed to parse TOML config: {}", e);
            Error::Config(format!("Invalid TOML: {}", e))
        })?
    } else {
        serde_yaml::from_str(&contents).map_err(|e| {
            error!("Failed to parse YAML config: {}", e);
            Error::Config(format!("Invalid YAML: {}", e))
        })?
    };

    debug!("Loaded config from {:?}", path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.schema, RecordSchema::default());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.default_ttl(), Duration::days(1));
        assert!(config.create_table);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let file = write_temp(
            ".yaml",
            "schema:\n  table: web_sessions\nretry:\n  max_retries: 5\ncreate_table: false\n",
        );
        let config: StoreConfig = load_config(file.path()).unwrap();

        assert_eq!(config.schema.table, "web_sessions");
        assert_eq!(config.schema.key_column, "sid");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.min_delay_ms, 50);
        assert_eq!(config.default_ttl_ms, DEFAULT_TTL_MS);
        assert!(!config.create_table);
    }

    #[test]
    fn test_load_toml() {
        let file = write_temp(
            ".toml",
            "default_ttl_ms = 3600000\n\n[schema]\nexpires_column = \"expires_at\"\n",
        );
        let config: StoreConfig = load_config(file.path()).unwrap();

        assert_eq!(config.default_ttl(), Duration::hours(1));
        assert_eq!(config.schema.expires_column, "expires_at");
        assert!(config.create_table);
    }

    #[test]
    fn test_missing_file() {
        let result: Result<StoreConfig> = load_config("/nonexistent/sqlsession.yaml");
        assert!(matches!(result, Err(Error::ConfigNotFound(_))));
    }

    #[test]
    fn test_invalid_yaml() {
        let file = write_temp(".yaml", "schema: [unclosed");
        let result: Result<StoreConfig> = load_config(file.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validation() {
        let config = StoreConfig::default().with_default_ttl(Duration::zero());
        assert!(config.validate().is_err());

        let config = StoreConfig::default().with_retry(
            RetryPolicy::default().with_min_delay(std::time::Duration::from_secs(5)),
        );
        assert!(config.validate().is_err());

        let config =
            StoreConfig::default().with_schema(RecordSchema::default().with_table("bad name"));
        assert!(matches!(config.validate(), Err(Error::InvalidSchema(_))));
    }
}
