//! Connection settings for the PostgreSQL backend

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the single PostgreSQL connection
///
/// # Example
/// ```
/// use sqlsession_postgres::PostgresBackendConfig;
/// use std::time::Duration;
///
/// let config = PostgresBackendConfig::default()
///     .with_connect_timeout(Duration::from_secs(10))
///     .with_application_name("billing-sessions");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresBackendConfig {
    /// Give up establishing the connection after this long
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Reported in `pg_stat_activity`
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_application_name() -> String {
    "sqlsession".to_string()
}

impl Default for PostgresBackendConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            application_name: default_application_name(),
        }
    }
}

impl PostgresBackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
