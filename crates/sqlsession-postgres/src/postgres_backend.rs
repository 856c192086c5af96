//! PostgresBackend - Connection implementation over a single PostgreSQL connection

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Connection as _, Row};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};

use crate::config::PostgresBackendConfig;
use sqlsession_core::{
    Connection, ConnectionState, ConnectionStateCell, Error, QueryOutcome, RecordSchema, Result,
    SqlValue, Statement, StatementKind, StoreConfig, schema::quote,
};

/// PostgreSQL-backed session connection
///
/// Expiry is stored as `TIMESTAMPTZ`. All statements share one connection
/// and run one at a time.
#[derive(Debug)]
pub struct PostgresBackend {
    state: ConnectionStateCell,
    connection: Mutex<Option<PgConnection>>,
}

impl PostgresBackend {
    fn pending() -> Self {
        Self {
            state: ConnectionStateCell::new(ConnectionState::Connecting),
            connection: Mutex::new(None),
        }
    }

    /// Start connecting in the background with default connection settings
    ///
    /// # Errors
    /// - `Error::Config` if `database_url` is not a PostgreSQL URL
    pub fn connect(database_url: &str, config: &StoreConfig) -> Result<Arc<Self>> {
        Self::connect_with(database_url, config, &PostgresBackendConfig::default())
    }

    /// Start connecting in the background
    ///
    /// Returns at once in [`ConnectionState::Connecting`]. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    /// - `Error::Config` if `database_url` is not a PostgreSQL URL
    pub fn connect_with(
        database_url: &str,
        config: &StoreConfig,
        backend_config: &PostgresBackendConfig,
    ) -> Result<Arc<Self>> {
        let options = connect_options(database_url, backend_config)?;
        let backend = Arc::new(Self::pending());

        let task_backend = Arc::clone(&backend);
        let schema = config.schema.clone();
        let create_table = config.create_table;
        let timeout = backend_config.connect_timeout;
        tokio::spawn(async move {
            // Failures are published as `Failed` and logged by `establish`
            let _ = task_backend
                .establish(options, timeout, &schema, create_table)
                .await;
        });

        Ok(backend)
    }

    /// Connect with default connection settings and wait for the outcome
    pub async fn connect_ready(database_url: &str, config: &StoreConfig) -> Result<Arc<Self>> {
        Self::connect_ready_with(database_url, config, &PostgresBackendConfig::default()).await
    }

    /// Connect and wait for the outcome
    ///
    /// # Example
    /// ```no_run
    /// # use sqlsession_postgres::{PostgresBackend, PostgresBackendConfig};
    /// # use sqlsession_core::{SqlSessionStore, StoreConfig};
    /// # async fn example() -> sqlsession_core::Result<()> {
    /// let config = StoreConfig::default();
    /// let backend = PostgresBackend::connect_ready_with(
    ///     "postgres://localhost/app",
    ///     &config,
    ///     &PostgresBackendConfig::default().with_application_name("web"),
    /// )
    /// .await?;
    /// let store = SqlSessionStore::with_config(backend, &config)?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// - `Error::Config` if `database_url` is not a PostgreSQL URL
    /// - `Error::ConnectionUnavailable` if connecting fails or times out
    /// - `Error::Database` if the table cannot be created
    pub async fn connect_ready_with(
        database_url: &str,
        config: &StoreConfig,
        backend_config: &PostgresBackendConfig,
    ) -> Result<Arc<Self>> {
        let options = connect_options(database_url, backend_config)?;
        let backend = Arc::new(Self::pending());
        backend
            .establish(
                options,
                backend_config.connect_timeout,
                &config.schema,
                config.create_table,
            )
            .await?;
        Ok(backend)
    }

    async fn establish(
        &self,
        options: PgConnectOptions,
        timeout: std::time::Duration,
        schema: &RecordSchema,
        create_table: bool,
    ) -> Result<()> {
        let result = async {
            let mut conn = tokio::time::timeout(timeout, options.connect())
                .await
                .map_err(|_| {
                    Error::ConnectionUnavailable(format!(
                        "Timed out connecting to PostgreSQL after {:?}",
                        timeout
                    ))
                })?
                .map_err(|e| {
                    Error::ConnectionUnavailable(format!("Failed to connect to PostgreSQL: {}", e))
                })?;
            if create_table {
                create_schema(&mut conn, schema).await?;
            }
            Ok::<_, Error>(conn)
        }
        .await;

        match result {
            Ok(conn) => {
                *self.connection.lock().await = Some(conn);
                self.state.set(ConnectionState::Ready);
                info!(table = %schema.table, "PostgreSQL session connection ready");
                Ok(())
            }
            Err(e) => {
                error!("PostgreSQL session connection failed: {}", e);
                self.state.set(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Close the underlying connection
    pub async fn close(&self) -> Result<()> {
        self.state.set(ConnectionState::Closed);
        if let Some(conn) = self.connection.lock().await.take() {
            conn.close().await.map_err(|e| {
                Error::Database(format!("Failed to close PostgreSQL connection: {}", e))
            })?;
        }
        debug!("PostgreSQL session connection closed");
        Ok(())
    }
}

fn connect_options(
    database_url: &str,
    backend_config: &PostgresBackendConfig,
) -> Result<PgConnectOptions> {
    if !(database_url.starts_with("postgres:") || database_url.starts_with("postgresql:")) {
        return Err(Error::Config(format!(
            "Not a PostgreSQL URL: '{}' (expected postgres://...)",
            database_url
        )));
    }
    let options = PgConnectOptions::from_str(database_url)
        .map_err(|e| Error::Config(format!("Invalid PostgreSQL URL: {}", e)))?;
    Ok(options.application_name(&backend_config.application_name))
}

async fn create_schema(conn: &mut PgConnection, schema: &RecordSchema) -> Result<()> {
    let table = schema.quoted_table();
    let expires = schema.quoted_expires();

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         {key} TEXT NOT NULL PRIMARY KEY, \
         {payload} TEXT NOT NULL, \
         {expires} TIMESTAMPTZ NOT NULL)",
        key = schema.quoted_key(),
        payload = schema.quoted_payload(),
    ))
    .execute(&mut *conn)
    .await
    .map_err(|e| classify("create table", e))?;

    // The index lands in the table's schema
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {table} ({expires})",
        index = quote(&schema.expires_index_name()),
    ))
    .execute(&mut *conn)
    .await
    .map_err(|e| classify("create index", e))?;

    debug!(table = %schema.table, "Ensured PostgreSQL session table");
    Ok(())
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    statement: &'q Statement,
) -> Query<'q, Postgres, PgArguments> {
    for param in &statement.params {
        query = match &param.value {
            SqlValue::Text(text) => query.bind(text.as_str()),
            SqlValue::Integer(n) => query.bind(*n),
            SqlValue::Timestamp(ts) => query.bind(*ts),
            SqlValue::Null => query.bind(None::<String>),
        };
    }
    query
}

fn decode_rows(kind: StatementKind, rows: &[PgRow]) -> Result<Vec<Vec<SqlValue>>> {
    let decode = |e: sqlx::Error| Error::Database(format!("Failed to decode {} row: {}", kind, e));

    rows.iter()
        .map(|row| match kind {
            StatementKind::Count => {
                let count: i64 = row.try_get(0).map_err(decode)?;
                Ok(vec![SqlValue::Integer(count)])
            }
            _ => {
                let payload: Option<String> = row.try_get(0).map_err(decode)?;
                let expires: Option<DateTime<Utc>> = row.try_get(1).map_err(decode)?;
                Ok(vec![SqlValue::from(payload), SqlValue::from(expires)])
            }
        })
        .collect()
}

/// SQLSTATEs worth retrying: serialization failure, deadlock, lock not
/// available, server shutdown or startup, too many connections
const TRANSIENT_SQLSTATES: [&str; 7] = ["40001", "40P01", "55P03", "57P01", "57P02", "57P03", "53300"];

fn is_transient_sqlstate(code: &str) -> bool {
    // Class 08: connection exception
    code.starts_with("08") || TRANSIENT_SQLSTATES.contains(&code)
}

/// Map a sqlx error onto the store's transient/terminal split
pub fn classify(operation: &str, err: sqlx::Error) -> Error {
    let transient = match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    };

    let message = format!("PostgreSQL {} failed: {}", operation, err);
    if transient {
        Error::Transient(message)
    } else {
        Error::Database(message)
    }
}

#[async_trait]
impl Connection for PostgresBackend {
    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn render(&self, kind: StatementKind, schema: &RecordSchema) -> String {
        let table = schema.quoted_table();
        let key = schema.quoted_key();
        let payload = schema.quoted_payload();
        let expires = schema.quoted_expires();

        match kind {
            StatementKind::Get => format!(
                "SELECT {payload}, {expires} FROM {table} WHERE {key} = $1 AND {expires} >= $2"
            ),
            StatementKind::Upsert => format!(
                "INSERT INTO {table} ({key}, {payload}, {expires}) VALUES ($1, $2, $3) \
                 ON CONFLICT ({key}) DO UPDATE SET \
                 {payload} = EXCLUDED.{payload}, {expires} = EXCLUDED.{expires}"
            ),
            StatementKind::Touch => {
                format!("UPDATE {table} SET {expires} = $2 WHERE {key} = $1")
            }
            StatementKind::Destroy => format!("DELETE FROM {table} WHERE {key} = $1"),
            StatementKind::Count => format!("SELECT COUNT(*) FROM {table}"),
            StatementKind::Clear => format!("TRUNCATE {table}"),
            StatementKind::Sweep => format!("DELETE FROM {table} WHERE {expires} < $1"),
        }
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryOutcome> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            Error::ConnectionUnavailable(format!("PostgreSQL connection is {}", self.state.get()))
        })?;

        let query = bind_params(sqlx::query(&statement.sql), statement);
        let operation = statement.kind.as_str();

        if statement.kind.returns_rows() {
            let rows = query
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| classify(operation, e))?;
            Ok(QueryOutcome::with_rows(decode_rows(statement.kind, &rows)?))
        } else {
            let result = query
                .execute(&mut *conn)
                .await
                .map_err(|e| classify(operation, e))?;
            Ok(QueryOutcome::affected(result.rows_affected()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_uses_numbered_placeholders() {
        let backend = PostgresBackend::pending();
        let schema = RecordSchema::default().with_table("auth.sessions");

        assert_eq!(
            backend.render(StatementKind::Get, &schema),
            r#"SELECT "session", "expires" FROM "auth"."sessions" WHERE "sid" = $1 AND "expires" >= $2"#
        );
        assert_eq!(
            backend.render(StatementKind::Sweep, &schema),
            r#"DELETE FROM "auth"."sessions" WHERE "expires" < $1"#
        );
        assert_eq!(
            backend.render(StatementKind::Clear, &schema),
            r#"TRUNCATE "auth"."sessions""#
        );
    }

    #[test]
    fn test_transient_sqlstates() {
        for code in ["40001", "40P01", "55P03", "57P01", "57P03", "53300", "08006", "08001"] {
            assert!(is_transient_sqlstate(code), "{} should be transient", code);
        }
        for code in ["23505", "42P01", "42601", "22P02"] {
            assert!(!is_transient_sqlstate(code), "{} should be terminal", code);
        }
    }

    #[test]
    fn test_classify_non_database_errors() {
        let io = sqlx::Error::Io(std::io::Error::other("connection reset"));
        assert!(classify("set", io).is_transient());
        assert!(!classify("set", sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_rejects_non_postgres_url() {
        let result = connect_options("sqlite::memory:", &PostgresBackendConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(connect_options("postgresql://localhost/app", &PostgresBackendConfig::default()).is_ok());
    }
}
