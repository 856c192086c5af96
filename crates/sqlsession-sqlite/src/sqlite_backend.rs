//! SqliteBackend - Connection implementation over a single SQLite connection

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection as _, Row};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};

use sqlsession_core::{
    Connection, ConnectionState, ConnectionStateCell, Error, QueryOutcome, RecordSchema, Result,
    SqlValue, Statement, StatementKind, StoreConfig, schema::quote,
};

/// SQLite-backed session connection
///
/// Expiry is stored as INTEGER milliseconds since the Unix epoch. Statements
/// are serialized over one connection, which also makes `sqlite::memory:`
/// databases usable.
#[derive(Debug)]
pub struct SqliteBackend {
    state: ConnectionStateCell,
    connection: Mutex<Option<SqliteConnection>>,
}

impl SqliteBackend {
    fn pending() -> Self {
        Self {
            state: ConnectionStateCell::new(ConnectionState::Connecting),
            connection: Mutex::new(None),
        }
    }

    /// Start connecting in the background
    ///
    /// Returns at once in [`ConnectionState::Connecting`]; the state moves to
    /// `Ready` or `Failed` when establishment finishes. Must be called from
    /// within a Tokio runtime.
    ///
    /// # Errors
    /// - `Error::Config` if `database_url` is not a valid SQLite URL
    pub fn connect(database_url: &str, config: &StoreConfig) -> Result<Arc<Self>> {
        let options = connect_options(database_url)?;
        let backend = Arc::new(Self::pending());

        let task_backend = Arc::clone(&backend);
        let schema = config.schema.clone();
        let create_table = config.create_table;
        tokio::spawn(async move {
            // Failures are published as `Failed` and logged by `establish`
            let _ = task_backend.establish(options, &schema, create_table).await;
        });

        Ok(backend)
    }

    /// Connect and wait for the outcome
    ///
    /// # Example
    /// ```no_run
    /// # use sqlsession_sqlite::SqliteBackend;
    /// # use sqlsession_core::{SqlSessionStore, StoreConfig};
    /// # async fn example() -> sqlsession_core::Result<()> {
    /// let config = StoreConfig::default();
    /// let backend = SqliteBackend::connect_ready("sqlite://sessions.db", &config).await?;
    /// let store = SqlSessionStore::with_config(backend, &config)?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// - `Error::Config` if `database_url` is not a valid SQLite URL
    /// - `Error::ConnectionUnavailable` if the database cannot be opened
    /// - `Error::Database` if the table cannot be created
    pub async fn connect_ready(database_url: &str, config: &StoreConfig) -> Result<Arc<Self>> {
        let options = connect_options(database_url)?;
        let backend = Arc::new(Self::pending());
        backend
            .establish(options, &config.schema, config.create_table)
            .await?;
        Ok(backend)
    }

    async fn establish(
        &self,
        options: SqliteConnectOptions,
        schema: &RecordSchema,
        create_table: bool,
    ) -> Result<()> {
        let result = async {
            let mut conn = options.connect().await.map_err(|e| {
                Error::ConnectionUnavailable(format!("Failed to open SQLite database: {}", e))
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
                info!(table = %schema.table, "SQLite session connection ready");
                Ok(())
            }
            Err(e) => {
                error!("SQLite session connection failed: {}", e);
                self.state.set(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Close the underlying connection
    ///
    /// Operations issued afterwards wait for a readiness that never comes.
    pub async fn close(&self) -> Result<()> {
        self.state.set(ConnectionState::Closed);
        if let Some(conn) = self.connection.lock().await.take() {
            conn.close()
                .await
                .map_err(|e| Error::Database(format!("Failed to close SQLite connection: {}", e)))?;
        }
        debug!("SQLite session connection closed");
        Ok(())
    }
}

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions> {
    if !database_url.starts_with("sqlite:") {
        return Err(Error::Config(format!(
            "Not a SQLite URL: '{}' (expected sqlite:...)",
            database_url
        )));
    }
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| Error::Config(format!("Invalid SQLite URL '{}': {}", database_url, e)))?;
    Ok(options.create_if_missing(true))
}

async fn create_schema(conn: &mut SqliteConnection, schema: &RecordSchema) -> Result<()> {
    let table = schema.quoted_table();
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         {key} TEXT NOT NULL PRIMARY KEY, \
         {payload} TEXT NOT NULL, \
         {expires} INTEGER NOT NULL)",
        key = schema.quoted_key(),
        payload = schema.quoted_payload(),
        expires = schema.quoted_expires(),
    ))
    .execute(&mut *conn)
    .await
    .map_err(|e| classify("create table", e))?;

    // SQLite qualifies the index name, not the indexed table
    let index = match schema.table_namespace() {
        Some(namespace) => format!("{}.{}", quote(namespace), quote(&schema.expires_index_name())),
        None => quote(&schema.expires_index_name()),
    };
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {table} ({expires})",
        table = quote(schema.table_name()),
        expires = schema.quoted_expires(),
    ))
    .execute(&mut *conn)
    .await
    .map_err(|e| classify("create index", e))?;

    debug!(table = %schema.table, "Ensured SQLite session table");
    Ok(())
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    statement: &'q Statement,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in &statement.params {
        query = match &param.value {
            SqlValue::Text(text) => query.bind(text.as_str()),
            SqlValue::Integer(n) => query.bind(*n),
            SqlValue::Timestamp(ts) => query.bind(ts.timestamp_millis()),
            SqlValue::Null => query.bind(None::<String>),
        };
    }
    query
}

fn decode_rows(kind: StatementKind, rows: &[SqliteRow]) -> Result<Vec<Vec<SqlValue>>> {
    let decode = |e: sqlx::Error| Error::Database(format!("Failed to decode {} row: {}", kind, e));

    rows.iter()
        .map(|row| match kind {
            StatementKind::Count => {
                let count: i64 = row.try_get(0).map_err(decode)?;
                Ok(vec![SqlValue::Integer(count)])
            }
            _ => {
                let payload: Option<String> = row.try_get(0).map_err(decode)?;
                let expires: Option<i64> = row.try_get(1).map_err(decode)?;
                Ok(vec![
                    SqlValue::from(payload),
                    SqlValue::from(expires.and_then(DateTime::from_timestamp_millis)),
                ])
            }
        })
        .collect()
}

/// Map a sqlx error onto the store's transient/terminal split
///
/// Busy and locked result codes (including their extended forms) are
/// transient, as are I/O failures.
pub fn classify(operation: &str, err: sqlx::Error) -> Error {
    let transient = match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    };

    let message = format!("SQLite {} failed: {}", operation, err);
    if transient {
        Error::Transient(message)
    } else {
        Error::Database(message)
    }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[async_trait]
impl Connection for SqliteBackend {
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
                "SELECT {payload}, {expires} FROM {table} WHERE {key} = ?1 AND {expires} >= ?2"
            ),
            StatementKind::Upsert => format!(
                "INSERT INTO {table} ({key}, {payload}, {expires}) VALUES (?1, ?2, ?3) \
                 ON CONFLICT ({key}) DO UPDATE SET \
                 {payload} = excluded.{payload}, {expires} = excluded.{expires}"
            ),
            StatementKind::Touch => {
                format!("UPDATE {table} SET {expires} = ?2 WHERE {key} = ?1")
            }
            StatementKind::Destroy => format!("DELETE FROM {table} WHERE {key} = ?1"),
            StatementKind::Count => format!("SELECT COUNT(*) FROM {table}"),
            StatementKind::Clear => format!("DELETE FROM {table}"),
            StatementKind::Sweep => format!("DELETE FROM {table} WHERE {expires} < ?1"),
        }
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryOutcome> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or_else(|| {
            Error::ConnectionUnavailable(format!("SQLite connection is {}", self.state.get()))
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
