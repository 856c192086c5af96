//! Contract between the session store and the backing connection
//!
//! The store never talks to a database directly. It hands a [`Statement`] to
//! a [`Connection`], which owns the dialect, the transport and the
//! classification of its own failures into transient and terminal errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::watch;

use crate::{RecordSchema, Result};

/// Lifecycle state of a backing connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Establishment in progress
    Connecting,
    /// Statements can be executed
    Ready,
    /// Closed by its owner
    Closed,
    /// Establishment or the transport failed
    Failed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishing side of a connection's lifecycle state
///
/// Backends own one cell and move it through its states; any number of
/// readiness gates observe it through [`ConnectionStateCell::subscribe`].
#[derive(Debug)]
pub struct ConnectionStateCell {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionStateCell {
    pub fn new(initial: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Publish a new state; observers are only woken on an actual change
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Connecting)
    }
}

/// The persistence calls a session store issues
///
/// Each kind has a fixed positional parameter order that renderers must
/// respect:
///
/// | kind | parameters | rows |
/// |---|---|---|
/// | `Get` | key, now | payload, expires |
/// | `Upsert` | key, payload, expires | |
/// | `Touch` | key, expires | |
/// | `Destroy` | key | |
/// | `Count` | | count |
/// | `Clear` | | |
/// | `Sweep` | now | |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Get,
    Upsert,
    Touch,
    Destroy,
    Count,
    Clear,
    Sweep,
}

impl StatementKind {
    pub const ALL: [StatementKind; 7] = [
        StatementKind::Get,
        StatementKind::Upsert,
        StatementKind::Touch,
        StatementKind::Destroy,
        StatementKind::Count,
        StatementKind::Clear,
        StatementKind::Sweep,
    ];

    /// Whether the statement emits rows (as opposed to only a row count)
    pub fn returns_rows(&self) -> bool {
        matches!(self, StatementKind::Get | StatementKind::Count)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Get => "get",
            StatementKind::Upsert => "upsert",
            StatementKind::Touch => "touch",
            StatementKind::Destroy => "destroy",
            StatementKind::Count => "count",
            StatementKind::Clear => "clear",
            StatementKind::Sweep => "sweep",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed statement parameter or column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
    Null,
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map(SqlValue::Timestamp).unwrap_or(SqlValue::Null)
    }
}

/// A named positional parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub value: SqlValue,
}

impl Param {
    pub fn new(name: &'static str, value: SqlValue) -> Self {
        Self { name, value }
    }
}

/// A rendered statement plus its parameters, in positional order
#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(kind: StatementKind, sql: impl Into<String>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, name: &'static str, value: SqlValue) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    /// Look a parameter up by name
    pub fn param(&self, name: &str) -> Option<&SqlValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }
}

/// What a statement produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub rows_affected: u64,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryOutcome {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            rows_affected: 0,
            rows,
        }
    }

    /// First column of the first row
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// A single long-lived connection to the backing store
///
/// Implementations:
/// - `SqliteBackend` (sqlsession-sqlite)
/// - `PostgresBackend` (sqlsession-postgres)
/// - `MemoryConnection` (`test-util` feature) for tests
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Current lifecycle state
    fn state(&self) -> ConnectionState;

    /// Receiver that observes every lifecycle transition
    fn subscribe(&self) -> watch::Receiver<ConnectionState>;

    /// Render the SQL text for `kind` in this connection's dialect
    fn render(&self, kind: StatementKind, schema: &RecordSchema) -> String;

    /// Execute one statement
    ///
    /// # Errors
    /// - `Error::Transient` for failures worth retrying
    /// - `Error::Database` / `Error::ConnectionUnavailable` otherwise
    async fn execute(&self, statement: &Statement) -> Result<QueryOutcome>;
}
