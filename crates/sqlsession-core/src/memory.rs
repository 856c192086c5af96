//! In-memory connection for tests
//!
//! Interprets statements by [`StatementKind`] and named parameters instead of
//! parsing SQL, mirroring SQL NULL semantics for the expiry comparisons. It
//! can be held in any lifecycle state and scripted to fail, which makes the
//! readiness and retry paths of a store observable.
//!
//! State sits behind `std::sync::Mutex`; no lock is held across an await.
//! Available under `cfg(test)` or the `test-util` feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::connection::{
    Connection, ConnectionState, ConnectionStateCell, QueryOutcome, SqlValue, Statement,
    StatementKind,
};
use crate::{Error, RecordSchema, Result};

/// A stored row; nullable columns model rows written by other clients
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub key: String,
    pub payload: Option<String>,
    pub expires: Option<DateTime<Utc>>,
}

/// Scripted failure for the next execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Transient,
    Terminal,
}

#[derive(Debug, Default)]
pub struct MemoryConnection {
    state: ConnectionStateCell,
    records: Mutex<Vec<MemoryRecord>>,
    failures: Mutex<VecDeque<InjectedFailure>>,
    executed: Mutex<Vec<StatementKind>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryConnection {
    /// A connection that is already ready
    pub fn new() -> Self {
        Self::with_state(ConnectionState::Ready)
    }

    /// A connection still being established
    pub fn connecting() -> Self {
        Self::with_state(ConnectionState::Connecting)
    }

    pub fn with_state(state: ConnectionState) -> Self {
        Self {
            state: ConnectionStateCell::new(state),
            ..Default::default()
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.set(state);
    }

    /// Fail the next `count` executions
    pub fn fail_next(&self, count: usize, failure: InjectedFailure) {
        lock(&self.failures).extend(std::iter::repeat_n(failure, count));
    }

    /// Insert a row verbatim, bypassing upsert semantics
    pub fn insert_raw(&self, record: MemoryRecord) {
        lock(&self.records).push(record);
    }

    pub fn records(&self) -> Vec<MemoryRecord> {
        lock(&self.records).clone()
    }

    pub fn record(&self, key: &str) -> Option<MemoryRecord> {
        lock(&self.records).iter().find(|r| r.key == key).cloned()
    }

    /// Kinds of every execution attempt so far, failed ones included
    pub fn executed(&self) -> Vec<StatementKind> {
        lock(&self.executed).clone()
    }

    fn apply(&self, statement: &Statement) -> Result<QueryOutcome> {
        let mut records = lock(&self.records);

        let outcome = match statement.kind {
            StatementKind::Get => {
                let key = text_param(statement, "key")?;
                let now = timestamp_param(statement, "now")?;
                let rows: Vec<Vec<SqlValue>> = records
                    .iter()
                    .filter(|r| r.key == key && r.expires.is_some_and(|e| e >= now))
                    .map(|r| vec![SqlValue::from(r.payload.clone()), SqlValue::from(r.expires)])
                    .collect();
                QueryOutcome::with_rows(rows)
            }
            StatementKind::Upsert => {
                let key = text_param(statement, "key")?;
                let payload = text_param(statement, "payload")?;
                let expires = timestamp_param(statement, "expires")?;
                match records.iter_mut().find(|r| r.key == key) {
                    Some(record) => {
                        record.payload = Some(payload.to_string());
                        record.expires = Some(expires);
                    }
                    None => records.push(MemoryRecord {
                        key: key.to_string(),
                        payload: Some(payload.to_string()),
                        expires: Some(expires),
                    }),
                }
                QueryOutcome::affected(1)
            }
            StatementKind::Touch => {
                let key = text_param(statement, "key")?;
                let expires = timestamp_param(statement, "expires")?;
                let mut affected = 0;
                for record in records.iter_mut().filter(|r| r.key == key) {
                    record.expires = Some(expires);
                    affected += 1;
                }
                QueryOutcome::affected(affected)
            }
            StatementKind::Destroy => {
                let key = text_param(statement, "key")?;
                let before = records.len();
                records.retain(|r| r.key != key);
                QueryOutcome::affected((before - records.len()) as u64)
            }
            StatementKind::Count => {
                QueryOutcome::with_rows(vec![vec![SqlValue::Integer(records.len() as i64)]])
            }
            StatementKind::Clear => {
                let removed = records.len() as u64;
                records.clear();
                QueryOutcome::affected(removed)
            }
            StatementKind::Sweep => {
                let now = timestamp_param(statement, "now")?;
                let before = records.len();
                // NULL < now is not true in SQL, so rows without expiry survive
                records.retain(|r| !r.expires.is_some_and(|e| e < now));
                QueryOutcome::affected((before - records.len()) as u64)
            }
        };

        Ok(outcome)
    }
}

fn text_param<'a>(statement: &'a Statement, name: &str) -> Result<&'a str> {
    statement
        .param(name)
        .and_then(SqlValue::as_text)
        .ok_or_else(|| Error::Database(format!("missing text parameter '{}'", name)))
}

fn timestamp_param(statement: &Statement, name: &str) -> Result<DateTime<Utc>> {
    statement
        .param(name)
        .and_then(SqlValue::as_timestamp)
        .ok_or_else(|| Error::Database(format!("missing timestamp parameter '{}'", name)))
}

#[async_trait]
impl Connection for MemoryConnection {
    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn render(&self, kind: StatementKind, schema: &RecordSchema) -> String {
        format!("{} {}", kind.as_str().to_uppercase(), schema.quoted_table())
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryOutcome> {
        lock(&self.executed).push(statement.kind);

        if !self.state.get().is_ready() {
            return Err(Error::ConnectionUnavailable(format!(
                "connection is {}",
                self.state.get()
            )));
        }

        let failure = lock(&self.failures).pop_front();
        match failure {
            Some(InjectedFailure::Transient) => {
                Err(Error::Transient("injected transient failure".to_string()))
            }
            Some(InjectedFailure::Terminal) => {
                Err(Error::Database("injected terminal failure".to_string()))
            }
            None => self.apply(statement),
        }
    }
}
