//! Session store contract and its SQL-backed implementation
//!
//! Every operation follows the same path: wait for the connection to be ready,
//! then run a single statement, retrying transient failures under the store's
//! [`RetryPolicy`]. The expiry sweep is the exception and runs exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::connection::{Connection, QueryOutcome, SqlValue, Statement, StatementKind};
use crate::diagnostics;
use crate::gate::ConnectionGate;
use crate::retry::with_retry;
use crate::session::SessionData;
use crate::{RecordSchema, Result, RetryPolicy, StoreConfig};

/// Session store trait
///
/// Mirrors the store interface expected by cookie-session middleware.
///
/// # Example
/// ```no_run
/// # use sqlsession_core::{SessionData, SessionStore};
/// # async fn example(store: &dyn SessionStore) -> sqlsession_core::Result<()> {
/// let session = SessionData::new().with_max_age(60_000);
/// store.set("abc", &session).await?;
///
/// if let Some(session) = store.get("abc").await? {
///     println!("expires at {:?}", session.cookie.expires);
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a live session
    ///
    /// Returns `Ok(None)` when no unexpired record exists, when the stored
    /// row is incomplete or unreadable, or when more than one row matches.
    /// A returned session has `cookie.expires` set from the stored expiry.
    async fn get(&self, key: &str) -> Result<Option<SessionData>>;

    /// Insert or replace a session, expiring `cookie.maxAge` (or the default
    /// TTL) from now
    async fn set(&self, key: &str, session: &SessionData) -> Result<()>;

    /// Delete a session; succeeds whether or not it existed
    async fn destroy(&self, key: &str) -> Result<()>;

    /// Push a session's expiry forward without rewriting its payload
    ///
    /// A missing session is left missing.
    async fn touch(&self, key: &str, session: &SessionData) -> Result<()>;

    /// Number of stored records, expired-but-unswept ones included
    ///
    /// `Ok(None)` means the backend returned no usable count.
    async fn length(&self) -> Result<Option<u64>>;

    /// Remove every record
    async fn clear(&self) -> Result<()>;

    /// Delete expired records, returning how many were removed
    ///
    /// Not retried; callers schedule it periodically.
    async fn cleanup(&self) -> Result<u64>;
}

/// SQL text for each statement kind, rendered once per store
#[derive(Debug, Clone)]
struct Statements {
    get: String,
    upsert: String,
    touch: String,
    destroy: String,
    count: String,
    clear: String,
    sweep: String,
}

impl Statements {
    fn render<C: Connection + ?Sized>(connection: &C, schema: &RecordSchema) -> Self {
        Self {
            get: connection.render(StatementKind::Get, schema),
            upsert: connection.render(StatementKind::Upsert, schema),
            touch: connection.render(StatementKind::Touch, schema),
            destroy: connection.render(StatementKind::Destroy, schema),
            count: connection.render(StatementKind::Count, schema),
            clear: connection.render(StatementKind::Clear, schema),
            sweep: connection.render(StatementKind::Sweep, schema),
        }
    }

    fn statement(&self, kind: StatementKind) -> Statement {
        let sql = match kind {
            StatementKind::Get => &self.get,
            StatementKind::Upsert => &self.upsert,
            StatementKind::Touch => &self.touch,
            StatementKind::Destroy => &self.destroy,
            StatementKind::Count => &self.count,
            StatementKind::Clear => &self.clear,
            StatementKind::Sweep => &self.sweep,
        };
        Statement::new(kind, sql.as_str())
    }
}

/// Session store over a single [`Connection`]
///
/// Cheap to clone; clones share the connection and configuration.
pub struct SqlSessionStore<C: Connection> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Connection> {
    connection: Arc<C>,
    gate: ConnectionGate,
    schema: RecordSchema,
    retry: RetryPolicy,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    statements: Statements,
}

impl<C: Connection> Clone for SqlSessionStore<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> fmt::Debug for SqlSessionStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlSessionStore")
            .field("schema", &self.inner.schema)
            .field("retry", &self.inner.retry)
            .field("default_ttl_ms", &self.inner.default_ttl.num_milliseconds())
            .field("connection_state", &self.inner.connection.state())
            .finish()
    }
}

impl<C: Connection> SqlSessionStore<C> {
    /// Create a store with the default configuration
    pub fn new(connection: Arc<C>) -> Result<Self> {
        Self::with_config(connection, &StoreConfig::default())
    }

    /// Create a store with a custom configuration
    ///
    /// # Errors
    /// - `Error::InvalidSchema` / `Error::Config` if the configuration is invalid
    pub fn with_config(connection: Arc<C>, config: &StoreConfig) -> Result<Self> {
        Self::with_clock(connection, config, Arc::new(SystemClock))
    }

    /// Create a store that reads time from `clock`
    pub fn with_clock(
        connection: Arc<C>,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let statements = Statements::render(connection.as_ref(), &config.schema);
        let gate = ConnectionGate::new(connection.subscribe());

        debug!(
            table = %config.schema.table,
            max_retries = config.retry.max_retries,
            "Created session store"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                connection,
                gate,
                schema: config.schema.clone(),
                retry: config.retry.clone(),
                default_ttl: config.default_ttl(),
                clock,
                statements,
            }),
        })
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.inner.connection
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.inner.schema
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn statement(&self, kind: StatementKind) -> Statement {
        self.inner.statements.statement(kind)
    }

    /// Gate, then bind and execute with retries
    ///
    /// `bind` runs on every attempt with the time of that attempt, never the
    /// time the operation was called.
    async fn run<B>(&self, kind: StatementKind, bind: B) -> Result<QueryOutcome>
    where
        B: Fn(Statement, DateTime<Utc>) -> Result<Statement> + Send + Sync,
    {
        self.inner.gate.wait_ready().await;

        let bind = &bind;
        with_retry(&self.inner.retry, kind.as_str(), move || async move {
            let statement = bind(self.statement(kind), self.now())?;
            self.execute(&statement).await
        })
        .await
    }

    /// Gate, then bind and execute exactly once
    async fn run_once<B>(&self, kind: StatementKind, bind: B) -> Result<QueryOutcome>
    where
        B: Fn(Statement, DateTime<Utc>) -> Result<Statement> + Send + Sync,
    {
        self.inner.gate.wait_ready().await;

        let statement = bind(self.statement(kind), self.now())?;
        self.execute(&statement).await
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryOutcome> {
        diagnostics::statement_issued(statement);
        let outcome = self.inner.connection.execute(statement).await?;
        diagnostics::statement_completed(statement, outcome.rows_affected, outcome.rows.len());
        Ok(outcome)
    }

    /// Turn the rows of a `Get` into a session, or `None`
    fn session_from_rows(&self, key: &str, rows: &[Vec<SqlValue>]) -> Option<SessionData> {
        let row = match rows {
            [row] => row,
            [] => return None,
            _ => {
                warn!(key, rows = rows.len(), "Multiple session rows for one key");
                return None;
            }
        };

        let payload = row.first().and_then(SqlValue::as_text)?;
        let expires = row.get(1).and_then(SqlValue::as_timestamp)?;
        if payload.is_empty() {
            return None;
        }

        match SessionData::from_payload(payload) {
            Ok(mut session) => {
                session.stamp_expires(expires);
                Some(session)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable session payload");
                None
            }
        }
    }
}

#[async_trait]
impl<C: Connection> SessionStore for SqlSessionStore<C> {
    async fn get(&self, key: &str) -> Result<Option<SessionData>> {
        let outcome = self
            .run(StatementKind::Get, |statement, now| {
                Ok(statement
                    .bind("key", SqlValue::Text(key.to_string()))
                    .bind("now", SqlValue::Timestamp(now)))
            })
            .await?;
        Ok(self.session_from_rows(key, &outcome.rows))
    }

    async fn set(&self, key: &str, session: &SessionData) -> Result<()> {
        let payload = session.to_payload()?;
        let default_ttl = self.inner.default_ttl;
        session.ttl(default_ttl)?;

        self.run(StatementKind::Upsert, |statement, now| {
            Ok(statement
                .bind("key", SqlValue::Text(key.to_string()))
                .bind("payload", SqlValue::Text(payload.clone()))
                .bind(
                    "expires",
                    SqlValue::Timestamp(session.expires_at(now, default_ttl)?),
                ))
        })
        .await?;
        Ok(())
    }

    async fn destroy(&self, key: &str) -> Result<()> {
        self.run(StatementKind::Destroy, |statement, _| {
            Ok(statement.bind("key", SqlValue::Text(key.to_string())))
        })
        .await?;
        Ok(())
    }

    async fn touch(&self, key: &str, session: &SessionData) -> Result<()> {
        let default_ttl = self.inner.default_ttl;
        session.ttl(default_ttl)?;

        let outcome = self
            .run(StatementKind::Touch, |statement, now| {
                Ok(statement
                    .bind("key", SqlValue::Text(key.to_string()))
                    .bind(
                        "expires",
                        SqlValue::Timestamp(session.expires_at(now, default_ttl)?),
                    ))
            })
            .await?;
        if outcome.rows_affected == 0 {
            debug!(key, "Touch matched no session");
        }
        Ok(())
    }

    async fn length(&self) -> Result<Option<u64>> {
        let outcome = self.run(StatementKind::Count, |statement, _| Ok(statement)).await?;
        let count = outcome
            .scalar()
            .and_then(SqlValue::as_integer)
            .and_then(|n| u64::try_from(n).ok());
        Ok(count)
    }

    async fn clear(&self) -> Result<()> {
        self.run(StatementKind::Clear, |statement, _| Ok(statement)).await?;
        info!(table = %self.inner.schema.table, "Cleared all sessions");
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64> {
        let outcome = self
            .run_once(StatementKind::Sweep, |statement, now| {
                Ok(statement.bind("now", SqlValue::Timestamp(now)))
            })
            .await?;
        if outcome.rows_affected > 0 {
            info!(
                table = %self.inner.schema.table,
                removed = outcome.rows_affected,
                "Swept expired sessions"
            );
        }
        Ok(outcome.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connection::ConnectionState;
    use crate::memory::{InjectedFailure, MemoryConnection, MemoryRecord};
    use crate::session::format_expires;
    use crate::Error;
    use serde_json::json;

    struct Fixture {
        connection: Arc<MemoryConnection>,
        clock: Arc<ManualClock>,
        store: SqlSessionStore<MemoryConnection>,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_min_delay(std::time::Duration::from_millis(1))
            .with_max_delay(std::time::Duration::from_millis(2))
    }

    fn fixture_with(connection: MemoryConnection) -> Fixture {
        let connection = Arc::new(connection);
        let clock = Arc::new(ManualClock::at_epoch());
        let config = StoreConfig::default().with_retry(fast_retry());
        let store = SqlSessionStore::with_clock(connection.clone(), &config, clock.clone())
            .expect("valid config");
        Fixture {
            connection,
            clock,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryConnection::new())
    }

    fn alice(max_age: i64) -> SessionData {
        SessionData::new()
            .with_max_age(max_age)
            .with_field("user", json!("alice"))
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get_rewrites_cookie_expires() {
        let f = fixture();
        f.store.set("abc", &alice(60_000)).await.unwrap();

        f.clock.advance(Duration::milliseconds(30_000));
        let session = f.store.get("abc").await.unwrap().expect("session is live");

        assert_eq!(session.get("user"), Some(&json!("alice")));
        assert_eq!(
            session.cookie.expires.as_deref(),
            Some("1970-01-01T00:01:00.000Z")
        );

        f.clock.advance(Duration::milliseconds(40_000));
        assert!(f.store.get("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_inclusive() {
        let f = fixture();
        f.store.set("abc", &alice(1_000)).await.unwrap();

        f.clock.advance(Duration::milliseconds(1_000));
        assert!(f.store.get("abc").await.unwrap().is_some());

        f.clock.advance(Duration::milliseconds(1));
        assert!(f.store.get("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_without_max_age_uses_default_ttl() {
        let f = fixture();
        f.store.set("abc", &SessionData::new()).await.unwrap();

        let record = f.connection.record("abc").unwrap();
        assert_eq!(record.expires, Some(at(86_400_000)));
    }

    #[tokio::test]
    async fn test_repeated_set_keeps_single_record() {
        let f = fixture();
        for i in 0..5 {
            let session = alice(60_000).with_field("visits", json!(i));
            f.store.set("abc", &session).await.unwrap();
        }

        let records = f.connection.records();
        assert_eq!(records.len(), 1);
        let stored = SessionData::from_payload(records[0].payload.as_deref().unwrap()).unwrap();
        assert_eq!(stored.get("visits"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn test_touch_extends_expiry_and_preserves_payload() {
        let f = fixture();
        f.store.set("abc", &alice(60_000)).await.unwrap();
        let before = f.connection.record("abc").unwrap();

        f.clock.advance(Duration::milliseconds(50_000));
        let changed = alice(60_000).with_field("user", json!("mallory"));
        f.store.touch("abc", &changed).await.unwrap();

        let after = f.connection.record("abc").unwrap();
        assert_eq!(after.payload, before.payload);
        assert_eq!(after.expires, Some(at(110_000)));

        f.clock.advance(Duration::milliseconds(30_000));
        let session = f.store.get("abc").await.unwrap().unwrap();
        assert_eq!(session.get("user"), Some(&json!("alice")));
        assert_eq!(session.cookie.expires, Some(format_expires(at(110_000))));
    }

    #[tokio::test]
    async fn test_touch_missing_session_is_noop() {
        let f = fixture();
        f.store.touch("ghost", &alice(60_000)).await.unwrap();
        assert!(f.connection.records().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let f = fixture();
        f.store.set("abc", &alice(60_000)).await.unwrap();

        f.store.destroy("abc").await.unwrap();
        f.store.destroy("abc").await.unwrap();
        assert!(f.store.get("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_length_and_clear() {
        let f = fixture();
        assert_eq!(f.store.length().await.unwrap(), Some(0));

        f.store.set("a", &alice(60_000)).await.unwrap();
        f.store.set("b", &alice(60_000)).await.unwrap();
        assert_eq!(f.store.length().await.unwrap(), Some(2));

        f.store.clear().await.unwrap();
        assert_eq!(f.store.length().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_length_counts_expired_rows() {
        let f = fixture();
        f.store.set("short", &alice(10)).await.unwrap();
        f.clock.advance(Duration::milliseconds(100));

        assert!(f.store.get("short").await.unwrap().is_none());
        assert_eq!(f.store.length().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let f = fixture();
        f.store.set("expired", &alice(1_000)).await.unwrap();
        f.store.set("valid", &alice(60_000)).await.unwrap();
        f.clock.advance(Duration::milliseconds(5_000));

        let before = f.store.length().await.unwrap().unwrap();
        let removed = f.store.cleanup().await.unwrap();
        let after = f.store.length().await.unwrap().unwrap();

        assert_eq!(removed, 1);
        assert_eq!(before - after, 1);
        assert!(f.store.get("valid").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_incomplete_rows_read_as_absent() {
        let f = fixture();
        f.connection.insert_raw(MemoryRecord {
            key: "null-payload".to_string(),
            payload: None,
            expires: Some(at(10_000)),
        });
        f.connection.insert_raw(MemoryRecord {
            key: "empty-payload".to_string(),
            payload: Some(String::new()),
            expires: Some(at(10_000)),
        });
        f.connection.insert_raw(MemoryRecord {
            key: "null-expires".to_string(),
            payload: Some("{}".to_string()),
            expires: None,
        });

        assert!(f.store.get("null-payload").await.unwrap().is_none());
        assert!(f.store.get("empty-payload").await.unwrap().is_none());
        assert!(f.store.get("null-expires").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_reads_as_absent() {
        let f = fixture();
        f.connection.insert_raw(MemoryRecord {
            key: "garbage".to_string(),
            payload: Some("{not json".to_string()),
            expires: Some(at(10_000)),
        });

        assert!(f.store.get("garbage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_rows_read_as_absent() {
        let f = fixture();
        for _ in 0..2 {
            f.connection.insert_raw(MemoryRecord {
                key: "dup".to_string(),
                payload: Some(r#"{"cookie":{}}"#.to_string()),
                expires: Some(at(10_000)),
            });
        }

        assert!(f.store.get("dup").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let f = fixture();
        f.connection.fail_next(3, InjectedFailure::Transient);

        f.store.set("abc", &alice(60_000)).await.unwrap();
        assert_eq!(f.connection.executed().len(), 4);
        assert!(f.connection.record("abc").is_some());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_surfaces_error() {
        let f = fixture();
        f.connection.fail_next(4, InjectedFailure::Transient);

        let err = f.store.set("abc", &alice(60_000)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(f.connection.executed().len(), 4);

        // The store stays usable afterwards
        f.store.set("abc", &alice(60_000)).await.unwrap();
        assert!(f.store.get("abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let f = fixture();
        f.connection.fail_next(1, InjectedFailure::Terminal);

        let err = f.store.destroy("abc").await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert_eq!(f.connection.executed(), vec![StatementKind::Destroy]);
    }

    #[tokio::test]
    async fn test_cleanup_is_not_retried() {
        let f = fixture();
        f.connection.fail_next(1, InjectedFailure::Transient);

        assert!(f.store.cleanup().await.unwrap_err().is_transient());
        assert_eq!(f.connection.executed(), vec![StatementKind::Sweep]);
    }

    #[tokio::test]
    async fn test_operations_wait_for_connection() {
        let f = fixture_with(MemoryConnection::connecting());

        let store = f.store.clone();
        let pending = tokio::spawn(async move { store.set("abc", &alice(60_000)).await });
        let sweeping = {
            let store = f.store.clone();
            tokio::spawn(async move { store.cleanup().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(f.connection.executed().is_empty());

        f.connection.set_state(ConnectionState::Ready);
        pending.await.unwrap().unwrap();
        sweeping.await.unwrap().unwrap();

        let mut executed = f.connection.executed();
        executed.sort_by_key(|k| k.as_str());
        assert_eq!(executed, vec![StatementKind::Sweep, StatementKind::Upsert]);
    }

    #[tokio::test]
    async fn test_get_uses_time_after_connection_wait() {
        let f = fixture_with(MemoryConnection::connecting());
        f.connection.insert_raw(MemoryRecord {
            key: "abc".to_string(),
            payload: Some(r#"{"cookie":{}}"#.to_string()),
            expires: Some(at(1_000)),
        });

        let store = f.store.clone();
        let pending = tokio::spawn(async move { store.get("abc").await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        f.clock.advance(Duration::milliseconds(5_000));
        f.connection.set_state(ConnectionState::Ready);

        assert!(pending.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_uses_time_after_connection_wait() {
        let f = fixture_with(MemoryConnection::connecting());
        f.connection.insert_raw(MemoryRecord {
            key: "old".to_string(),
            payload: Some(r#"{"cookie":{}}"#.to_string()),
            expires: Some(at(1_000)),
        });

        let store = f.store.clone();
        let sweeping = tokio::spawn(async move { store.cleanup().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        f.clock.advance(Duration::milliseconds(5_000));
        f.connection.set_state(ConnectionState::Ready);

        assert_eq!(sweeping.await.unwrap().unwrap(), 1);
        assert!(f.connection.records().is_empty());
    }

    #[tokio::test]
    async fn test_set_expiry_counts_from_connection_ready() {
        let f = fixture_with(MemoryConnection::connecting());

        let store = f.store.clone();
        let pending = tokio::spawn(async move { store.set("abc", &alice(1_000)).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        f.clock.advance(Duration::milliseconds(5_000));
        f.connection.set_state(ConnectionState::Ready);
        pending.await.unwrap().unwrap();

        assert_eq!(f.connection.record("abc").unwrap().expires, Some(at(6_000)));
    }

    /// Moves forward one second every time it is read
    #[derive(Debug)]
    struct SteppingClock(ManualClock);

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let now = self.0.now();
            self.0.advance(Duration::milliseconds(1_000));
            now
        }
    }

    #[tokio::test]
    async fn test_retry_rereads_time() {
        let connection = Arc::new(MemoryConnection::new());
        let config = StoreConfig::default().with_retry(fast_retry());
        let store = SqlSessionStore::with_clock(
            connection.clone(),
            &config,
            Arc::new(SteppingClock(ManualClock::at_epoch())),
        )
        .unwrap();
        connection.insert_raw(MemoryRecord {
            key: "abc".to_string(),
            payload: Some(r#"{"cookie":{}}"#.to_string()),
            expires: Some(at(500)),
        });
        connection.fail_next(1, InjectedFailure::Transient);

        // First attempt reads t=0 and fails; the retry reads t=1000
        assert!(store.get("abc").await.unwrap().is_none());
        assert_eq!(
            connection.executed(),
            vec![StatementKind::Get, StatementKind::Get]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_max_age_is_rejected() {
        let f = fixture();

        let err = f
            .store
            .set("abc", &alice(i64::MAX / 2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSession(_)));

        let saturated = SessionData::from_payload(r#"{"cookie":{"maxAge":-1e300}}"#).unwrap();
        let err = f.store.set("abc", &saturated).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSession(_)));

        f.store.set("abc", &alice(60_000)).await.unwrap();
        let err = f.store.touch("abc", &saturated).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSession(_)));
        let err = f
            .store
            .touch("abc", &alice(i64::MAX / 2))
            .await
            .unwrap_err();
        assert!(!err.is_transient());

        // Only the valid set reached the connection
        assert_eq!(f.connection.executed(), vec![StatementKind::Upsert]);
        assert_eq!(
            f.connection.record("abc").unwrap().expires,
            Some(at(60_000))
        );
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = StoreConfig::default().with_schema(RecordSchema::default().with_table("x;y"));
        let result = SqlSessionStore::with_config(Arc::new(MemoryConnection::new()), &config);
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[tokio::test]
    async fn test_store_is_usable_as_trait_object() {
        let f = fixture();
        let store: Arc<dyn SessionStore> = Arc::new(f.store.clone());
        store.set("abc", &alice(60_000)).await.unwrap();
        assert_eq!(store.length().await.unwrap(), Some(1));
    }
}
