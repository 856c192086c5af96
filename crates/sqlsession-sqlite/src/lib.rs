//! SQLite session storage for sqlsession
//!
//! This crate implements the `Connection` contract over one `sqlx` SQLite
//! connection. Pair it with `SqlSessionStore` to get a `SessionStore`.
//!
//! # Features
//! - Background connection establishment with a readiness signal
//! - Optional table and expiry index creation
//! - Busy/locked errors classified as transient for the retry loop
//!
//! # Example
//! ```no_run
//! # use sqlsession_sqlite::SqliteBackend;
//! # use sqlsession_core::{SessionStore, SqlSessionStore, StoreConfig};
//! # async fn example() -> sqlsession_core::Result<()> {
//! let config = StoreConfig::default();
//! let backend = SqliteBackend::connect("sqlite://sessions.db", &config)?;
//! let store = SqlSessionStore::with_config(backend, &config)?;
//!
//! // Waits until the database is open
//! let sessions = store.length().await?;
//! # Ok(())
//! # }
//! ```

mod sqlite_backend;

pub use sqlite_backend::{SqliteBackend, classify};
