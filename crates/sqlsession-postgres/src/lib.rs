//! PostgreSQL session storage for sqlsession
//!
//! This crate implements the `Connection` contract over one `sqlx`
//! PostgreSQL connection. Pair it with `SqlSessionStore` to get a
//! `SessionStore`.
//!
//! # Features
//! - Expiry stored as `TIMESTAMPTZ` with an index for the sweep
//! - Schema-qualified tables (`auth.sessions`)
//! - Serialization failures, deadlocks, lock timeouts and connection
//!   exceptions classified as transient for the retry loop
//!
//! # Example
//! ```no_run
//! # use sqlsession_postgres::PostgresBackend;
//! # use sqlsession_core::{SessionStore, SqlSessionStore, StoreConfig};
//! # async fn example() -> sqlsession_core::Result<()> {
//! let config = StoreConfig::default();
//! let backend = PostgresBackend::connect("postgres://localhost/app", &config)?;
//! let store = SqlSessionStore::with_config(backend, &config)?;
//! let removed = store.cleanup().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod postgres_backend;

pub use config::PostgresBackendConfig;
pub use postgres_backend::{PostgresBackend, classify};
