//! sqlsession core types and traits
//!
//! This crate provides the pieces shared by every sqlsession backend:
//! - The `SessionStore` trait and its SQL-backed implementation
//! - The connection contract, lifecycle state and readiness gate
//! - Retry policy and the retrying wrapper for transient failures
//! - Record schema, session data model and store configuration
//! - Core error types

pub mod clock;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod gate;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod retry;
pub mod schema;
pub mod session;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StoreConfig, load_config};
pub use connection::{
    Connection, ConnectionState, ConnectionStateCell, QueryOutcome, SqlValue, Statement,
    StatementKind,
};
pub use error::{Error, Result};
pub use gate::ConnectionGate;
pub use retry::{RetryPolicy, with_retry};
pub use schema::RecordSchema;
pub use session::{Cookie, DEFAULT_TTL_MS, SessionData};
pub use store::{SessionStore, SqlSessionStore};
