//! Error types for sqlsession

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A backing-store failure that may succeed if the statement is retried
    /// (deadlock, busy database, dropped socket).
    #[error("Transient database error: {0}")]
    Transient(String),

    /// A backing-store failure that retrying cannot fix (constraint
    /// violation, malformed statement, missing table).
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Session contents the store cannot persist, such as a `maxAge`
    /// that puts the expiry outside the representable range.
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the retry wrapper should attempt the statement again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
