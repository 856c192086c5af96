//! Logical layout of the session table
//!
//! Identifiers from configuration end up inside SQL text, so they are checked
//! against a conservative pattern and always emitted double-quoted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"));

/// Table and column names used to persist session records
///
/// # Example
/// ```
/// use sqlsession_core::RecordSchema;
///
/// let schema = RecordSchema::default().with_table("auth.web_sessions");
/// assert!(schema.validate().is_ok());
/// assert_eq!(schema.quoted_table(), r#""auth"."web_sessions""#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Table name, optionally qualified as `schema.table`
    #[serde(default = "default_table")]
    pub table: String,

    /// Column holding the session key (unique)
    #[serde(default = "default_key_column")]
    pub key_column: String,

    /// Column holding the serialized session
    #[serde(default = "default_payload_column")]
    pub payload_column: String,

    /// Column holding the absolute expiry time
    #[serde(default = "default_expires_column")]
    pub expires_column: String,
}

fn default_table() -> String {
    "sessions".to_string()
}

fn default_key_column() -> String {
    "sid".to_string()
}

fn default_payload_column() -> String {
    "session".to_string()
}

fn default_expires_column() -> String {
    "expires".to_string()
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            table: default_table(),
            key_column: default_key_column(),
            payload_column: default_payload_column(),
            expires_column: default_expires_column(),
        }
    }
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    pub fn with_payload_column(mut self, column: impl Into<String>) -> Self {
        self.payload_column = column.into();
        self
    }

    pub fn with_expires_column(mut self, column: impl Into<String>) -> Self {
        self.expires_column = column.into();
        self
    }

    /// Reject names that cannot be safely interpolated into SQL
    pub fn validate(&self) -> Result<()> {
        let parts: Vec<&str> = self.table.split('.').collect();
        if parts.len() > 2 || parts.iter().any(|p| !IDENTIFIER.is_match(p)) {
            return Err(Error::InvalidSchema(format!(
                "invalid table name '{}'",
                self.table
            )));
        }

        for (role, column) in [
            ("key", &self.key_column),
            ("payload", &self.payload_column),
            ("expires", &self.expires_column),
        ] {
            if !IDENTIFIER.is_match(column) {
                return Err(Error::InvalidSchema(format!(
                    "invalid {} column name '{}'",
                    role, column
                )));
            }
        }

        if self.key_column == self.payload_column
            || self.key_column == self.expires_column
            || self.payload_column == self.expires_column
        {
            return Err(Error::InvalidSchema(
                "key, payload and expires columns must be distinct".to_string(),
            ));
        }

        Ok(())
    }

    /// Schema qualifier of the table, if any
    pub fn table_namespace(&self) -> Option<&str> {
        self.table.split_once('.').map(|(namespace, _)| namespace)
    }

    /// Table name without its schema qualifier
    pub fn table_name(&self) -> &str {
        self.table
            .split_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.table)
    }

    pub fn quoted_table(&self) -> String {
        match self.table_namespace() {
            Some(namespace) => format!("{}.{}", quote(namespace), quote(self.table_name())),
            None => quote(&self.table),
        }
    }

    pub fn quoted_key(&self) -> String {
        quote(&self.key_column)
    }

    pub fn quoted_payload(&self) -> String {
        quote(&self.payload_column)
    }

    pub fn quoted_expires(&self) -> String {
        quote(&self.expires_column)
    }

    /// Name for the index on the expiry column (unqualified, unquoted)
    pub fn expires_index_name(&self) -> String {
        format!("{}_{}_idx", self.table_name(), self.expires_column)
    }
}

/// Double-quote an identifier that already passed validation
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
