//! Statement tracing
//!
//! A side channel only: nothing here influences control flow. Payload values
//! are reduced to their size so session contents never reach the logs.

use tracing::{debug, trace};

use crate::connection::{SqlValue, Statement};

pub const TARGET: &str = "sqlsession::statement";

/// Emit the issued statement and its parameters
pub fn statement_issued(statement: &Statement) {
    debug!(
        target: TARGET,
        operation = statement.kind.as_str(),
        sql = %statement.sql,
        params = statement.params.len(),
        "Issuing statement"
    );

    for param in &statement.params {
        trace!(
            target: TARGET,
            operation = statement.kind.as_str(),
            name = param.name,
            value = %describe(param.name, &param.value),
            "Statement parameter"
        );
    }
}

/// Emit the outcome of a statement that completed successfully
pub fn statement_completed(statement: &Statement, rows_affected: u64, rows: usize) {
    debug!(
        target: TARGET,
        operation = statement.kind.as_str(),
        rows_affected,
        rows,
        "Statement completed"
    );
}

/// Loggable rendering of a parameter value
pub fn describe(name: &str, value: &SqlValue) -> String {
    match value {
        SqlValue::Text(text) if name == "payload" => format!("<{} bytes>", text.len()),
        SqlValue::Text(text) => format!("{:?}", text),
        SqlValue::Integer(n) => n.to_string(),
        SqlValue::Timestamp(ts) => ts.to_rfc3339(),
        SqlValue::Null => "NULL".to_string(),
    }
}
