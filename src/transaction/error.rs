//! Transaction error types.

use thiserror::Error;

use crate::storage::{RecordKey, StorageError, TableName};

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Another transaction committed to the same tables since this one began.
    #[error("transaction conflict on tables: {}", tables_display(.tables))]
    Conflict { tables: Vec<TableName> },

    /// A write was attempted in a read-only transaction.
    #[error("transaction {tx_id} is read-only, cannot write to {table}")]
    ReadOnly { tx_id: String, table: TableName },

    /// The table was not declared when the transaction began.
    #[error("table {table} is outside the scope of transaction {tx_id}")]
    OutOfScope { tx_id: String, table: TableName },

    /// A strict insert hit an existing key.
    #[error("key {key} already exists in {table}")]
    KeyConflict { table: TableName, key: RecordKey },

    /// A record could not be converted to or from its stored form.
    #[error("record codec error in {table}: {source}")]
    Codec {
        table: TableName,
        #[source]
        source: serde_json::Error,
    },

    /// Internal error.
    #[error("internal transaction error: {0}")]
    Internal(String),
}

fn tables_display(tables: &[TableName]) -> String {
    tables
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl TransactionError {
    /// Check if this error is retryable.
    ///
    /// Only conflicts qualify, and the caller must re-read state before retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransactionError::Conflict { .. })
    }
}
