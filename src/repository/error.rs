//! Repository error types.

use thiserror::Error;

use crate::transaction::TransactionError;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors surfaced by the row and variable repositories.
///
/// Every error corresponds to a fully rolled back transaction, so the caller
/// may re-read state and retry.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The operation needed a record that does not exist.
    #[error("{op}: no record with key {key}")]
    NotFound { op: &'static str, key: u64 },

    /// The arguments violate the operation's preconditions.
    #[error("{op}: {reason}")]
    InvalidArgument { op: &'static str, reason: String },

    /// The backing store failed.
    #[error("{op} failed ({context}): {source}")]
    Store {
        op: &'static str,
        context: String,
        #[source]
        source: TransactionError,
    },
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, RepositoryError::InvalidArgument { .. })
    }

    /// The underlying transaction error, if the store failed.
    pub fn store_error(&self) -> Option<&TransactionError> {
        match self {
            RepositoryError::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failure raised inside a repository transaction, before it is annotated
/// with the operation that ran it.
#[derive(Debug)]
pub(crate) enum Failure {
    Store(TransactionError),
    Rejected(RepositoryError),
}

impl Failure {
    pub(crate) fn not_found(op: &'static str, key: u64) -> Self {
        Failure::Rejected(RepositoryError::NotFound { op, key })
    }

    pub(crate) fn invalid(op: &'static str, reason: impl Into<String>) -> Self {
        Failure::Rejected(RepositoryError::InvalidArgument {
            op,
            reason: reason.into(),
        })
    }

    pub(crate) fn annotate(self, op: &'static str, context: String) -> RepositoryError {
        match self {
            Failure::Store(source) => RepositoryError::Store { op, context, source },
            Failure::Rejected(err) => err,
        }
    }
}

impl From<TransactionError> for Failure {
    fn from(err: TransactionError) -> Self {
        Failure::Store(err)
    }
}
