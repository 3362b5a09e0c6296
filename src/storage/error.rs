//! Storage layer error types

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// everything that can go wrong between the record API and the object database
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("invalid table name: {0}")]
    InvalidTableName(#[from] InvalidNameError),

    /// a record could not be encoded to or decoded from JSON
    #[error("record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// a blob does not match the file it was stored under
    #[error("corrupted record at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// the directory holds no Git repository
    #[error("no dataset repository at {0}")]
    NotInitialized(PathBuf),

    /// HEAD points at an unborn branch
    #[error("dataset repository has no commits")]
    EmptyRepository,

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// a table is a file or a record is a directory
    #[error("unexpected entry at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// main moved between reading it and advancing it
    #[error("concurrent modification: branch {branch} moved")]
    ConcurrentModification { branch: String },

    /// the record body is not a JSON object
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// whether a ref or commit was missing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RefNotFound(_) | StorageError::CommitNotFound(_)
        )
    }

    /// whether another writer got to main first
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
