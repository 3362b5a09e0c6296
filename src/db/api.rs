//! Opening a dataset and reaching its repositories.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::repository::{RowRepository, VariableRepository};
use crate::storage::{GitRepository, GitSignature, StorageError};
use crate::transaction::{TransactionError, TransactionManager};

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// no dataset at the path and `create_if_missing` was off
    #[error("no dataset at {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// How to open a dataset.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// initialize a fresh repository when `path` has none
    pub create_if_missing: bool,
    /// author and committer of every commit
    pub signature: GitSignature,
    pub verbose: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".sheetdb"),
            create_if_missing: true,
            signature: GitSignature::sheetdb(),
            verbose: false,
        }
    }
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn create_if_missing(self, create_if_missing: bool) -> Self {
        Self {
            create_if_missing,
            ..self
        }
    }

    pub fn signature(self, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            signature: GitSignature::new(name, email),
            ..self
        }
    }

    pub fn verbose(self, verbose: bool) -> Self {
        Self { verbose, ..self }
    }

    fn validate(&self) -> DatabaseResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(DatabaseError::InvalidConfig("path must not be empty".to_string()));
        }
        let GitSignature { name, email } = &self.signature;
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "signature needs a name and an email".to_string(),
            ));
        }
        Ok(())
    }
}

/// An open dataset: the row and variable repositories over one Git store.
#[derive(Debug)]
pub struct Database {
    config: DatabaseConfig,
    repo: GitRepository,
    transactions: TransactionManager,
    rows: RowRepository,
    variables: VariableRepository,
}

impl Database {
    /// Open the dataset at `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::new(path.as_ref()))
    }

    pub fn open_with_config(config: DatabaseConfig) -> DatabaseResult<Self> {
        config.validate()?;

        let repo = match (config.create_if_missing, config.path.exists()) {
            (true, _) => GitRepository::open_or_init(&config.path)?,
            (false, true) => GitRepository::open(&config.path)?,
            (false, false) => return Err(DatabaseError::NotFound(config.path.clone())),
        }
        .with_signature(config.signature.clone());

        let transactions = TransactionManager::new(repo.clone());
        let rows = RowRepository::new(transactions.clone());
        let variables = VariableRepository::new(transactions.clone());

        info!(path = %config.path.display(), "opened dataset");
        debug!(?config, "dataset configuration");

        Ok(Self {
            config,
            repo,
            transactions,
            rows,
            variables,
        })
    }

    pub fn rows(&self) -> &RowRepository {
        &self.rows
    }

    pub fn variables(&self) -> &VariableRepository {
        &self.variables
    }

    /// The manager both repositories run their transactions through.
    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn stats(&self) -> DatabaseResult<DatabaseStats> {
        let head = self.repo.head()?;
        let counts = self.repo.stats(head)?;

        Ok(DatabaseStats {
            tables: counts.table_count,
            total_records: counts.total_records,
            head: head.short(),
            active_transactions: self.transactions.active_count(),
        })
    }

    /// Commits on main, newest first, at most `limit` of them.
    pub fn history(&self, limit: Option<usize>) -> DatabaseResult<Vec<HistoryEntry>> {
        let head = self.repo.head()?;
        let entries = self
            .repo
            .history(head, limit)?
            .into_iter()
            .map(|commit| HistoryEntry {
                id: commit.id.to_string(),
                message: commit.summary().to_string(),
                timestamp: commit.timestamp.timestamp(),
            })
            .collect();
        Ok(entries)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// tables holding at least one record
    pub tables: usize,
    pub total_records: usize,
    /// short id of the main head
    pub head: String,
    pub active_transactions: usize,
}

/// One commit of `Database::history`.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: String,
    /// first line of the commit message
    pub message: String,
    /// seconds since the epoch
    pub timestamp: i64,
}
