//! Hands out transactions and publishes their commits.
//!
//! Every transaction starts from the main head of the moment. Commits are
//! published one at a time under `publish_lock`; whether a commit can land
//! is decided by the transaction itself (see `Transaction::commit`).

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::storage::{CommitId, GitRepository, TableName};
use crate::transaction::context::{Transaction, TxActive};
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::mode::TransactionMode;

/// Entry point for transactions on one repository. Clones share state.
#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<Shared>,
}

struct Shared {
    repo: GitRepository,
    /// ids of open transactions
    open: RwLock<HashSet<String>>,
    publish_lock: Mutex<()>,
}

impl TransactionManager {
    pub fn new(repo: GitRepository) -> Self {
        Self {
            shared: Arc::new(Shared {
                repo,
                open: RwLock::new(HashSet::new()),
                publish_lock: Mutex::new(()),
            }),
        }
    }

    pub fn repo(&self) -> &GitRepository {
        &self.shared.repo
    }

    /// Start a transaction on the current main head, scoped to `tables`.
    pub fn begin(&self, mode: TransactionMode, tables: &[TableName]) -> TransactionResult<Transaction<TxActive>> {
        let id = Ulid::new().to_string().to_lowercase();
        let base = self.shared.repo.head()?;
        let scope: BTreeSet<TableName> = tables.iter().cloned().collect();

        let tx = Transaction::new(self.shared.repo.clone(), id.clone(), base, mode, scope);
        debug!(tx = %id, %mode, base = %base.short(), "began transaction");

        self.shared.open.write().insert(id);
        Ok(tx)
    }

    pub fn active_count(&self) -> usize {
        self.shared.open.read().len()
    }

    fn close(&self, tx_id: &str) {
        self.shared.open.write().remove(tx_id);
    }

    /// Publish `tx` to main. The transaction is closed whether or not this
    /// succeeds; on failure main is left where it was.
    pub fn commit_transaction(&self, tx: Transaction<TxActive>) -> TransactionResult<CommitId> {
        let _publishing = self.shared.publish_lock.lock();
        let id = tx.id().to_string();

        let outcome = tx.commit();
        self.close(&id);
        Ok(outcome?.final_commit())
    }

    pub fn rollback_transaction(&self, tx: Transaction<TxActive>) {
        let id = tx.id().to_string();
        tx.rollback();
        self.close(&id);
    }

    /// Run `f` in a fresh transaction. `Ok` commits and returns once main
    /// holds the commit; `Err` rolls back and is returned unchanged.
    pub fn with_transaction<F, T, E>(&self, mode: TransactionMode, tables: &[TableName], f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<TxActive>) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let mut tx = self.begin(mode, tables)?;
        let value = match f(&mut tx) {
            Ok(value) => value,
            Err(e) => {
                self.rollback_transaction(tx);
                return Err(e);
            }
        };
        self.commit_transaction(tx)?;
        Ok(value)
    }

    /// Run `f` against a read-only snapshot of main.
    pub fn read<F, T, E>(&self, tables: &[TableName], f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<TxActive>) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.with_transaction(TransactionMode::ReadOnly, tables, |tx| f(tx))
    }

    pub fn head(&self) -> TransactionResult<CommitId> {
        Ok(self.shared.repo.head()?)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("path", &self.shared.repo.path())
            .field("open", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Document, RecordKey};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TransactionManager) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, TransactionManager::new(repo))
    }

    fn rows() -> TableName {
        TableName::new("rows").unwrap()
    }

    fn doc(key: u64) -> Document {
        Document::from_value(RecordKey::new(key), json!({ "id": key })).unwrap()
    }

    #[test]
    fn test_begin_and_commit() {
        let (_dir, manager) = setup();

        let mut tx = manager.begin(TransactionMode::ReadWrite, &[rows()]).unwrap();
        assert_eq!(manager.active_count(), 1);
        tx.put(&rows(), doc(0)).unwrap();

        let commit_id = manager.commit_transaction(tx).unwrap();
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.head().unwrap(), commit_id);
        assert_eq!(manager.repo().count_records(&rows(), commit_id).unwrap(), 1);
    }

    #[test]
    fn test_begin_and_rollback() {
        let (_dir, manager) = setup();
        let initial_head = manager.head().unwrap();

        let mut tx = manager.begin(TransactionMode::ReadWrite, &[rows()]).unwrap();
        tx.put(&rows(), doc(0)).unwrap();
        manager.rollback_transaction(tx);

        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.head().unwrap(), initial_head);
    }

    #[test]
    fn test_with_transaction() {
        let (_dir, manager) = setup();

        let result: TransactionResult<usize> = manager.with_transaction(TransactionMode::ReadWrite, &[rows()], |tx| {
            tx.put(&rows(), doc(0))?;
            tx.put(&rows(), doc(1))?;
            Ok(tx.keys(&rows())?.len())
        });
        assert_eq!(result.unwrap(), 2);

        let count: TransactionResult<usize> = manager.read(&[rows()], |tx| Ok(tx.scan(&rows())?.len()));
        assert_eq!(count.unwrap(), 2);
    }

    #[test]
    fn test_with_transaction_rollback_on_error() {
        let (_dir, manager) = setup();
        let head = manager.head().unwrap();

        let result: TransactionResult<()> = manager.with_transaction(TransactionMode::ReadWrite, &[rows()], |tx| {
            tx.put(&rows(), doc(0))?;
            Err(TransactionError::Internal("test error".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(manager.head().unwrap(), head);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_active_transactions() {
        let (_dir, manager) = setup();
        assert_eq!(manager.active_count(), 0);

        let tx1 = manager.begin(TransactionMode::ReadOnly, &[rows()]).unwrap();
        let tx2 = manager.begin(TransactionMode::ReadWrite, &[rows()]).unwrap();
        assert_eq!(manager.active_count(), 2);

        manager.rollback_transaction(tx1);
        assert_eq!(manager.active_count(), 1);
        manager.rollback_transaction(tx2);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_concurrent_commit_on_same_table_conflicts() {
        let (_dir, manager) = setup();

        let mut tx1 = manager.begin(TransactionMode::ReadWrite, &[rows()]).unwrap();
        let mut tx2 = manager.begin(TransactionMode::ReadWrite, &[rows()]).unwrap();
        tx1.put(&rows(), doc(0)).unwrap();
        tx2.put(&rows(), doc(1)).unwrap();

        assert!(manager.commit_transaction(tx1).is_ok());

        let second = manager.commit_transaction(tx2);
        assert!(matches!(second, Err(TransactionError::Conflict { .. })));
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_shared_across_threads() {
        let (_dir, manager) = setup();

        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let manager = manager.clone();
                let table = TableName::new(format!("sheet{}", i)).unwrap();
                std::thread::spawn(move || {
                    let scope = [table.clone()];
                    manager
                        .with_transaction(TransactionMode::ReadWrite, &scope, |tx| tx.put(&table, doc(i)))
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let head = manager.head().unwrap();
        assert_eq!(manager.repo().list_tables(head).unwrap().len(), 4);
    }
}
