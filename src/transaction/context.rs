//! A single transaction.
//!
//! `Transaction<TxActive>` reads the commit it began on, overlaid with its
//! own staged writes. Nothing reaches the object database until commit.
//! Committing or rolling back consumes it, so a finished transaction cannot
//! be touched again.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::{
    ChangeSet, CommitId, CommitMessage, Document, GitRepository, RecordKey, StorageError, TableName,
};
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::mode::TransactionMode;

#[derive(Debug)]
pub struct TxActive;

#[derive(Debug)]
pub struct TxCommitted;

#[derive(Debug)]
pub struct TxAborted;

/// What the manager knows about a transaction.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    /// lowercase ULID
    pub tx_id: String,
    /// Commit of main when the transaction started.
    pub base_commit: CommitId,
    /// Commit holding the transaction's effects once committed.
    pub final_commit: Option<CommitId>,
    pub mode: TransactionMode,
    /// Tables the transaction may touch.
    pub tables: BTreeSet<TableName>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// A transaction in lifecycle state `State`.
pub struct Transaction<State> {
    pub(crate) metadata: TransactionMetadata,
    pub(crate) repo: GitRepository,
    changes: ChangeSet,
    /// committed keys of each table at the base commit, loaded on first use
    base_keys: Mutex<BTreeMap<TableName, BTreeSet<RecordKey>>>,
    _state: PhantomData<State>,
}

impl<State> Transaction<State> {
    pub fn id(&self) -> &str {
        &self.metadata.tx_id
    }

    /// The main head this transaction started from.
    pub fn base_commit(&self) -> CommitId {
        self.metadata.base_commit
    }

    pub fn mode(&self) -> TransactionMode {
        self.metadata.mode
    }

    /// Tables declared when the transaction began.
    pub fn tables(&self) -> &BTreeSet<TableName> {
        &self.metadata.tables
    }

    fn into_state<Next>(self) -> Transaction<Next> {
        Transaction {
            metadata: self.metadata,
            repo: self.repo,
            changes: ChangeSet::new(),
            base_keys: Mutex::new(BTreeMap::new()),
            _state: PhantomData,
        }
    }
}

impl Transaction<TxActive> {
    pub(crate) fn new(
        repo: GitRepository,
        tx_id: String,
        base_commit: CommitId,
        mode: TransactionMode,
        tables: BTreeSet<TableName>,
    ) -> Self {
        Self {
            metadata: TransactionMetadata {
                tx_id,
                base_commit,
                final_commit: None,
                mode,
                tables,
                started_at: chrono::Utc::now(),
            },
            repo,
            changes: ChangeSet::new(),
            base_keys: Mutex::new(BTreeMap::new()),
            _state: PhantomData,
        }
    }

    fn check_scope(&self, table: &TableName) -> TransactionResult<()> {
        if !self.metadata.tables.contains(table) {
            return Err(TransactionError::OutOfScope {
                tx_id: self.metadata.tx_id.clone(),
                table: table.clone(),
            });
        }
        Ok(())
    }

    fn check_write(&self, table: &TableName) -> TransactionResult<()> {
        self.check_scope(table)?;
        if !self.metadata.mode.allows_writes() {
            return Err(TransactionError::ReadOnly {
                tx_id: self.metadata.tx_id.clone(),
                table: table.clone(),
            });
        }
        Ok(())
    }

    // reads

    /// One record, staged writes first.
    pub fn get(&self, table: &TableName, key: RecordKey) -> TransactionResult<Option<Document>> {
        self.check_scope(table)?;
        if let Some(staged) = self.changes.table(table).and_then(|c| c.lookup(key)) {
            return Ok(staged.cloned());
        }
        Ok(self.repo.read_document(table, key, self.metadata.base_commit)?)
    }

    pub fn contains(&self, table: &TableName, key: RecordKey) -> TransactionResult<bool> {
        self.check_scope(table)?;
        if let Some(staged) = self.changes.table(table).and_then(|c| c.lookup(key)) {
            return Ok(staged.is_some());
        }
        self.with_base_keys(table, |keys| keys.contains(&key))
    }

    /// Run `f` on the committed key set of `table`. The base snapshot never
    /// changes, so the set is listed once per table and kept.
    fn with_base_keys<T>(&self, table: &TableName, f: impl FnOnce(&BTreeSet<RecordKey>) -> T) -> TransactionResult<T> {
        let mut cache = self.base_keys.lock();
        let keys = match cache.entry(table.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let listed = self.repo.list_keys(table, self.metadata.base_commit)?;
                entry.insert(listed.into_iter().collect())
            }
        };
        Ok(f(keys))
    }

    /// Every key of a table, ascending.
    pub fn keys(&self, table: &TableName) -> TransactionResult<Vec<RecordKey>> {
        self.check_scope(table)?;
        let staged = self.changes.table(table);

        let mut keys: BTreeSet<RecordKey> = match staged {
            Some(changes) if changes.cleared => BTreeSet::new(),
            _ => self.with_base_keys(table, BTreeSet::clone)?,
        };

        if let Some(changes) = staged {
            for (key, write) in &changes.writes {
                match write {
                    Some(_) => keys.insert(*key),
                    None => keys.remove(key),
                };
            }
        }

        Ok(keys.into_iter().collect())
    }

    /// Read every record whose key passes `filter`, ascending by key.
    pub fn scan_where<F>(&self, table: &TableName, filter: F) -> TransactionResult<Vec<Document>>
    where
        F: Fn(RecordKey) -> bool,
    {
        self.check_scope(table)?;
        let staged = self.changes.table(table);

        let mut docs: BTreeMap<RecordKey, Document> = BTreeMap::new();
        if !staged.is_some_and(|c| c.cleared) {
            let committed = self.repo.scan_where(table, self.metadata.base_commit, |key| {
                filter(key) && !staged.is_some_and(|c| c.writes.contains_key(&key))
            })?;
            docs.extend(committed.into_iter().map(|doc| (doc.key, doc)));
        }

        if let Some(changes) = staged {
            for (key, write) in &changes.writes {
                if let Some(doc) = write {
                    if filter(*key) {
                        docs.insert(*key, doc.clone());
                    }
                }
            }
        }

        Ok(docs.into_values().collect())
    }

    /// Read every record of a table, ascending by key.
    pub fn scan(&self, table: &TableName) -> TransactionResult<Vec<Document>> {
        self.scan_where(table, |_| true)
    }

    // writes

    /// Insert or replace a record.
    pub fn put(&mut self, table: &TableName, doc: Document) -> TransactionResult<()> {
        self.check_write(table)?;
        self.changes.table_mut(table).put(doc);
        Ok(())
    }

    /// Insert a record, failing if the key is already taken.
    pub fn insert(&mut self, table: &TableName, doc: Document) -> TransactionResult<()> {
        self.check_write(table)?;
        if self.contains(table, doc.key)? {
            return Err(TransactionError::KeyConflict {
                table: table.clone(),
                key: doc.key,
            });
        }
        self.changes.table_mut(table).put(doc);
        Ok(())
    }

    /// Delete a record; returns whether it existed.
    pub fn delete(&mut self, table: &TableName, key: RecordKey) -> TransactionResult<bool> {
        self.check_write(table)?;
        let existed = self.contains(table, key)?;
        if existed {
            self.changes.table_mut(table).delete(key);
        }
        Ok(existed)
    }

    /// Remove every record of a table.
    pub fn clear(&mut self, table: &TableName) -> TransactionResult<()> {
        self.check_write(table)?;
        self.changes.table_mut(table).clear();
        Ok(())
    }

    /// Commit the transaction as a single commit on main.
    ///
    /// If main moved since this transaction began, the commit is rebased
    /// onto the new head unless one of the tables written here was also
    /// changed there, which is a conflict. Callers must hold the manager's
    /// commit lock.
    pub(crate) fn commit(mut self) -> TransactionResult<Transaction<TxCommitted>> {
        if self.changes.is_empty() {
            debug!(tx = %self.metadata.tx_id, "nothing staged, skipping commit");
            self.metadata.final_commit = Some(self.metadata.base_commit);
            return Ok(self.into_state());
        }

        let written: Vec<TableName> = self.changes.written_tables().into_iter().cloned().collect();
        let main_head = self.repo.head()?;

        if main_head != self.metadata.base_commit {
            let changed = self.repo.changed_tables(self.metadata.base_commit, main_head)?;
            let conflicts: Vec<TableName> = written
                .iter()
                .filter(|t| changed.contains(*t))
                .cloned()
                .collect();
            if !conflicts.is_empty() {
                return Err(TransactionError::Conflict { tables: conflicts });
            }
            debug!(tx = %self.metadata.tx_id, onto = %main_head.short(), "rebasing onto moved main");
        }

        let message = CommitMessage::transaction(
            &self.metadata.tx_id,
            &self.changes.written_tables(),
            self.changes.write_count(),
        );
        let new_commit = self.repo.commit_changes(main_head, &self.changes, &message)?;

        match self.repo.advance_main(main_head, new_commit) {
            Ok(()) => {}
            Err(StorageError::ConcurrentModification { .. }) => {
                return Err(TransactionError::Conflict { tables: written });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            tx = %self.metadata.tx_id,
            commit = %new_commit.short(),
            writes = self.changes.write_count(),
            "committed transaction"
        );
        self.metadata.final_commit = Some(new_commit);
        Ok(self.into_state())
    }

    /// Drop every staged write.
    pub(crate) fn rollback(self) -> Transaction<TxAborted> {
        debug!(tx = %self.metadata.tx_id, "rolled back transaction");
        self.into_state()
    }
}

impl Transaction<TxCommitted> {
    /// Commit holding this transaction's effects, or its base if it wrote nothing.
    pub fn final_commit(&self) -> CommitId {
        self.metadata.final_commit.unwrap_or(self.metadata.base_commit)
    }
}
