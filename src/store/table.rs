//! Typed table handle over an active transaction.

use std::marker::PhantomData;

use tracing::debug;

use crate::storage::{RecordKey, TableName};
use crate::store::query::{Field, WhereClause};
use crate::store::record::{decode, encode, Record};
use crate::transaction::{Transaction, TransactionError, TransactionResult, TxActive};

impl Transaction<TxActive> {
    /// Open the table holding records of type `R`.
    pub fn table<R: Record>(&mut self) -> Table<'_, R> {
        Table::new(self)
    }
}

/// A typed view of one table inside an active transaction.
///
/// Every write is staged in the transaction and becomes durable only when the
/// transaction commits.
pub struct Table<'tx, R> {
    pub(crate) tx: &'tx mut Transaction<TxActive>,
    pub(crate) name: TableName,
    _record: PhantomData<R>,
}

impl<'tx, R: Record> Table<'tx, R> {
    pub fn new(tx: &'tx mut Transaction<TxActive>) -> Self {
        Self {
            tx,
            name: R::table_name(),
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    // ==================== Reads ====================

    pub fn get(&self, key: RecordKey) -> TransactionResult<Option<R>> {
        self.tx.get(&self.name, key)?.map(decode).transpose()
    }

    /// Look up several keys at once; missing keys yield `None` in place.
    pub fn bulk_get(&self, keys: &[RecordKey]) -> TransactionResult<Vec<Option<R>>> {
        keys.iter().map(|key| self.get(*key)).collect()
    }

    /// Every record, ascending by key.
    pub fn to_vec(&self) -> TransactionResult<Vec<R>> {
        self.tx.scan(&self.name)?.into_iter().map(decode).collect()
    }

    pub fn count(&self) -> TransactionResult<usize> {
        Ok(self.tx.keys(&self.name)?.len())
    }

    /// One past the largest key in use, or 0 for an empty table.
    pub fn next_key(&self) -> TransactionResult<RecordKey> {
        let keys = self.tx.keys(&self.name)?;
        match keys.last() {
            None => Ok(RecordKey::new(0)),
            Some(last) => last.get().checked_add(1).map(RecordKey::new).ok_or_else(|| {
                TransactionError::Internal(format!("no key follows {} in {}", last, self.name))
            }),
        }
    }

    /// Range queries on the primary key.
    pub fn where_key(&self) -> WhereClause<'_, 'tx, R> {
        WhereClause::new(self, Field::Key)
    }

    /// Range queries on a secondary index.
    pub fn where_index<'a>(&'a self, index: &'a str) -> WhereClause<'a, 'tx, R> {
        WhereClause::new(self, Field::Index(index))
    }

    // ==================== Writes ====================

    /// Insert or replace a record.
    pub fn put(&mut self, record: &R) -> TransactionResult<RecordKey> {
        let doc = encode(record)?;
        let key = doc.key;
        self.tx.put(&self.name, doc)?;
        Ok(key)
    }

    /// Insert a record, failing if its key is already taken.
    pub fn add(&mut self, record: &R) -> TransactionResult<RecordKey> {
        let doc = encode(record)?;
        let key = doc.key;
        self.tx.insert(&self.name, doc)?;
        Ok(key)
    }

    /// Delete a record; returns whether it existed.
    pub fn delete(&mut self, key: RecordKey) -> TransactionResult<bool> {
        self.tx.delete(&self.name, key)
    }

    pub fn clear(&mut self) -> TransactionResult<()> {
        debug!(table = %self.name, "clearing table");
        self.tx.clear(&self.name)
    }

    /// Strictly insert every record. The first key clash aborts with
    /// `KeyConflict`.
    pub fn bulk_add(&mut self, records: &[R]) -> TransactionResult<()> {
        for record in records {
            self.add(record)?;
        }
        Ok(())
    }

    pub fn bulk_put(&mut self, records: &[R]) -> TransactionResult<()> {
        for record in records {
            self.put(record)?;
        }
        Ok(())
    }

    /// Delete every listed key; returns how many existed.
    pub fn bulk_delete(&mut self, keys: &[RecordKey]) -> TransactionResult<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(*key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Apply `f` to every record in key order and write each one back.
    ///
    /// Returns the number of records visited. `f` must not change the key.
    pub fn modify<F>(&mut self, mut f: F) -> TransactionResult<usize>
    where
        F: FnMut(&mut R),
    {
        let records = self.to_vec()?;
        let visited = records.len();
        for mut record in records {
            let key = record.key();
            f(&mut record);
            debug_assert_eq!(key, record.key(), "modify must not change a record's key");
            self.put(&record)?;
        }
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::GitRepository;
    use crate::transaction::{TransactionError, TransactionManager, TransactionMode};
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cell {
        id: u64,
        value: String,
    }

    impl Record for Cell {
        const TABLE: &'static str = "cells";

        fn key(&self) -> RecordKey {
            RecordKey::new(self.id)
        }
    }

    fn cell(id: u64, value: &str) -> Cell {
        Cell {
            id,
            value: value.to_string(),
        }
    }

    fn setup() -> (TempDir, TransactionManager) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, TransactionManager::new(repo))
    }

    fn write<F, T>(manager: &TransactionManager, f: F) -> TransactionResult<T>
    where
        F: FnOnce(&mut Table<'_, Cell>) -> TransactionResult<T>,
    {
        manager.with_transaction(TransactionMode::ReadWrite, &[Cell::table_name()], |tx| {
            f(&mut tx.table::<Cell>())
        })
    }

    #[test]
    fn test_put_get_and_to_vec() {
        let (_dir, manager) = setup();
        write(&manager, |cells| {
            cells.put(&cell(2, "b"))?;
            cells.put(&cell(0, "a"))?;
            Ok(())
        })
        .unwrap();

        let all = write(&manager, |cells| cells.to_vec()).unwrap();
        assert_eq!(all, vec![cell(0, "a"), cell(2, "b")]);

        let got = write(&manager, |cells| cells.bulk_get(&[RecordKey::new(2), RecordKey::new(1)])).unwrap();
        assert_eq!(got, vec![Some(cell(2, "b")), None]);
    }

    #[test]
    fn test_add_is_strict() {
        let (_dir, manager) = setup();
        write(&manager, |cells| cells.add(&cell(0, "a"))).unwrap();

        let result = write(&manager, |cells| cells.bulk_add(&[cell(1, "b"), cell(0, "dup")]));
        assert!(matches!(result, Err(TransactionError::KeyConflict { .. })));

        // the failed transaction left nothing behind
        assert_eq!(write(&manager, |cells| cells.count()).unwrap(), 1);
    }

    #[test]
    fn test_next_key_and_bulk_delete() {
        let (_dir, manager) = setup();
        assert_eq!(write(&manager, |cells| cells.next_key()).unwrap(), RecordKey::new(0));

        write(&manager, |cells| cells.bulk_put(&[cell(0, "a"), cell(1, "b"), cell(4, "e")])).unwrap();
        assert_eq!(write(&manager, |cells| cells.next_key()).unwrap(), RecordKey::new(5));

        let deleted = write(&manager, |cells| {
            cells.bulk_delete(&[RecordKey::new(1), RecordKey::new(4), RecordKey::new(9)])
        })
        .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(write(&manager, |cells| cells.to_vec()).unwrap(), vec![cell(0, "a")]);
    }

    #[test]
    fn test_modify_visits_every_record() {
        let (_dir, manager) = setup();
        write(&manager, |cells| cells.bulk_put(&[cell(0, "a"), cell(1, "b")])).unwrap();

        let visited = write(&manager, |cells| cells.modify(|c| c.value.push('!'))).unwrap();
        assert_eq!(visited, 2);
        assert_eq!(
            write(&manager, |cells| cells.to_vec()).unwrap(),
            vec![cell(0, "a!"), cell(1, "b!")]
        );
    }

    #[test]
    fn test_modify_on_empty_table() {
        let (_dir, manager) = setup();
        assert_eq!(write(&manager, |cells| cells.modify(|_| {})).unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let (_dir, manager) = setup();
        write(&manager, |cells| cells.bulk_put(&[cell(0, "a"), cell(1, "b")])).unwrap();
        write(&manager, |cells| cells.clear()).unwrap();
        assert_eq!(write(&manager, |cells| cells.count()).unwrap(), 0);
    }
}
