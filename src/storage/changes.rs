//! Staged record changes waiting to be written as one commit.

use std::collections::BTreeMap;

use crate::storage::blob::Document;
use crate::storage::types::{RecordKey, TableName};

/// pending writes against a single table
///
/// `writes` maps a key to its new document, or to `None` for a delete.
/// When `cleared` is set the table's committed content is dropped before
/// `writes` are applied.
#[derive(Debug, Clone, Default)]
pub struct TableChanges {
    pub cleared: bool,
    pub writes: BTreeMap<RecordKey, Option<Document>>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.writes.is_empty()
    }

    pub fn put(&mut self, doc: Document) {
        self.writes.insert(doc.key, Some(doc));
    }

    pub fn delete(&mut self, key: RecordKey) {
        self.writes.insert(key, None);
    }

    pub fn clear(&mut self) {
        self.cleared = true;
        self.writes.clear();
    }

    /// what this change set says about `key`
    ///
    /// `Some(Some(doc))` when staged as written, `Some(None)` when staged as
    /// deleted or hidden by a clear, `None` when the committed state applies.
    pub fn lookup(&self, key: RecordKey) -> Option<Option<&Document>> {
        match self.writes.get(&key) {
            Some(staged) => Some(staged.as_ref()),
            None if self.cleared => Some(None),
            None => None,
        }
    }
}

/// all pending writes of a transaction, grouped by table
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    tables: BTreeMap<TableName, TableChanges>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableChanges::is_empty)
    }

    pub fn table(&self, table: &TableName) -> Option<&TableChanges> {
        self.tables.get(table)
    }

    pub fn table_mut(&mut self, table: &TableName) -> &mut TableChanges {
        self.tables.entry(table.clone()).or_default()
    }

    /// tables with at least one pending write
    pub fn written_tables(&self) -> Vec<&TableName> {
        self.tables
            .iter()
            .filter(|(_, changes)| !changes.is_empty())
            .map(|(table, _)| table)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TableName, &TableChanges)> {
        self.tables.iter().filter(|(_, changes)| !changes.is_empty())
    }

    /// number of staged record writes and deletes
    pub fn write_count(&self) -> usize {
        self.tables.values().map(|changes| changes.writes.len()).sum()
    }
}
