//! Root and table trees.
//!
//! The root tree of a commit has one subtree per table, and each table
//! subtree holds `{key}.json` blobs. Tables with no records are not kept.

use std::collections::BTreeMap;
use std::path::PathBuf;

use git2::{FileMode, ObjectType, Repository, Tree, TreeBuilder, TreeEntry};

use crate::storage::blob;
use crate::storage::changes::ChangeSet;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RecordKey, RecordPath, TableName, TreeId};

/// Read-only view of a root tree. Later commits do not affect it.
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

fn expect_kind(entry: &TreeEntry<'_>, kind: ObjectType, path: impl Into<PathBuf>) -> StorageResult<()> {
    if entry.kind() == Some(kind) {
        return Ok(());
    }
    Err(StorageError::UnexpectedEntryType {
        path: path.into(),
        expected: kind.to_string(),
        found: entry.kind().map_or_else(|| "unknown".to_string(), |k| k.to_string()),
    })
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    /// Table directories, skipping `_`-prefixed bookkeeping entries.
    pub fn list_tables(&self) -> Vec<TableName> {
        self.tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| entry.name().map(str::to_owned))
            .filter(|name| !name.starts_with('_'))
            .filter_map(|name| TableName::new(name).ok())
            .collect()
    }

    pub fn table_exists(&self, table: &TableName) -> bool {
        self.tree
            .get_name(table.as_str())
            .is_some_and(|entry| entry.kind() == Some(ObjectType::Tree))
    }

    fn table_tree(&self, repo: &'repo Repository, table: &TableName) -> StorageResult<Option<Tree<'repo>>> {
        let Some(entry) = self.tree.get_name(table.as_str()) else {
            return Ok(None);
        };
        expect_kind(&entry, ObjectType::Tree, table.as_str())?;
        Ok(Some(repo.find_tree(entry.id())?))
    }

    /// Keys of every record in `table`, ascending. A missing table is empty.
    pub fn list_keys(&self, repo: &'repo Repository, table: &TableName) -> StorageResult<Vec<RecordKey>> {
        let Some(tree) = self.table_tree(repo, table)? else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<RecordKey> = tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .filter_map(|entry| entry.name().and_then(RecordKey::from_file_name))
            .collect();
        // git sorts by name, so "10.json" comes before "2.json"
        keys.sort_unstable();
        Ok(keys)
    }

    pub fn get_blob_id(
        &self,
        repo: &'repo Repository,
        table: &TableName,
        key: RecordKey,
    ) -> StorageResult<Option<BlobId>> {
        let Some(tree) = self.table_tree(repo, table)? else {
            return Ok(None);
        };
        let Some(entry) = tree.get_name(&key.file_name()) else {
            return Ok(None);
        };
        expect_kind(&entry, ObjectType::Blob, RecordPath::new(table.clone(), key).to_path_buf())?;
        Ok(Some(BlobId::new(entry.id())))
    }
}

/// Builds a new root tree from an existing one plus edits.
///
/// Table subtrees are only rebuilt once something in them changes.
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    base: Option<Tree<'repo>>,
    root: TreeBuilder<'repo>,
    tables: BTreeMap<TableName, TreeBuilder<'repo>>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'repo>) -> StorageResult<Self> {
        Ok(Self {
            repo,
            base: Some(tree.tree.clone()),
            root: repo.treebuilder(Some(&tree.tree))?,
            tables: BTreeMap::new(),
        })
    }

    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        Ok(Self {
            repo,
            base: None,
            root: repo.treebuilder(None)?,
            tables: BTreeMap::new(),
        })
    }

    fn table(&mut self, table: &TableName) -> StorageResult<&mut TreeBuilder<'repo>> {
        if !self.tables.contains_key(table) {
            let existing = match self.base.as_ref().and_then(|base| base.get_name(table.as_str())) {
                Some(entry) if entry.kind() == Some(ObjectType::Tree) => Some(self.repo.find_tree(entry.id())?),
                _ => None,
            };
            let builder = self.repo.treebuilder(existing.as_ref())?;
            self.tables.insert(table.clone(), builder);
        }
        self.tables
            .get_mut(table)
            .ok_or_else(|| StorageError::Internal(format!("no builder for table {}", table)))
    }

    pub fn clear_table(&mut self, table: &TableName) -> StorageResult<()> {
        let empty = self.repo.treebuilder(None)?;
        self.tables.insert(table.clone(), empty);
        Ok(())
    }

    pub fn upsert_record(&mut self, table: &TableName, key: RecordKey, blob_id: BlobId) -> StorageResult<()> {
        self.table(table)?
            .insert(key.file_name(), blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// Returns false if there was nothing to delete.
    pub fn delete_record(&mut self, table: &TableName, key: RecordKey) -> StorageResult<bool> {
        let name = key.file_name();
        let builder = self.table(table)?;
        if builder.get(name.as_str())?.is_none() {
            return Ok(false);
        }
        builder.remove(name.as_str())?;
        Ok(true)
    }

    /// Stage a whole change set. Clears go first, then writes; document blobs
    /// are written to the object database here.
    pub fn apply(&mut self, changes: &ChangeSet) -> StorageResult<()> {
        for (table, staged) in changes.iter() {
            if staged.cleared {
                self.clear_table(table)?;
            }
            for (key, write) in &staged.writes {
                match write {
                    Some(doc) => {
                        let blob_id = blob::write_blob(self.repo, doc)?;
                        self.upsert_record(table, *key, blob_id)?;
                    }
                    None => {
                        self.delete_record(table, *key)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn write(mut self) -> StorageResult<TreeId> {
        for (table, builder) in self.tables {
            let name = table.as_str();
            if builder.is_empty() {
                if self.root.get(name)?.is_some() {
                    self.root.remove(name)?;
                }
            } else {
                self.root.insert(name, builder.write()?, FileMode::Tree.into())?;
            }
        }
        Ok(TreeId::new(self.root.write()?))
    }
}

/// An empty root tree.
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    TreeMutator::empty(repo)?.write()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::blob::Document;
    use serde_json::Map;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn handle(repo: &Repository, tree_id: TreeId) -> TreeHandle<'_> {
        TreeHandle::new(repo.find_tree(tree_id.raw()).unwrap())
    }

    #[test]
    fn test_list_tables_empty() {
        let (_dir, repo) = setup_repo();
        let tree_id = create_initial_tree(&repo).unwrap();
        assert!(handle(&repo, tree_id).list_tables().is_empty());
    }

    #[test]
    fn test_upsert_creates_table_and_sorts_keys() {
        let (_dir, repo) = setup_repo();
        let tree_id = create_initial_tree(&repo).unwrap();
        let table = TableName::new("rows").unwrap();
        let blob_id = BlobId::new(repo.blob(b"{}").unwrap());

        let tree = handle(&repo, tree_id);
        let mut mutator = TreeMutator::from_tree(&repo, &tree).unwrap();
        for key in [10, 2, 1] {
            mutator.upsert_record(&table, RecordKey::new(key), blob_id).unwrap();
        }
        let tree_id = mutator.write().unwrap();

        let tree = handle(&repo, tree_id);
        assert!(tree.table_exists(&table));
        let keys = tree.list_keys(&repo, &table).unwrap();
        assert_eq!(keys, vec![RecordKey::new(1), RecordKey::new(2), RecordKey::new(10)]);
    }

    #[test]
    fn test_delete_missing_record_is_reported() {
        let (_dir, repo) = setup_repo();
        let tree_id = create_initial_tree(&repo).unwrap();
        let table = TableName::new("rows").unwrap();

        let tree = handle(&repo, tree_id);
        let mut mutator = TreeMutator::from_tree(&repo, &tree).unwrap();
        assert!(!mutator.delete_record(&table, RecordKey::new(5)).unwrap());
    }

    #[test]
    fn test_emptied_table_disappears() {
        let (_dir, repo) = setup_repo();
        let table = TableName::new("rows").unwrap();
        let blob_id = BlobId::new(repo.blob(b"{}").unwrap());

        let tree_id = create_initial_tree(&repo).unwrap();
        let tree = handle(&repo, tree_id);
        let mut mutator = TreeMutator::from_tree(&repo, &tree).unwrap();
        mutator.upsert_record(&table, RecordKey::new(0), blob_id).unwrap();
        let tree_id = mutator.write().unwrap();

        let tree = handle(&repo, tree_id);
        let mut mutator = TreeMutator::from_tree(&repo, &tree).unwrap();
        assert!(mutator.delete_record(&table, RecordKey::new(0)).unwrap());
        let tree_id = mutator.write().unwrap();

        let tree = handle(&repo, tree_id);
        assert!(!tree.table_exists(&table));
        assert!(tree.list_keys(&repo, &table).unwrap().is_empty());
    }

    #[test]
    fn test_apply_change_set_with_clear() {
        let (_dir, repo) = setup_repo();
        let table = TableName::new("rows").unwrap();

        let mut first = ChangeSet::new();
        for key in 0..3 {
            first.table_mut(&table).put(Document::new(RecordKey::new(key), Map::new()));
        }
        let tree_id = create_initial_tree(&repo).unwrap();
        let tree = handle(&repo, tree_id);
        let mut mutator = TreeMutator::from_tree(&repo, &tree).unwrap();
        mutator.apply(&first).unwrap();
        let tree_id = mutator.write().unwrap();

        let mut second = ChangeSet::new();
        second.table_mut(&table).clear();
        second.table_mut(&table).put(Document::new(RecordKey::new(7), Map::new()));
        let tree = handle(&repo, tree_id);
        let mut mutator = TreeMutator::from_tree(&repo, &tree).unwrap();
        mutator.apply(&second).unwrap();
        let tree_id = mutator.write().unwrap();

        let tree = handle(&repo, tree_id);
        assert_eq!(tree.list_keys(&repo, &table).unwrap(), vec![RecordKey::new(7)]);
    }
}
