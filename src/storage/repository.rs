//! The dataset repository handle.
//!
//! Reads take a commit id and never look at refs, so a transaction keeps
//! reading the snapshot it started from. Writes build a commit off to the
//! side and only become visible through `advance_main`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::storage::blob::{self, Document};
use crate::storage::changes::ChangeSet;
use crate::storage::commit::{self, CommitInfo, CommitWriter};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::tree::{TreeHandle, TreeMutator};
use crate::storage::types::{BranchName, CommitId, GitSignature, RecordKey, TableName};

/// Shared handle to one dataset repository. Cheap to clone.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    /// git2 repositories are Send but not Sync, so access is exclusive
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: RwLock<GitSignature>,
}

impl GitRepository {
    fn from_parts(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature: RwLock::new(GitSignature::sheetdb()),
            }),
        }
    }

    /// Open an existing dataset. Fails with `NotInitialized` if there is no repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        debug!(path = %path.display(), "opened dataset repository");
        Ok(Self::from_parts(repo, path))
    }

    /// Create a repository whose main holds one empty commit.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;
        let storage = Self::from_parts(repo, path);

        storage.with_repo(|repo| {
            let signature = storage.signature();
            let commit_id = commit::create_initial_commit(repo, &signature)?;
            RefManager::init_main_branch(repo, commit_id)?;
            Ok(())
        })?;

        info!(path = %path.display(), "initialized dataset repository");
        Ok(storage)
    }

    /// `open` if `path/.git` exists, `init` otherwise.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Replace the signature used for later commits.
    pub fn with_signature(self, signature: GitSignature) -> Self {
        *self.inner.signature.write() = signature;
        self
    }

    pub fn signature(&self) -> GitSignature {
        self.inner.signature.read().clone()
    }

    /// Run `f` while holding the repository lock.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// Current tip of main.
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(RefManager::head_commit)
    }

    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    /// Commits reachable from `from`, newest first.
    pub fn history(&self, from: CommitId, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| commit::history(repo, from, limit))
    }

    /// Tables whose records differ between two commits.
    pub fn changed_tables(&self, old: CommitId, new: CommitId) -> StorageResult<BTreeSet<TableName>> {
        self.with_repo(|repo| commit::changed_tables(repo, old, new))
    }

    // records

    /// Non-empty tables at a commit.
    pub fn list_tables(&self, at: CommitId) -> StorageResult<Vec<TableName>> {
        self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, at)?.list_tables()))
    }

    /// Keys of a table at a commit, ascending.
    pub fn list_keys(&self, table: &TableName, at: CommitId) -> StorageResult<Vec<RecordKey>> {
        self.with_repo(|repo| commit::get_tree_at_commit(repo, at)?.list_keys(repo, table))
    }

    /// One record, or None if the key is absent at `at`.
    pub fn read_document(
        &self,
        table: &TableName,
        key: RecordKey,
        at: CommitId,
    ) -> StorageResult<Option<Document>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            read_from_tree(repo, &tree, table, key)
        })
    }

    /// Read every record of a table whose key passes `filter`, ascending by key.
    ///
    /// Keys are filtered before their blobs are read.
    pub fn scan_where<F>(&self, table: &TableName, at: CommitId, filter: F) -> StorageResult<Vec<Document>>
    where
        F: Fn(RecordKey) -> bool,
    {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let keys = tree.list_keys(repo, table)?;

            let mut docs = Vec::with_capacity(keys.len());
            for key in keys.into_iter().filter(|k| filter(*k)) {
                let doc = read_from_tree(repo, &tree, table, key)?.ok_or_else(|| {
                    StorageError::Internal(format!("record {}/{} listed but unreadable", table, key))
                })?;
                docs.push(doc);
            }
            Ok(docs)
        })
    }

    /// Every record of a table, loaded into memory.
    pub fn scan_table(&self, table: &TableName, at: CommitId) -> StorageResult<Vec<Document>> {
        self.scan_where(table, at, |_| true)
    }

    /// Write a change set as a new commit on top of `parent`.
    ///
    /// Does not move any branch; see `advance_main`.
    pub fn commit_changes(&self, parent: CommitId, changes: &ChangeSet, message: &str) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, parent)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            mutator.apply(changes)?;
            let new_tree_id = mutator.write()?;

            CommitWriter::new(repo, new_tree_id)
                .parent(parent)
                .message(message)
                .signature(self.signature())
                .write()
        })
    }

    /// Move main from `expected` to `target`.
    ///
    /// Fails with `ConcurrentModification` if main no longer points at `expected`.
    pub fn advance_main(&self, expected: CommitId, target: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| {
            RefManager::compare_and_swap(repo, &BranchName::main(), expected, target)
        })
    }

    pub fn count_records(&self, table: &TableName, at: CommitId) -> StorageResult<usize> {
        Ok(self.list_keys(table, at)?.len())
    }

    /// Table and record counts at a commit.
    pub fn stats(&self, at: CommitId) -> StorageResult<RepositoryStats> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let tables = tree.list_tables();
            let mut total_records = 0;

            for table in &tables {
                total_records += tree.list_keys(repo, table)?.len();
            }

            Ok(RepositoryStats {
                table_count: tables.len(),
                total_records,
                head: at,
            })
        })
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .finish()
    }
}

fn read_from_tree<'repo>(
    repo: &'repo Repository,
    tree: &TreeHandle<'repo>,
    table: &TableName,
    key: RecordKey,
) -> StorageResult<Option<Document>> {
    let Some(blob_id) = tree.get_blob_id(repo, table, key)? else {
        return Ok(None);
    };

    let bytes = blob::read_blob(repo, blob_id)?;
    blob::deserialize_document(&bytes, key).map(Some)
}

/// Counts reported by `GitRepository::stats`.
#[derive(Debug, Clone)]
pub struct RepositoryStats {
    pub table_count: usize,
    pub total_records: usize,
    pub head: CommitId,
}

impl std::fmt::Display for RepositoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} table(s), {} record(s) at {}",
            self.table_count,
            self.total_records,
            self.head.short()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn doc(key: u64, value: i64) -> Document {
        Document::from_value(RecordKey::new(key), json!({ "value": value })).unwrap()
    }

    #[test]
    fn test_init_and_open() {
        let dir = TempDir::new().unwrap();

        let repo = GitRepository::init(dir.path()).unwrap();
        let head1 = repo.head().unwrap();

        drop(repo);
        let repo = GitRepository::open_or_init(dir.path()).unwrap();
        let head2 = repo.head().unwrap();

        assert_eq!(head1, head2);
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = TempDir::new().unwrap();
        let result = GitRepository::open(dir.path().join("absent"));
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn test_commit_and_read_records() {
        let (_dir, repo) = setup();
        let head = repo.head().unwrap();
        let table = TableName::new("rows").unwrap();

        let mut changes = ChangeSet::new();
        for key in [0, 1, 2, 10] {
            changes.table_mut(&table).put(doc(key, key as i64 * 10));
        }
        let next = repo.commit_changes(head, &changes, "seed").unwrap();
        repo.advance_main(head, next).unwrap();

        let main = repo.head().unwrap();
        assert_eq!(main, next);
        assert_eq!(repo.count_records(&table, main).unwrap(), 4);

        let read = repo.read_document(&table, RecordKey::new(10), main).unwrap().unwrap();
        assert_eq!(read.get("value"), Some(&json!(100)));
        assert!(repo.read_document(&table, RecordKey::new(3), main).unwrap().is_none());

        let above_one: Vec<u64> = repo
            .scan_where(&table, main, |k| k.get() > 1)
            .unwrap()
            .into_iter()
            .map(|d| d.key.get())
            .collect();
        assert_eq!(above_one, vec![2, 10]);

        // the old snapshot is untouched
        assert!(repo.scan_table(&table, head).unwrap().is_empty());
    }

    #[test]
    fn test_advance_main_detects_stale_base() {
        let (_dir, repo) = setup();
        let head = repo.head().unwrap();
        let table = TableName::new("rows").unwrap();

        let mut changes = ChangeSet::new();
        changes.table_mut(&table).put(Document::new(RecordKey::new(0), Map::new()));
        let first = repo.commit_changes(head, &changes, "first").unwrap();
        let second = repo.commit_changes(head, &changes, "second").unwrap();

        repo.advance_main(head, first).unwrap();
        let result = repo.advance_main(head, second);
        assert!(matches!(result, Err(StorageError::ConcurrentModification { .. })));
    }

    #[test]
    fn test_history_and_stats() {
        let (_dir, repo) = setup();
        let head = repo.head().unwrap();
        let table = TableName::new("rows").unwrap();

        let stats = repo.stats(head).unwrap();
        assert_eq!(stats.table_count, 0);
        assert_eq!(stats.total_records, 0);

        let mut changes = ChangeSet::new();
        changes.table_mut(&table).put(doc(0, 1));
        let next = repo.commit_changes(head, &changes, "add row").unwrap();
        repo.advance_main(head, next).unwrap();

        let stats = repo.stats(next).unwrap();
        assert_eq!(stats.table_count, 1);
        assert_eq!(stats.total_records, 1);

        let history = repo.history(next, Some(10)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].summary(), "add row");

        let changed = repo.changed_tables(head, next).unwrap();
        assert!(changed.contains(&table));
    }

    #[test]
    fn test_custom_signature() {
        let (_dir, repo) = setup();
        let repo = repo.with_signature(GitSignature::new("Analyst", "analyst@example.com"));
        let head = repo.head().unwrap();

        let mut changes = ChangeSet::new();
        changes
            .table_mut(&TableName::new("rows").unwrap())
            .put(doc(0, 1));
        let next = repo.commit_changes(head, &changes, "signed").unwrap();

        assert_eq!(repo.get_commit(next).unwrap().author_name, "Analyst");
    }

    #[test]
    fn test_debug_shows_path() {
        let (dir, repo) = setup();
        let shown = format!("{:?}", repo);
        assert!(shown.starts_with("GitRepository"));
        assert!(shown.contains(&format!("{:?}", dir.path())));
    }
}
