//! Commits and history.
//!
//! Every committed transaction becomes one commit whose single parent is the
//! main head it was built on. Conflict detection only needs to know which
//! table directories differ between two commits, so diffs are reduced to
//! table names here.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::{create_initial_tree, TreeHandle};
use crate::storage::types::{CommitId, GitSignature, TableName, TreeId};

/// A commit as seen from the history API.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    fn read(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            author_name: author.name().unwrap_or_default().to_string(),
            author_email: author.email().unwrap_or_default().to_string(),
            timestamp,
        }
    }

    /// first line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Writes a commit object. No ref moves unless `update_ref` is set.
pub struct CommitWriter<'a> {
    repo: &'a Repository,
    tree: TreeId,
    parents: Vec<CommitId>,
    message: String,
    signature: GitSignature,
    update_ref: Option<&'static str>,
}

impl<'a> CommitWriter<'a> {
    pub fn new(repo: &'a Repository, tree: TreeId) -> Self {
        Self {
            repo,
            tree,
            parents: Vec::new(),
            message: String::new(),
            signature: GitSignature::sheetdb(),
            update_ref: None,
        }
    }

    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn update_ref(mut self, refname: &'static str) -> Self {
        self.update_ref = Some(refname);
        self
    }

    pub fn write(self) -> StorageResult<CommitId> {
        let tree = self.repo.find_tree(self.tree.raw())?;
        let sig = self.signature.to_git2_signature()?;

        let parents = self
            .parents
            .iter()
            .map(|id| find(self.repo, *id))
            .collect::<StorageResult<Vec<_>>>()?;
        let parents: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let oid = self
            .repo
            .commit(self.update_ref, &sig, &sig, &self.message, &tree, &parents)?;
        Ok(CommitId::new(oid))
    }
}

fn find(repo: &Repository, id: CommitId) -> StorageResult<git2::Commit<'_>> {
    repo.find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))
}

pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    find(repo, id).map(|commit| CommitInfo::read(&commit))
}

/// root tree of a commit
pub fn get_tree_at_commit(repo: &Repository, id: CommitId) -> StorageResult<TreeHandle<'_>> {
    Ok(TreeHandle::new(find(repo, id)?.tree()?))
}

/// The root commit of a fresh dataset: an empty tree, written through HEAD.
pub fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> StorageResult<CommitId> {
    CommitWriter::new(repo, create_initial_tree(repo)?)
        .message("[sheetdb] Initialize dataset")
        .signature(signature.clone())
        .update_ref("HEAD")
        .write()
}

/// Tables with at least one record added, removed or rewritten between two commits.
pub fn changed_tables(repo: &Repository, old: CommitId, new: CommitId) -> StorageResult<BTreeSet<TableName>> {
    if old == new {
        return Ok(BTreeSet::new());
    }

    let old_tree = find(repo, old)?.tree()?;
    let new_tree = find(repo, new)?.tree()?;
    let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;

    Ok(diff
        .deltas()
        .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()))
        .filter_map(table_of)
        .collect())
}

fn table_of(path: &Path) -> Option<TableName> {
    let first = path.components().next()?.as_os_str().to_str()?;
    TableName::new(first).ok()
}

/// Commits reachable from `start`, newest first.
pub fn history(repo: &Repository, start: CommitId, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
    let mut walk = repo.revwalk()?;
    walk.push(start.raw())?;
    walk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;

    walk.take(limit.unwrap_or(usize::MAX))
        .map(|oid| -> StorageResult<CommitInfo> {
            let commit = repo.find_commit(oid?)?;
            Ok(CommitInfo::read(&commit))
        })
        .collect()
}

pub struct CommitMessage;

impl CommitMessage {
    /// `[COMMIT] rows,variables (3 writes) tx:<id>`
    pub fn transaction(tx_id: &str, tables: &[&TableName], writes: usize) -> String {
        let tables = tables
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",");
        format!("[COMMIT] {} ({} writes) tx:{}", tables, writes, tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::blob::Document;
    use crate::storage::changes::ChangeSet;
    use crate::storage::tree::TreeMutator;
    use crate::storage::types::RecordKey;
    use serde_json::Map;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn commit_changes(repo: &Repository, parent: CommitId, changes: &ChangeSet) -> CommitId {
        let tree = get_tree_at_commit(repo, parent).unwrap();
        let mut mutator = TreeMutator::from_tree(repo, &tree).unwrap();
        mutator.apply(changes).unwrap();
        let tree_id = mutator.write().unwrap();
        CommitWriter::new(repo, tree_id)
            .parent(parent)
            .message("change")
            .write()
            .unwrap()
    }

    #[test]
    fn test_initial_commit() {
        let (_dir, repo) = setup_repo();
        let commit_id = create_initial_commit(&repo, &GitSignature::sheetdb()).unwrap();
        let info = get_commit(&repo, commit_id).unwrap();

        assert!(info.message.contains("Initialize"));
        assert!(info.parent_ids.is_empty());
        assert_eq!(info.author_name, "sheetdb");
    }

    #[test]
    fn test_history_newest_first() {
        let (_dir, repo) = setup_repo();
        let c1 = create_initial_commit(&repo, &GitSignature::sheetdb()).unwrap();
        let tree_id = create_initial_tree(&repo).unwrap();
        let c2 = CommitWriter::new(&repo, tree_id)
            .parent(c1)
            .message("Second\n\nbody")
            .write()
            .unwrap();

        let commits = history(&repo, c2, None).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].id, c2);
        assert_eq!(commits[0].summary(), "Second");
        assert_eq!(commits[0].parent_ids, vec![c1]);
        assert_eq!(commits[1].id, c1);

        assert_eq!(history(&repo, c2, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_commit() {
        let (_dir, repo) = setup_repo();
        let c1 = create_initial_commit(&repo, &GitSignature::sheetdb()).unwrap();
        let tree = get_commit(&repo, c1).unwrap().tree_id;
        let bogus = CommitId::new(tree.raw());

        assert!(matches!(get_commit(&repo, bogus), Err(StorageError::CommitNotFound(_))));
    }

    #[test]
    fn test_changed_tables() {
        let (_dir, repo) = setup_repo();
        let base = create_initial_commit(&repo, &GitSignature::sheetdb()).unwrap();
        let rows = TableName::new("rows").unwrap();

        let mut changes = ChangeSet::new();
        changes.table_mut(&rows).put(Document::new(RecordKey::new(0), Map::new()));
        let next = commit_changes(&repo, base, &changes);

        let tables = changed_tables(&repo, base, next).unwrap();
        assert_eq!(tables.into_iter().collect::<Vec<_>>(), vec![rows]);
        assert!(changed_tables(&repo, next, next).unwrap().is_empty());
    }

    #[test]
    fn test_commit_message() {
        let rows = TableName::new("rows").unwrap();
        let vars = TableName::new("variables").unwrap();
        assert_eq!(
            CommitMessage::transaction("tx001", &[&rows, &vars], 3),
            "[COMMIT] rows,variables (3 writes) tx:tx001"
        );
    }
}
