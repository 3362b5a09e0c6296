//! The `main` branch.
//!
//! All committed state hangs off `refs/heads/main`. Moving it is a
//! compare-and-swap: a writer names the commit it expects main to be at,
//! and loses if main has moved since.

use git2::{ErrorCode, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId};

pub struct RefManager;

impl RefManager {
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        repo.find_reference(&branch.as_ref_path())
            .and_then(|reference| reference.peel_to_commit())
            .map(|commit| CommitId::new(commit.id()))
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))
    }

    /// Commit HEAD points at. `EmptyRepository` while HEAD is unborn.
    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Err(StorageError::EmptyRepository),
            Err(e) => return Err(e.into()),
        };
        Ok(CommitId::new(head.peel_to_commit()?.id()))
    }

    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    /// Point `branch` at `target` if it is still at `expected`.
    pub fn compare_and_swap(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        target: CommitId,
    ) -> StorageResult<()> {
        if Self::resolve_branch(repo, branch)? != expected {
            return Err(StorageError::ConcurrentModification {
                branch: branch.to_string(),
            });
        }

        let log = format!("advance {} {} -> {}", branch, expected.short(), target.short());
        match repo.reference_matching(&branch.as_ref_path(), target.raw(), true, expected.raw(), &log) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::Modified => Err(StorageError::ConcurrentModification {
                branch: branch.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Create main at `initial_commit` unless it exists, and attach HEAD to it.
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        let main = BranchName::main();
        if !Self::branch_exists(repo, &main) {
            let commit = repo.find_commit(initial_commit.raw())?;
            repo.branch(main.as_str(), &commit, false)?;
        }
        repo.set_head(&main.as_ref_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::create_initial_commit;
    use crate::storage::tree::create_initial_tree;
    use crate::storage::types::GitSignature;
    use tempfile::TempDir;

    fn setup_repo_with_commit() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let commit_id = create_initial_commit(&repo, &GitSignature::sheetdb()).unwrap();
        RefManager::init_main_branch(&repo, commit_id).unwrap();
        (dir, repo, commit_id)
    }

    fn child_commit(repo: &Repository, parent: CommitId) -> CommitId {
        let tree_id = create_initial_tree(repo).unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let parent = repo.find_commit(parent.raw()).unwrap();
        let oid = repo
            .commit(None, &sig, &sig, "child", &tree, &[&parent])
            .unwrap();
        CommitId::new(oid)
    }

    #[test]
    fn test_head_follows_main() {
        let (_dir, repo, first) = setup_repo_with_commit();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), first);

        let next = child_commit(&repo, first);
        RefManager::compare_and_swap(&repo, &BranchName::main(), first, next).unwrap();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), next);
    }

    #[test]
    fn test_stale_expectation_loses() {
        let (_dir, repo, commit1) = setup_repo_with_commit();
        let main = BranchName::main();
        let commit2 = child_commit(&repo, commit1);
        let commit3 = child_commit(&repo, commit1);

        RefManager::compare_and_swap(&repo, &main, commit1, commit2).unwrap();

        let result = RefManager::compare_and_swap(&repo, &main, commit1, commit3);
        assert!(matches!(result, Err(StorageError::ConcurrentModification { .. })));
        assert_eq!(RefManager::resolve_branch(&repo, &main).unwrap(), commit2);
    }

    #[test]
    fn test_init_main_is_idempotent() {
        let (_dir, repo, first) = setup_repo_with_commit();
        RefManager::init_main_branch(&repo, first).unwrap();
        assert_eq!(RefManager::resolve_branch(&repo, &BranchName::main()).unwrap(), first);
    }

    #[test]
    fn test_missing_branch() {
        let (_dir, repo, _) = setup_repo_with_commit();
        let branch = BranchName::new("nowhere").unwrap();
        assert!(!RefManager::branch_exists(&repo, &branch));
        assert!(matches!(
            RefManager::resolve_branch(&repo, &branch),
            Err(StorageError::RefNotFound(_))
        ));
    }
}
