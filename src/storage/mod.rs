//! Git object storage for sheetdb.
//!
//! A dataset is a Git repository whose `main` branch holds the committed
//! state. The root tree has one directory per table; each record is a
//! `{key}.json` blob inside it:
//!
//! ```text
//! main ──► commit ──► tree /
//!                      ├── rows/
//!                      │    ├── 0.json      {"_key":0,"id":0,"data":[...]}
//!                      │    └── 1.json
//!                      ├── variables/
//!                      └── value_labels/
//! ```
//!
//! Writers stage a [`ChangeSet`], turn it into a commit with
//! [`GitRepository::commit_changes`], then publish it with
//! [`GitRepository::advance_main`], which refuses to move `main` if
//! somebody else moved it first. Nothing above this module talks to git2.
//!
//! ```ignore
//! use sheetdb::storage::{ChangeSet, Document, GitRepository, RecordKey, TableName};
//!
//! let repo = GitRepository::open_or_init("./my_dataset")?;
//! let head = repo.head()?;
//!
//! let rows = TableName::new("rows")?;
//! let mut changes = ChangeSet::new();
//! changes.table_mut(&rows).put(Document::from_value(RecordKey::new(0), json!({"id": 0, "data": []}))?);
//!
//! let next = repo.commit_changes(head, &changes, "seed")?;
//! repo.advance_main(head, next)?;
//! ```

mod blob;
mod changes;
mod commit;
mod error;
mod refs;
mod repository;
mod tree;
mod types;

pub use blob::Document;
pub use changes::{ChangeSet, TableChanges};
pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use repository::{GitRepository, RepositoryStats};
pub use types::{
    BlobId, BranchName, CommitId, GitSignature, InvalidNameError, RecordKey,
    RecordPath, TableName, TreeId,
};
