//! Row and variable repositories.
//!
//! Both keep a dense zero-based index across structural edits: row position
//! for the data matrix, `columnIndex` for variables. Every public method runs
//! as a single transaction and returns once it is committed.

mod dense;
mod error;
mod rows;
mod variables;

pub use dense::{dense_rows, densify};
pub use error::{RepositoryError, RepositoryResult};
pub use rows::{CellRef, CellUpdate, FindOptions, Row, RowRepository, SortDirection};
pub use variables::VariableRepository;

use tracing::error;

use crate::storage::TableName;
use crate::transaction::{Transaction, TransactionManager, TransactionMode, TxActive};
use error::Failure;

/// Run `f` in one transaction, annotating and logging any failure with the
/// operation name and `context`.
pub(crate) fn transact<T, F>(
    manager: &TransactionManager,
    mode: TransactionMode,
    tables: &[TableName],
    op: &'static str,
    context: String,
    f: F,
) -> RepositoryResult<T>
where
    F: FnOnce(&mut Transaction<TxActive>) -> Result<T, Failure>,
{
    manager.with_transaction(mode, tables, f).map_err(|failure| {
        let err = failure.annotate(op, context);
        error!(op, error = %err, "repository operation failed");
        err
    })
}

/// Convert a position into a query bound.
pub(crate) fn bound(position: u64) -> i64 {
    i64::try_from(position).unwrap_or(i64::MAX)
}
