//! Typed tables over transactions.
//!
//! A [`Record`] names its table and key; [`Table`] stages typed reads and
//! writes in an active transaction, and [`WhereClause`] answers range queries
//! on the key or on a record's secondary indexes.
//!
//! ```ignore
//! manager.with_transaction(TransactionMode::ReadWrite, &[RowRecord::table_name()], |tx| {
//!     let mut rows = tx.table::<RowRecord>();
//!     for row in rows.where_key().above(3)? {
//!         rows.delete(row.key())?;
//!     }
//!     Ok::<_, TransactionError>(())
//! })?;
//! ```

mod query;
mod record;
mod table;

pub use query::{Field, WhereClause};
pub use record::Record;
pub use table::Table;
