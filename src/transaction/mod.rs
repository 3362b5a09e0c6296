//! Transaction management for sheetdb.
//!
//! A transaction reads the commit main pointed at when it began, overlaid with
//! its own staged writes. Committing writes every staged change as a single
//! commit on main; rolling back simply drops the staged changes.
//!
//! ```text
//! begin ──► Transaction<TxActive> ──┬─ commit ──► Transaction<TxCommitted>
//!  (base = main head)               │   main moved? tables overlap ──► Conflict
//!                                   │               otherwise rebase onto main
//!                                   └─ rollback ─► Transaction<TxAborted>
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sheetdb::transaction::{TransactionManager, TransactionMode};
//!
//! let manager = TransactionManager::new(repo);
//!
//! manager.with_transaction(TransactionMode::ReadWrite, &[rows], |tx| {
//!     tx.put(&rows, doc)?;
//!     Ok::<_, TransactionError>(())
//! })?;
//! ```

mod context;
mod error;
mod manager;
mod mode;

pub use context::{Transaction, TransactionMetadata, TxAborted, TxActive, TxCommitted};
pub use error::{TransactionError, TransactionResult};
pub use manager::TransactionManager;
pub use mode::TransactionMode;
