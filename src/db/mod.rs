//! The dataset handle.
//!
//! Opens a dataset directory and wires the Git store, the transaction
//! manager and both repositories together.

mod api;

pub use api::{Database, DatabaseConfig, DatabaseError, DatabaseResult, DatabaseStats, HistoryEntry};
