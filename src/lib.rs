//! sheetdb - A Git-backed store for tabular statistical datasets
//!
//! A dataset is a matrix of cells (rows) plus per-column metadata
//! (variables and their value labels). Every table is a directory, every
//! record a JSON blob, and every committed edit a single Git commit, so the
//! whole editing history is preserved in `.git/`.
//!
//! Row positions and variable column indexes stay dense and zero-based
//! across inserts, deletes and reorders.
//!
//! # Example
//!
//! ```no_run
//! use sheetdb::db::Database;
//! use sheetdb::model::CellValue;
//!
//! let db = Database::open("./my_dataset").unwrap();
//! db.rows().insert_row(0, vec![CellValue::from("A"), CellValue::from(1.0)]).unwrap();
//! db.rows().delete_row(0).unwrap();
//! ```

pub mod db;
pub mod model;
pub mod repository;
pub mod storage;
pub mod store;
pub mod transaction;
