//! Stored rows of the data matrix.

use serde::{Deserialize, Serialize};

use crate::model::cell::CellValue;
use crate::storage::RecordKey;
use crate::store::Record;

/// One row of cell values. `id` is both the storage key and the row position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    pub id: u64,
    pub data: Vec<CellValue>,
}

impl RowRecord {
    pub fn new(id: u64, data: Vec<CellValue>) -> Self {
        Self { id, data }
    }
}

impl Record for RowRecord {
    const TABLE: &'static str = "rows";

    fn key(&self) -> RecordKey {
        RecordKey::new(self.id)
    }
}
