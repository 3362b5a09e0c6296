//! Records: typed values that know which table they live in.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::{Document, RecordKey, RecordPath, StorageError, TableName};
use crate::transaction::{TransactionError, TransactionResult};

/// A value stored one-per-blob in a table.
///
/// `TABLE` must be a valid table name; it is checked in debug builds the
/// first time the table is opened.
pub trait Record: Serialize + DeserializeOwned {
    /// Name of the table holding records of this type.
    const TABLE: &'static str;

    /// Primary key of this record.
    fn key(&self) -> RecordKey;

    /// Value of a named secondary index, if this record type has one.
    fn index_value(&self, _index: &str) -> Option<i64> {
        None
    }

    fn table_name() -> TableName {
        TableName::from_static(Self::TABLE)
    }
}

/// Convert a record to its stored form.
pub(crate) fn encode<R: Record>(record: &R) -> TransactionResult<Document> {
    let value = serde_json::to_value(record).map_err(|source| TransactionError::Codec {
        table: R::table_name(),
        source,
    })?;
    Ok(Document::from_value(record.key(), value)?)
}

/// Convert a stored document back to a record.
pub(crate) fn decode<R: Record>(doc: Document) -> TransactionResult<R> {
    let key = doc.key;
    let record: R = serde_json::from_value(doc.into_value()).map_err(|source| TransactionError::Codec {
        table: R::table_name(),
        source,
    })?;

    if record.key() != key {
        let path: PathBuf = RecordPath::new(R::table_name(), key).to_path_buf();
        return Err(StorageError::CorruptedData {
            path,
            reason: format!("record declares key {} but is stored under {}", record.key(), key),
        }
        .into());
    }
    Ok(record)
}
