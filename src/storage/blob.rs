//! Blob operations for record storage.
//!
//! Each record is stored as a separate JSON file. The file carries a `_key`
//! metadata field next to the record's own fields so a blob can be checked
//! against the file name it was found under.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RecordKey};

/// a stored record: its key plus the JSON object body
///
/// The internal format stored in Git:
/// ```text
/// {
///   "_key": 3,
///   "id": 3,
///   "data": ["A", 1]
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: RecordKey,
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(key: RecordKey, body: Map<String, Value>) -> Self {
        Self { key, body }
    }

    /// create a document from a JSON value, which must be an object
    pub fn from_value(key: RecordKey, value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(body) => Ok(Self::new(key, body)),
            other => Err(StorageError::SchemaViolation(format!(
                "record {} must be a JSON object, got {}",
                key,
                kind_of(&other)
            ))),
        }
    }

    /// hand the body back as a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    /// get a field value by name
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// internal format for JSON serialization
///
/// uses a `_` prefix for metadata so it can't collide with record fields
#[derive(Serialize, Deserialize)]
struct DocumentJson {
    #[serde(rename = "_key")]
    key: u64,
    #[serde(flatten)]
    body: Map<String, Value>,
}

/// serialize a document to JSON bytes
pub fn serialize_document(doc: &Document) -> StorageResult<Vec<u8>> {
    let json = DocumentJson {
        key: doc.key.get(),
        body: doc.body.clone(),
    };
    Ok(serde_json::to_vec(&json)?)
}

/// deserialize a document from JSON bytes
///
/// validates that the key in the JSON matches the expected key
pub fn deserialize_document(bytes: &[u8], expected_key: RecordKey) -> StorageResult<Document> {
    let json: DocumentJson = serde_json::from_slice(bytes)?;

    if json.key != expected_key.get() {
        return Err(StorageError::CorruptedData {
            path: expected_key.file_name().into(),
            reason: format!(
                "key mismatch: file name suggests '{}' but content has '{}'",
                expected_key, json.key
            ),
        });
    }

    Ok(Document::new(expected_key, json.body))
}

/// write a document as a blob to the repository
///
/// returns the blob ID (SHA-1 hash of the content)
pub fn write_blob(repo: &git2::Repository, doc: &Document) -> StorageResult<BlobId> {
    let bytes = serialize_document(doc)?;
    let oid = repo.blob(&bytes)?;
    Ok(BlobId::new(oid))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}
