//! Typed names and ids used by the storage layer.

use std::fmt;
use std::path::PathBuf;

use git2::Oid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Newtype over a git `Oid`, one per object kind.
macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) Oid);

        impl $name {
            pub(crate) fn new(oid: Oid) -> Self {
                Self(oid)
            }

            pub(crate) fn raw(&self) -> Oid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(
    /// id of a commit on main
    CommitId
);
object_id!(
    /// id of a stored record blob
    BlobId
);
object_id!(
    /// id of a root or table tree
    TreeId
);

impl CommitId {
    /// first seven hex digits, as shown in logs and history
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

/// Name of a table directory in the root tree.
///
/// ASCII letters, digits, `_` and `-`, at most 64 bytes, not starting with a
/// digit or `-`. A few underscore names are kept back for bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

const RESERVED_TABLES: [&str; 3] = ["_meta", "_system", "_git"];
const MAX_TABLE_NAME: usize = 64;

impl TableName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        check_table_name(&name)?;
        Ok(Self(name))
    }

    /// Names declared by record types. Only checked in debug builds.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(check_table_name(name).is_ok(), "invalid table name: {name}");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check_table_name(name: &str) -> Result<(), InvalidNameError> {
    let first = name.chars().next().ok_or(InvalidNameError::Empty)?;
    if name.len() > MAX_TABLE_NAME {
        return Err(InvalidNameError::TooLong(name.len()));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(InvalidNameError::InvalidStart(first));
    }
    if let Some((position, char)) = name
        .chars()
        .enumerate()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(InvalidNameError::InvalidCharacter { char, position });
    }
    if RESERVED_TABLES.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(InvalidNameError::Reserved(name.to_string()));
    }
    Ok(())
}

impl TryFrom<String> for TableName {
    type Error = InvalidNameError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<TableName> for String {
    fn from(name: TableName) -> Self {
        name.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Integer primary key of a stored record, and the stem of its blob file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(u64);

impl RecordKey {
    pub const fn new(key: u64) -> Self {
        Self(key)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.0)
    }

    /// Inverse of `file_name`. Anything but canonical decimal is not a record.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let digits = name.strip_suffix(".json")?;
        let canonical = !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && (digits == "0" || !digits.starts_with('0'));
        if !canonical {
            return None;
        }
        digits.parse().ok().map(Self)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordKey {
    fn from(key: u64) -> Self {
        Self(key)
    }
}

/// `{table}/{key}.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPath {
    pub table: TableName,
    pub key: RecordKey,
}

impl RecordPath {
    pub fn new(table: TableName, key: RecordKey) -> Self {
        Self { table, key }
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.table.as_str()).join(self.key.file_name())
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.key.file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    /// the only branch sheetdb commits to
    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author and committer written into every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn sheetdb() -> Self {
        Self::new("sheetdb", "sheetdb@localhost")
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::sheetdb()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name too long: {0} bytes")]
    TooLong(usize),
    #[error("name cannot start with '{0}'")]
    InvalidStart(char),
    #[error("invalid character '{char}' at position {position}")]
    InvalidCharacter { char: char, position: usize },
    #[error("'{0}' is a reserved name")]
    Reserved(String),
    #[error("invalid ref path: '{0}'")]
    InvalidPath(String),
}
