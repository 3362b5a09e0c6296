//! Transaction access modes.
//!
//! sheetdb supports two modes:
//! - ReadOnly: reads a snapshot of main, any write is rejected
//! - ReadWrite: reads a snapshot overlaid with its own staged writes

use std::fmt;

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Snapshot reads only.
    ///
    /// Never produces a commit, so it cannot conflict with anything.
    ReadOnly,

    /// Snapshot reads plus staged writes, committed atomically.
    #[default]
    ReadWrite,
}

impl TransactionMode {
    /// Check if this mode allows staging writes.
    pub fn allows_writes(&self) -> bool {
        matches!(self, TransactionMode::ReadWrite)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "readonly"),
            TransactionMode::ReadWrite => write!(f, "readwrite"),
        }
    }
}

impl std::str::FromStr for TransactionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "r" | "readonly" | "read_only" | "read-only" => Ok(TransactionMode::ReadOnly),
            "rw" | "readwrite" | "read_write" | "read-write" => Ok(TransactionMode::ReadWrite),
            _ => Err(format!("unknown transaction mode: {}", s)),
        }
    }
}
