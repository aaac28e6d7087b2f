//! Store Error Types
//!
//! Errors raised by `NodeStore` backends. The service layer maps them onto
//! its own taxonomy: `Conflict` becomes a retryable transaction conflict,
//! everything else means the durable store is unavailable.

use crate::models::NodeKind;
use std::path::PathBuf;
use thiserror::Error;

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// A revision precondition failed: another writer committed first
    #[error("Write conflict on {kind} '{id}': {reason}")]
    Conflict {
        kind: NodeKind,
        id: String,
        reason: String,
    },

    /// Failed to open the database file
    #[error("Failed to open database at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// Backend I/O or query failure
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// libsql operation error
    #[cfg(feature = "turso")]
    #[error("Database operation failed: {0}")]
    Libsql(#[source] libsql::Error),
}

impl StoreError {
    /// Create a conflict error
    pub fn conflict(kind: NodeKind, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an open failed error
    pub fn open_failed(path: PathBuf, reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            path,
            reason: reason.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_error_message() {
        let err = StoreError::conflict(NodeKind::Collection, "c-1", "revision 3 != 4");
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Write conflict on collection 'c-1': revision 3 != 4"
        );
    }

    #[test]
    fn test_unavailable_error_message() {
        let err = StoreError::unavailable("disk full");
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "Store unavailable: disk full");
    }
}
