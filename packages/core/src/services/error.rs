//! Service Layer Error Types
//!
//! The error taxonomy seen by callers of `TreeService`. Store and model errors
//! are folded into it at the service boundary.

use crate::db::StoreError;
use crate::models::{NodeKind, ValidationError};
use thiserror::Error;

/// Tree operation errors
#[derive(Error, Debug)]
pub enum TreeError {
    /// Node absent or owned by someone else
    #[error("{} not found: {id}", .kind.map_or("node", |k| k.as_str()))]
    NotFound { kind: Option<NodeKind>, id: String },

    /// Lifecycle operation not permitted from the node's current state
    #[error("Invalid state for {kind} '{id}': {reason}")]
    InvalidState {
        kind: NodeKind,
        id: String,
        reason: String,
    },

    /// Reorder request does not contain exactly the current children
    #[error("Order mismatch for collection '{collection_id}': {reason}")]
    OrderMismatch {
        collection_id: String,
        reason: String,
    },

    /// The operation would introduce a cycle
    #[error("Cyclic reference: {context}")]
    CyclicReference { context: String },

    /// Input failed validation
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A concurrent writer won the race; re-read and retry
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Durable store I/O failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The transaction exceeded its time bound and was abandoned uncommitted
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    TransactionTimeout { operation: String, timeout_ms: u64 },

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl TreeError {
    /// Create a not found error
    pub fn not_found(kind: NodeKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: Some(kind),
            id: id.into(),
        }
    }

    /// Create a not found error for a lookup that did not know the node kind
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: None,
            id: id.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(kind: NodeKind, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an order mismatch error
    pub fn order_mismatch(collection_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OrderMismatch {
            collection_id: collection_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a cyclic reference error
    pub fn cyclic_reference(context: impl Into<String>) -> Self {
        Self::CyclicReference {
            context: context.into(),
        }
    }

    /// Create a transaction conflict error
    pub fn transaction_conflict(msg: impl Into<String>) -> Self {
        Self::TransactionConflict(msg.into())
    }

    /// Create a store unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a transaction timeout error
    pub fn transaction_timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::TransactionTimeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Whether the caller may retry the same request after re-reading state
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TreeError::TransactionConflict(_) | TreeError::TransactionTimeout { .. }
        )
    }
}

impl From<StoreError> for TreeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => TreeError::TransactionConflict(err.to_string()),
            other => TreeError::StoreUnavailable(other.to_string()),
        }
    }
}
