//! Node Data Structures
//!
//! This module defines the two concrete node kinds of the content tree,
//! [`Collection`] and [`Content`], plus the kind-erased [`Node`] wrapper used
//! by listing and lifecycle APIs.
//!
//! # Architecture
//!
//! - **Owned records**: every node belongs to exactly one owner; `owner_id` never changes
//! - **Explicit ordering**: a Collection holds the ordered id sequences of its children
//! - **Soft delete**: `is_trash` marks a node as trashed; only purge removes a record
//! - **Opaque payloads**: Content `data` and `thumbnail_ref` are never interpreted here
//!
//! # Examples
//!
//! ```rust
//! use folio_core::models::{Collection, Content};
//!
//! let root = Collection::new("user-1", "Algebra", None).unwrap();
//! let lesson = Content::new("user-1", "Linear equations", None, Some(root.id.clone())).unwrap();
//!
//! assert!(root.parent_id.is_none());
//! assert_eq!(lesson.parent_id.as_deref(), Some(root.id.as_str()));
//! assert_eq!(lesson.version, 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Default version value for serde deserialization (version 1)
fn default_version() -> i64 {
    1
}

/// Validation errors for node fields and patches
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid node ID format: {0}")]
    InvalidId(String),

    #[error("Field '{0}' is managed by the lifecycle engine and cannot be patched")]
    ProtectedField(String),

    #[error("Unknown field '{field}' for {kind} patch")]
    UnknownField { field: String, kind: NodeKind },

    #[error("Patch does not change any field")]
    EmptyPatch,

    #[error("Patch kind {patch} does not match node kind {node}")]
    PatchKindMismatch { patch: NodeKind, node: NodeKind },

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Content '{0}' cannot be its own prerequisite")]
    SelfPrerequisite(String),

    #[error("Node '{id}' is not a {expected} node")]
    WrongKind { id: String, expected: NodeKind },

    #[error("Idempotency key '{key}' was already used for '{operation}'")]
    IdempotencyKeyReused { key: String, operation: String },
}

/// The two concrete node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Collection,
    Content,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Collection => "collection",
            NodeKind::Content => "content",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state derived from `is_trash`
///
/// `Deleted` is terminal and never observed on a stored record: purge removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeState {
    Active,
    Trashed,
}

/// Trim and validate a node title
pub fn validate_title(title: &str) -> Result<String, ValidationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField("title".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Validate a caller-supplied node id (UUID string)
pub fn validate_node_id(id: &str) -> Result<(), ValidationError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidId(id.to_string()))
}

/// Organizational unit holding explicitly ordered children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub is_trash: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ordered child Collection ids (unique)
    #[serde(default)]
    pub child_collections: Vec<String>,
    /// Ordered child Content ids (unique)
    #[serde(default)]
    pub child_content: Vec<String>,
    #[serde(default)]
    pub thumbnail_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Store-managed revision used for optimistic concurrency (bumped on every commit)
    #[serde(default)]
    pub revision: u64,
}

impl Collection {
    /// Create a new, unattached Collection with a fresh UUID
    pub fn new(
        owner_id: impl Into<String>,
        title: &str,
        parent_id: Option<String>,
    ) -> Result<Self, ValidationError> {
        let title = validate_title(title)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            parent_id,
            title,
            is_trash: false,
            description: None,
            tags: Vec::new(),
            child_collections: Vec::new(),
            child_content: Vec::new(),
            thumbnail_ref: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        })
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn state(&self) -> NodeState {
        if self.is_trash {
            NodeState::Trashed
        } else {
            NodeState::Active
        }
    }

    /// Mark modified now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// An authored item; `data` is an opaque editor document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub id: String,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub is_trash: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Incremented by exactly one on every metadata/data update
    #[serde(default = "default_version")]
    pub version: i64,
    /// Content ids that must be completed before this one
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub thumbnail_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Content {
    /// Create a new, unattached Content item with an empty document
    pub fn new(
        owner_id: impl Into<String>,
        title: &str,
        thumbnail_ref: Option<String>,
        parent_id: Option<String>,
    ) -> Result<Self, ValidationError> {
        let title = validate_title(title)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            parent_id,
            title,
            is_trash: false,
            data: serde_json::json!({}),
            version: default_version(),
            prerequisites: Vec::new(),
            thumbnail_ref,
            created_at: now,
            last_modified_at: now,
            revision: 0,
        })
    }

    pub fn state(&self) -> NodeState {
        if self.is_trash {
            NodeState::Trashed
        } else {
            NodeState::Active
        }
    }

    pub fn touch(&mut self) {
        self.last_modified_at = Utc::now();
    }
}

/// Kind-erased node, tagged by `kind` when serialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Node {
    Collection(Collection),
    Content(Content),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Collection(c) => &c.id,
            Node::Content(c) => &c.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Collection(_) => NodeKind::Collection,
            Node::Content(_) => NodeKind::Content,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            Node::Collection(c) => &c.owner_id,
            Node::Content(c) => &c.owner_id,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Node::Collection(c) => c.parent_id.as_deref(),
            Node::Content(c) => c.parent_id.as_deref(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Node::Collection(c) => &c.title,
            Node::Content(c) => &c.title,
        }
    }

    pub fn is_trash(&self) -> bool {
        match self {
            Node::Collection(c) => c.is_trash,
            Node::Content(c) => c.is_trash,
        }
    }

    pub fn state(&self) -> NodeState {
        match self {
            Node::Collection(c) => c.state(),
            Node::Content(c) => c.state(),
        }
    }

    /// `updated_at` for Collections, `last_modified_at` for Content
    pub fn modified_at(&self) -> DateTime<Utc> {
        match self {
            Node::Collection(c) => c.updated_at,
            Node::Content(c) => c.last_modified_at,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Node::Collection(c) => Some(c),
            Node::Content(_) => None,
        }
    }

    pub fn as_content(&self) -> Option<&Content> {
        match self {
            Node::Content(c) => Some(c),
            Node::Collection(_) => None,
        }
    }
}

impl From<Collection> for Node {
    fn from(collection: Collection) -> Self {
        Node::Collection(collection)
    }
}

impl From<Content> for Node {
    fn from(content: Content) -> Self {
        Node::Content(content)
    }
}
