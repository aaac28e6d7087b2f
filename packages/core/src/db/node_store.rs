//! NodeStore Trait - Database Abstraction Layer
//!
//! This module defines the `NodeStore` trait that abstracts durable storage of
//! Collection and Content records. Business logic in the service layer only
//! talks to this trait, so the in-memory and libsql backends are interchangeable.
//!
//! # Architecture
//!
//! - **Owner-scoped reads**: every read takes an `owner_id`; a record owned by
//!   someone else is indistinguishable from a missing one
//! - **Single write entry point**: all writes go through [`NodeStore::commit`]
//!   with a [`WriteBatch`], applied all-or-nothing
//! - **Optimistic concurrency**: every mutation carries the revision the writer
//!   read; a mismatch fails the whole batch with `StoreError::Conflict`
//!
//! # Examples
//!
//! ```rust,no_run
//! use folio_core::db::{MemoryStore, NodeStore, WriteBatch};
//! use folio_core::models::Collection;
//!
//! # async fn example() -> Result<(), folio_core::db::StoreError> {
//! let store = MemoryStore::new();
//! let root = Collection::new("user-1", "Algebra", None).unwrap();
//!
//! let mut batch = WriteBatch::new();
//! batch.insert_collection(root.clone());
//! store.commit(batch).await?;
//!
//! let stored = store.get_collection("user-1", &root.id).await?.unwrap();
//! assert_eq!(stored.revision, 1);
//! # Ok(())
//! # }
//! ```

use super::error::StoreError;
use crate::models::{Collection, Content, NodeKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub type StoreResult<T> = Result<T, StoreError>;

/// Common accessors over the two stored record kinds
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync {
    const KIND: NodeKind;

    fn id(&self) -> &str;
    fn owner_id(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;
    fn is_trash(&self) -> bool;
    fn modified_at(&self) -> DateTime<Utc>;
    fn revision(&self) -> u64;
    fn set_revision(&mut self, revision: u64);
}

impl Record for Collection {
    const KIND: NodeKind = NodeKind::Collection;

    fn id(&self) -> &str {
        &self.id
    }
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }
    fn is_trash(&self) -> bool {
        self.is_trash
    }
    fn modified_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
    fn revision(&self) -> u64 {
        self.revision
    }
    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

impl Record for Content {
    const KIND: NodeKind = NodeKind::Content;

    fn id(&self) -> &str {
        &self.id
    }
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }
    fn is_trash(&self) -> bool {
        self.is_trash
    }
    fn modified_at(&self) -> DateTime<Utc> {
        self.last_modified_at
    }
    fn revision(&self) -> u64 {
        self.revision
    }
    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

/// Which parent a listing is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParentScope {
    /// Any parent, including root level
    #[default]
    Any,
    /// Root level only (`parent_id IS NULL`)
    Root,
    /// Direct children of the given collection
    Under(String),
}

impl ParentScope {
    pub fn from_parent(parent_id: Option<&str>) -> Self {
        match parent_id {
            Some(id) => ParentScope::Under(id.to_string()),
            None => ParentScope::Root,
        }
    }

    pub fn matches(&self, parent_id: Option<&str>) -> bool {
        match self {
            ParentScope::Any => true,
            ParentScope::Root => parent_id.is_none(),
            ParentScope::Under(id) => parent_id == Some(id.as_str()),
        }
    }
}

/// Trash-state filter for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashFilter {
    #[default]
    ActiveOnly,
    TrashedOnly,
    All,
}

impl TrashFilter {
    pub fn include_trash(include: bool) -> Self {
        if include {
            TrashFilter::All
        } else {
            TrashFilter::ActiveOnly
        }
    }

    pub fn matches(&self, is_trash: bool) -> bool {
        match self {
            TrashFilter::ActiveOnly => !is_trash,
            TrashFilter::TrashedOnly => is_trash,
            TrashFilter::All => true,
        }
    }
}

/// Listing query; all fields combine with AND
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFilter {
    pub owner_id: String,
    pub parent: ParentScope,
    pub trash: TrashFilter,
}

impl NodeFilter {
    /// Every record of the owner, trashed or not
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            parent: ParentScope::Any,
            trash: TrashFilter::All,
        }
    }

    pub fn with_parent(mut self, parent: ParentScope) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_trash(mut self, trash: TrashFilter) -> Self {
        self.trash = trash;
        self
    }

    pub fn matches<R: Record>(&self, record: &R) -> bool {
        record.owner_id() == self.owner_id
            && self.parent.matches(record.parent_id())
            && self.trash.matches(record.is_trash())
    }
}

/// One guarded write
///
/// `expected_revision` is the revision the writer read. `None` on a put
/// means the record must not exist yet (insert).
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    PutCollection {
        record: Collection,
        expected_revision: Option<u64>,
    },
    PutContent {
        record: Content,
        expected_revision: Option<u64>,
    },
    Delete {
        kind: NodeKind,
        owner_id: String,
        id: String,
        expected_revision: u64,
    },
    /// Read-set validation: the record must still be at this revision
    Assert {
        kind: NodeKind,
        owner_id: String,
        id: String,
        expected_revision: u64,
    },
}

impl Mutation {
    pub fn kind(&self) -> NodeKind {
        match self {
            Mutation::PutCollection { .. } => NodeKind::Collection,
            Mutation::PutContent { .. } => NodeKind::Content,
            Mutation::Delete { kind, .. } | Mutation::Assert { kind, .. } => *kind,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Mutation::PutCollection { record, .. } => &record.id,
            Mutation::PutContent { record, .. } => &record.id,
            Mutation::Delete { id, .. } | Mutation::Assert { id, .. } => id,
        }
    }

    /// Whether this mutation changes stored state
    pub fn is_write(&self) -> bool {
        !matches!(self, Mutation::Assert { .. })
    }
}

/// An atomic set of guarded mutations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn insert_collection(&mut self, record: Collection) {
        self.push(Mutation::PutCollection {
            expected_revision: None,
            record,
        });
    }

    pub fn insert_content(&mut self, record: Content) {
        self.push(Mutation::PutContent {
            expected_revision: None,
            record,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Number of mutations that change stored state
    pub fn write_count(&self) -> usize {
        self.mutations.iter().filter(|m| m.is_write()).count()
    }
}

/// Abstraction layer for node persistence
///
/// Implementations must be `Send + Sync` so a store can be shared behind an
/// `Arc` across tasks. Reads of a record owned by another user return `None`.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Get a collection owned by `owner_id`
    async fn get_collection(&self, owner_id: &str, id: &str) -> StoreResult<Option<Collection>>;

    /// Get a content item owned by `owner_id`
    async fn get_content(&self, owner_id: &str, id: &str) -> StoreResult<Option<Content>>;

    /// List collections matching `filter` (unordered)
    async fn list_collections(&self, filter: &NodeFilter) -> StoreResult<Vec<Collection>>;

    /// List content matching `filter` (unordered)
    async fn list_content(&self, filter: &NodeFilter) -> StoreResult<Vec<Content>>;

    /// Count non-trashed direct children of `parent_id` of one kind
    async fn count_children(
        &self,
        owner_id: &str,
        parent_id: &str,
        kind: NodeKind,
    ) -> StoreResult<u64>;

    /// Apply every mutation of `batch` atomically, or none of them
    ///
    /// Puts and deletes set the stored revision to `expected + 1` (1 on insert).
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}
