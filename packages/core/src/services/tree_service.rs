//! TreeService - Operation Surface of the Content Tree
//!
//! Every public operation runs as one command:
//!
//! 1. Validate caller input (owner id, node ids)
//! 2. Claim the idempotency key, if the service is scoped to one
//! 3. Stage reads and writes on a fresh [`UnitOfWork`]
//! 4. Commit atomically under the configured transaction timeout
//! 5. Publish domain events, only after the commit succeeded
//!
//! A command that fails at any step leaves the store untouched.
//!
//! # Examples
//!
//! ```rust,no_run
//! use folio_core::models::NodeKind;
//! use folio_core::services::TreeService;
//!
//! # async fn example() -> Result<(), folio_core::services::TreeError> {
//! let service = TreeService::in_memory();
//! let root = service.create_collection("user-1", "Algebra", None, None).await?;
//! let lesson = service
//!     .create_content("user-1", "Linear equations", None, Some(&root.id))
//!     .await?;
//!
//! service.trash("user-1", &root.id, NodeKind::Collection).await?;
//! let trash = service.list_trash("user-1").await?;
//! assert_eq!(trash.len(), 2);
//! # let _ = lesson;
//! # Ok(())
//! # }
//! ```

use super::error::TreeError;
use super::idempotency::{Claim, IdempotencyCache};
use super::invariants::{audit, InvariantViolation};
use super::lifecycle::LifecycleEngine;
use super::ordering::OrderingManager;
use super::prerequisites::PrerequisiteGraphManager;
use super::query::TreeQuery;
use super::unit_of_work::UnitOfWork;
use crate::config::StoreConfig;
use crate::db::{DomainEvent, MemoryStore, NodeFilter, NodeStore, Record};
use crate::models::{
    validate_node_id, Collection, Content, Crumb, Node, NodeKind, NodePatch, OrderedCollection,
    PrerequisiteGraph, TreeView, ValidationError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// A committed command's value plus the events to publish for it
struct Outcome<T> {
    value: T,
    events: Vec<DomainEvent>,
}

impl<T> Outcome<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }

    fn with_event(mut self, event: DomainEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// A staged record as the store holds it after commit
///
/// Committed puts store `read revision + 1`, and inserts (revision 0) store 1.
fn committed<R: Record>(mut record: R) -> R {
    record.set_revision(record.revision() + 1);
    record
}

fn committed_node(node: Node) -> Node {
    match node {
        Node::Collection(collection) => Node::Collection(committed(collection)),
        Node::Content(content) => Node::Content(committed(content)),
    }
}

fn validate_owner(owner_id: &str) -> Result<(), TreeError> {
    if owner_id.trim().is_empty() {
        return Err(ValidationError::MissingField("ownerId".to_string()).into());
    }
    Ok(())
}

fn validate_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<(), TreeError> {
    for id in ids {
        validate_node_id(id)?;
    }
    Ok(())
}

/// Service for hierarchical content management
///
/// Cheap to clone: all state is behind `Arc`s. Clones share the store, the
/// idempotency cache and the event channel.
#[derive(Clone)]
pub struct TreeService {
    store: Arc<dyn NodeStore>,
    config: Arc<StoreConfig>,
    idempotency: Arc<IdempotencyCache>,

    /// Broadcast channel for domain events
    event_tx: broadcast::Sender<DomainEvent>,

    /// Optional client identifier for event source tracking
    ///
    /// When set, all emitted events carry it as `source_client_id`, so
    /// clients can filter out their own changes.
    client_id: Option<String>,

    /// Idempotency key applied to the next mutating calls of this clone
    idempotency_key: Option<String>,
}

impl TreeService {
    /// Create a service over `store`, validating `config`
    pub fn new(store: Arc<dyn NodeStore>, config: StoreConfig) -> Result<Self, TreeError> {
        config.validate().map_err(TreeError::invalid_configuration)?;
        Ok(Self::build(store, config))
    }

    fn build(store: Arc<dyn NodeStore>, config: StoreConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.idempotency_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        Self {
            store,
            config: Arc::new(config),
            idempotency: Arc::new(IdempotencyCache::new(capacity)),
            event_tx,
            client_id: None,
            idempotency_key: None,
        }
    }

    /// Service over a fresh in-memory store with default configuration
    pub fn in_memory() -> Self {
        Self::build(Arc::new(MemoryStore::new()), StoreConfig::default())
    }

    /// Open the backend selected by `config.database_path`
    pub async fn open(config: StoreConfig) -> Result<Self, TreeError> {
        config.validate().map_err(TreeError::invalid_configuration)?;

        let store: Arc<dyn NodeStore> = match &config.database_path {
            None => Arc::new(MemoryStore::new()),
            #[cfg(feature = "turso")]
            Some(path) => Arc::new(crate::db::TursoStore::new(path).await?),
            #[cfg(not(feature = "turso"))]
            Some(path) => {
                return Err(TreeError::invalid_configuration(format!(
                    "database_path {} requires the `turso` feature",
                    path.display()
                )))
            }
        };

        Ok(Self::build(store, config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Returns a clone whose events carry `client_id` as `source_client_id`
    pub fn with_client(&self, client_id: impl Into<String>) -> Self {
        let mut cloned = self.clone();
        cloned.client_id = Some(client_id.into());
        cloned
    }

    /// Returns a clone whose mutating calls are deduplicated by `key`
    ///
    /// A retry with the same owner, key and operation replays the first
    /// successful result without touching the store.
    pub fn with_idempotency_key(&self, key: impl Into<String>) -> Self {
        let mut cloned = self.clone();
        cloned.idempotency_key = Some(key.into());
        cloned
    }

    /// Subscribe to domain events
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: DomainEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    fn unit_of_work(&self, owner_id: &str) -> UnitOfWork {
        UnitOfWork::new(self.store.clone(), owner_id)
    }

    fn lifecycle(&self) -> LifecycleEngine {
        LifecycleEngine::new(self.config.max_tree_depth)
    }

    fn query(&self) -> TreeQuery {
        TreeQuery::new(self.config.max_tree_depth)
    }

    fn prerequisites(&self) -> PrerequisiteGraphManager {
        PrerequisiteGraphManager::new(self.config.check_prerequisite_cycles)
    }

    /// Run `work` under the transaction timeout
    async fn bounded<T>(
        &self,
        operation: &str,
        work: impl Future<Output = Result<T, TreeError>>,
    ) -> Result<T, TreeError> {
        match tokio::time::timeout(self.config.transaction_timeout(), work).await {
            Ok(result) => result,
            Err(_) => Err(TreeError::transaction_timeout(
                operation,
                self.config.transaction_timeout_ms,
            )),
        }
    }

    /// Run a mutating command: idempotency, timeout, then events
    async fn execute<T>(
        &self,
        owner_id: &str,
        operation: &str,
        work: impl Future<Output = Result<Outcome<T>, TreeError>>,
    ) -> Result<T, TreeError>
    where
        T: Serialize + DeserializeOwned,
    {
        // Released on drop, so a cancelled request leaves the key retryable
        let mut guard = None;
        if let Some(key) = self.idempotency_key.as_deref() {
            match self.idempotency.claim::<T>(owner_id, key, operation)? {
                Claim::Replay(value) => {
                    info!(owner_id, key, operation, "Replayed idempotent request");
                    return Ok(value);
                }
                Claim::Proceed => guard = Some(self.idempotency.guard(owner_id, key, operation)),
            }
        }

        match self.bounded(operation, work).await {
            Ok(outcome) => {
                if let Some(guard) = guard {
                    guard.complete(&outcome.value);
                }
                for event in outcome.events {
                    self.emit_event(event);
                }
                Ok(outcome.value)
            }
            Err(err) => {
                debug!(owner_id, operation, error = %err, "Command failed");
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Creation and metadata
    // ------------------------------------------------------------------

    /// Create a collection, attached to the end of `parent_id`'s collections
    pub async fn create_collection(
        &self,
        owner_id: &str,
        title: &str,
        description: Option<String>,
        parent_id: Option<&str>,
    ) -> Result<Collection, TreeError> {
        validate_owner(owner_id)?;
        validate_ids(parent_id)?;

        self.execute(owner_id, "create_collection", async {
            let mut uow = self.unit_of_work(owner_id);
            let collection = self
                .lifecycle()
                .create_collection(&mut uow, title, description, parent_id)
                .await?;
            uow.commit().await?;
            let collection = committed(collection);

            info!(
                owner_id,
                collection_id = %collection.id,
                parent_id = ?parent_id,
                "Created collection"
            );
            Ok(Outcome::new(collection.clone()).with_event(DomainEvent::NodeCreated {
                node: Node::Collection(collection),
                source_client_id: self.client_id.clone(),
            }))
        })
        .await
    }

    /// Create a content item with an empty document
    pub async fn create_content(
        &self,
        owner_id: &str,
        title: &str,
        thumbnail_ref: Option<String>,
        parent_id: Option<&str>,
    ) -> Result<Content, TreeError> {
        validate_owner(owner_id)?;
        validate_ids(parent_id)?;

        self.execute(owner_id, "create_content", async {
            let mut uow = self.unit_of_work(owner_id);
            let content = self
                .lifecycle()
                .create_content(&mut uow, title, thumbnail_ref, parent_id)
                .await?;
            uow.commit().await?;
            let content = committed(content);

            info!(owner_id, content_id = %content.id, parent_id = ?parent_id, "Created content");
            Ok(Outcome::new(content.clone()).with_event(DomainEvent::NodeCreated {
                node: Node::Content(content),
                source_client_id: self.client_id.clone(),
            }))
        })
        .await
    }

    /// Apply an allow-listed patch; content updates bump `version`
    pub async fn update_metadata(
        &self,
        owner_id: &str,
        id: &str,
        kind: NodeKind,
        patch: NodePatch,
    ) -> Result<Node, TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;

        self.execute(owner_id, "update_metadata", async {
            let mut uow = self.unit_of_work(owner_id);
            let node = self
                .lifecycle()
                .update_metadata(&mut uow, id, kind, patch)
                .await?;
            uow.commit().await?;
            let node = committed_node(node);

            info!(owner_id, node_id = %id, kind = %kind, "Updated metadata");
            Ok(Outcome::new(node.clone()).with_event(DomainEvent::NodeUpdated {
                node,
                source_client_id: self.client_id.clone(),
            }))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_collection(&self, owner_id: &str, id: &str) -> Result<Collection, TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;
        self.bounded("get_collection", async {
            self.unit_of_work(owner_id).collection(id).await
        })
        .await
    }

    pub async fn get_content(&self, owner_id: &str, id: &str) -> Result<Content, TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;
        self.bounded("get_content", async {
            self.unit_of_work(owner_id).content(id).await
        })
        .await
    }

    pub async fn get_node(
        &self,
        owner_id: &str,
        id: &str,
        kind: NodeKind,
    ) -> Result<Node, TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;
        self.bounded("get_node", async {
            self.unit_of_work(owner_id).node(id, kind).await
        })
        .await
    }

    /// Children-with-counts of `parent_id`, or of the root level
    pub async fn get_tree(
        &self,
        owner_id: &str,
        parent_id: Option<&str>,
    ) -> Result<TreeView, TreeError> {
        validate_owner(owner_id)?;
        validate_ids(parent_id)?;
        self.bounded("get_tree", async {
            let mut uow = self.unit_of_work(owner_id);
            self.query().get_tree(&mut uow, parent_id).await
        })
        .await
    }

    /// A collection with its children resolved in array order
    pub async fn get_collection_with_ordered_children(
        &self,
        owner_id: &str,
        id: &str,
        include_trash: bool,
    ) -> Result<OrderedCollection, TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;
        self.bounded("get_collection_with_ordered_children", async {
            let mut uow = self.unit_of_work(owner_id);
            self.query().ordered_children(&mut uow, id, include_trash).await
        })
        .await
    }

    /// Prerequisite graph of the live content directly inside a collection
    pub async fn get_prerequisite_graph(
        &self,
        owner_id: &str,
        collection_id: &str,
    ) -> Result<PrerequisiteGraph, TreeError> {
        validate_owner(owner_id)?;
        validate_ids([collection_id])?;
        self.bounded("get_prerequisite_graph", async {
            let mut uow = self.unit_of_work(owner_id);
            self.prerequisites().graph_for(&mut uow, collection_id).await
        })
        .await
    }

    /// Root-first trail ending with the node itself
    pub async fn breadcrumbs(
        &self,
        owner_id: &str,
        id: &str,
        kind: NodeKind,
    ) -> Result<Vec<Crumb>, TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;
        self.bounded("breadcrumbs", async {
            let mut uow = self.unit_of_work(owner_id);
            self.query().breadcrumbs(&mut uow, id, kind).await
        })
        .await
    }

    /// Every trashed node of the owner, most recently modified first
    pub async fn list_trash(&self, owner_id: &str) -> Result<Vec<Node>, TreeError> {
        validate_owner(owner_id)?;
        self.bounded("list_trash", async {
            let mut uow = self.unit_of_work(owner_id);
            self.query().list_trash(&mut uow).await
        })
        .await
    }

    /// Legacy timestamp-ordered listing by parent pointer
    pub async fn list_children(
        &self,
        owner_id: &str,
        parent_id: Option<&str>,
        kind: NodeKind,
        include_trash: bool,
    ) -> Result<Vec<Node>, TreeError> {
        validate_owner(owner_id)?;
        validate_ids(parent_id)?;
        self.bounded("list_children", async {
            let mut uow = self.unit_of_work(owner_id);
            self.query()
                .list_children(&mut uow, parent_id, kind, include_trash)
                .await
        })
        .await
    }

    // ------------------------------------------------------------------
    // Ordering and prerequisites
    // ------------------------------------------------------------------

    /// Replace both child orderings of a collection
    ///
    /// Fails with `OrderMismatch` unless each array holds exactly the current
    /// members.
    pub async fn set_order(
        &self,
        owner_id: &str,
        parent_id: &str,
        child_collections: Vec<String>,
        child_content: Vec<String>,
    ) -> Result<(), TreeError> {
        validate_owner(owner_id)?;
        validate_ids([parent_id])?;

        self.execute(owner_id, "set_order", async {
            let mut uow = self.unit_of_work(owner_id);
            let mut parent = uow.collection(parent_id).await?;
            let changed = OrderingManager::reorder(&mut parent, child_collections, child_content)?;

            let mut outcome = Outcome::new(());
            if changed {
                parent.touch();
                uow.put_collection(parent);
                outcome = outcome.with_event(DomainEvent::ChildrenReordered {
                    collection_id: parent_id.to_string(),
                    source_client_id: self.client_id.clone(),
                });
            }
            uow.commit().await?;

            info!(owner_id, collection_id = %parent_id, changed, "Set child order");
            Ok(outcome)
        })
        .await
    }

    /// Replace the prerequisites of a content item
    pub async fn set_prerequisites(
        &self,
        owner_id: &str,
        content_id: &str,
        prerequisite_ids: Vec<String>,
    ) -> Result<(), TreeError> {
        validate_owner(owner_id)?;
        validate_ids([content_id])?;
        validate_ids(prerequisite_ids.iter().map(String::as_str))?;

        self.execute(owner_id, "set_prerequisites", async {
            let mut uow = self.unit_of_work(owner_id);
            let prerequisites = self
                .prerequisites()
                .set_prerequisites(&mut uow, content_id, prerequisite_ids)
                .await?;
            uow.commit().await?;

            info!(owner_id, content_id, count = prerequisites.len(), "Set prerequisites");
            Ok(Outcome::new(()).with_event(DomainEvent::PrerequisitesChanged {
                content_id: content_id.to_string(),
                prerequisites,
                source_client_id: self.client_id.clone(),
            }))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Trash a node; for a collection the whole subtree, atomically
    pub async fn trash(&self, owner_id: &str, id: &str, kind: NodeKind) -> Result<(), TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;

        self.execute(owner_id, "trash", async {
            let mut uow = self.unit_of_work(owner_id);
            let ids = self.lifecycle().trash(&mut uow, id, kind).await?;
            uow.commit().await?;

            info!(owner_id, node_id = %id, kind = %kind, affected = ids.len(), "Trashed");
            Ok(Outcome::new(()).with_event(DomainEvent::NodesTrashed {
                root_id: id.to_string(),
                ids,
                source_client_id: self.client_id.clone(),
            }))
        })
        .await
    }

    /// Restore a trashed node; descendants stay trashed
    pub async fn restore(&self, owner_id: &str, id: &str, kind: NodeKind) -> Result<(), TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;

        self.execute(owner_id, "restore", async {
            let mut uow = self.unit_of_work(owner_id);
            self.lifecycle().restore(&mut uow, id, kind).await?;
            uow.commit().await?;

            info!(owner_id, node_id = %id, kind = %kind, "Restored");
            Ok(Outcome::new(()).with_event(DomainEvent::NodeRestored {
                id: id.to_string(),
                kind,
                source_client_id: self.client_id.clone(),
            }))
        })
        .await
    }

    /// Permanently delete a trashed node and its subtree
    pub async fn purge(&self, owner_id: &str, id: &str, kind: NodeKind) -> Result<(), TreeError> {
        validate_owner(owner_id)?;
        validate_ids([id])?;

        self.execute(owner_id, "purge", async {
            let mut uow = self.unit_of_work(owner_id);
            let ids = self.lifecycle().purge(&mut uow, id, kind).await?;
            uow.commit().await?;

            info!(owner_id, node_id = %id, kind = %kind, purged = ids.len(), "Purged");
            Ok(Outcome::new(()).with_event(DomainEvent::NodesPurged {
                root_id: id.to_string(),
                ids,
                source_client_id: self.client_id.clone(),
            }))
        })
        .await
    }

    /// Re-parent a node (`None` moves it to root level)
    ///
    /// Returns the node as stored after the move.
    pub async fn move_node(
        &self,
        owner_id: &str,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Node, TreeError> {
        validate_owner(owner_id)?;
        validate_ids(std::iter::once(id).chain(new_parent_id))?;

        self.execute(owner_id, "move_node", async {
            let mut uow = self.unit_of_work(owner_id);
            let Some(moved) = self.lifecycle().move_node(&mut uow, id, new_parent_id).await? else {
                debug!(owner_id, node_id = %id, "Node already has the requested parent");
                return uow
                    .find_any(id)
                    .await?
                    .map(Outcome::new)
                    .ok_or_else(|| TreeError::node_not_found(id));
            };
            uow.commit().await?;
            let node = committed_node(moved.node);

            info!(
                owner_id,
                node_id = %id,
                old_parent_id = ?moved.old_parent_id,
                new_parent_id = ?new_parent_id,
                "Moved"
            );
            Ok(Outcome::new(node.clone()).with_event(DomainEvent::NodeMoved {
                id: id.to_string(),
                kind: node.kind(),
                old_parent_id: moved.old_parent_id,
                new_parent_id: new_parent_id.map(str::to_string),
                source_client_id: self.client_id.clone(),
            }))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Check every structural invariant over the owner's stored nodes
    pub async fn audit_owner(&self, owner_id: &str) -> Result<Vec<InvariantViolation>, TreeError> {
        validate_owner(owner_id)?;
        self.bounded("audit_owner", async {
            let everything = NodeFilter::owner(owner_id);
            let collections = self.store.list_collections(&everything).await?;
            let content = self.store.list_content(&everything).await?;
            Ok(audit(owner_id, &collections, &content))
        })
        .await
    }
}
