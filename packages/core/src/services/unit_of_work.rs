//! Unit of Work
//!
//! Stages the reads and writes of one tree command against a `NodeStore`.
//!
//! Every record read through the unit of work is cached together with the
//! revision it had at read time. Writes only touch the cache. `commit` turns
//! the cache into one `WriteBatch`:
//!
//! - changed records become revision-guarded puts
//! - new records become inserts
//! - removed records become guarded deletes
//! - records that were read but not changed become `Assert`s
//!
//! so the batch fails with a conflict if anything the command based its
//! decision on changed in the meantime.

use super::error::TreeError;
use crate::db::{Mutation, NodeFilter, NodeStore, Record, WriteBatch};
use crate::models::{Collection, Content, Node, NodeKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Slot<R> {
    /// Current staged value; `None` if absent or deleted
    record: Option<R>,
    /// Revision observed when first read; `None` if it did not exist
    read_revision: Option<u64>,
    dirty: bool,
}

impl<R: Record> Slot<R> {
    fn loaded(record: Option<R>) -> Self {
        Self {
            read_revision: record.as_ref().map(|r| r.revision()),
            record,
            dirty: false,
        }
    }
}

fn stage<R: Record>(slots: &mut HashMap<String, Slot<R>>, record: R) {
    let slot = slots
        .entry(record.id().to_string())
        .or_insert_with(|| Slot::loaded(None));
    slot.record = Some(record);
    slot.dirty = true;
}

fn unstage<R: Record>(slots: &mut HashMap<String, Slot<R>>, id: &str) {
    let slot = slots
        .entry(id.to_string())
        .or_insert_with(|| Slot::loaded(None));
    slot.record = None;
    slot.dirty = true;
}

/// Overlay staged state on a store listing
fn merge_listing<R: Record>(
    slots: &mut HashMap<String, Slot<R>>,
    fetched: Vec<R>,
    filter: &NodeFilter,
) -> Vec<R> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for record in fetched {
        let id = record.id().to_string();
        let slot = slots
            .entry(id.clone())
            .or_insert_with(|| Slot::loaded(Some(record)));
        if let Some(current) = &slot.record {
            if filter.matches(current) {
                records.push(current.clone());
            }
        }
        seen.insert(id);
    }

    // Staged records that only match because of this unit of work's writes
    for (id, slot) in slots.iter() {
        if seen.contains(id) || !slot.dirty {
            continue;
        }
        if let Some(current) = &slot.record {
            if filter.matches(current) {
                records.push(current.clone());
            }
        }
    }

    records
}

fn to_mutations<R: Record>(
    slots: &HashMap<String, Slot<R>>,
    owner_id: &str,
    put: impl Fn(R, Option<u64>) -> Mutation,
) -> Vec<Mutation> {
    let mut mutations = Vec::new();
    for (id, slot) in slots {
        let mutation = match (&slot.record, slot.read_revision, slot.dirty) {
            (Some(record), read_revision, true) => put(record.clone(), read_revision),
            (None, Some(revision), true) => Mutation::Delete {
                kind: R::KIND,
                owner_id: owner_id.to_string(),
                id: id.clone(),
                expected_revision: revision,
            },
            (Some(_), Some(revision), false) => Mutation::Assert {
                kind: R::KIND,
                owner_id: owner_id.to_string(),
                id: id.clone(),
                expected_revision: revision,
            },
            // Never existed, or created and deleted again before commit
            _ => continue,
        };
        mutations.push(mutation);
    }
    mutations
}

/// Staged, owner-scoped view of the store for one command
pub struct UnitOfWork {
    store: Arc<dyn NodeStore>,
    owner_id: String,
    collections: HashMap<String, Slot<Collection>>,
    content: HashMap<String, Slot<Content>>,
}

impl UnitOfWork {
    pub fn new(store: Arc<dyn NodeStore>, owner_id: impl Into<String>) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
            collections: HashMap::new(),
            content: HashMap::new(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub async fn find_collection(&mut self, id: &str) -> Result<Option<Collection>, TreeError> {
        if let Some(slot) = self.collections.get(id) {
            return Ok(slot.record.clone());
        }
        let fetched = self.store.get_collection(&self.owner_id, id).await?;
        let slot = self
            .collections
            .entry(id.to_string())
            .or_insert_with(|| Slot::loaded(fetched));
        Ok(slot.record.clone())
    }

    pub async fn find_content(&mut self, id: &str) -> Result<Option<Content>, TreeError> {
        if let Some(slot) = self.content.get(id) {
            return Ok(slot.record.clone());
        }
        let fetched = self.store.get_content(&self.owner_id, id).await?;
        let slot = self
            .content
            .entry(id.to_string())
            .or_insert_with(|| Slot::loaded(fetched));
        Ok(slot.record.clone())
    }

    /// Load a collection or fail with `NotFound`
    pub async fn collection(&mut self, id: &str) -> Result<Collection, TreeError> {
        self.find_collection(id)
            .await?
            .ok_or_else(|| TreeError::not_found(NodeKind::Collection, id))
    }

    /// Load a content item or fail with `NotFound`
    pub async fn content(&mut self, id: &str) -> Result<Content, TreeError> {
        self.find_content(id)
            .await?
            .ok_or_else(|| TreeError::not_found(NodeKind::Content, id))
    }

    /// Load a node of the given kind or fail with `NotFound`
    pub async fn node(&mut self, id: &str, kind: NodeKind) -> Result<Node, TreeError> {
        match kind {
            NodeKind::Collection => self.collection(id).await.map(Node::Collection),
            NodeKind::Content => self.content(id).await.map(Node::Content),
        }
    }

    /// Resolve a node whose kind the caller does not know
    pub async fn find_any(&mut self, id: &str) -> Result<Option<Node>, TreeError> {
        if let Some(collection) = self.find_collection(id).await? {
            return Ok(Some(Node::Collection(collection)));
        }
        Ok(self.find_content(id).await?.map(Node::Content))
    }

    pub async fn list_collections(
        &mut self,
        filter: &NodeFilter,
    ) -> Result<Vec<Collection>, TreeError> {
        let fetched = self.store.list_collections(filter).await?;
        Ok(merge_listing(&mut self.collections, fetched, filter))
    }

    pub async fn list_content(&mut self, filter: &NodeFilter) -> Result<Vec<Content>, TreeError> {
        let fetched = self.store.list_content(filter).await?;
        Ok(merge_listing(&mut self.content, fetched, filter))
    }

    /// Live child count from committed state (staged writes are not counted)
    pub async fn count_children(
        &self,
        parent_id: &str,
        kind: NodeKind,
    ) -> Result<u64, TreeError> {
        Ok(self
            .store
            .count_children(&self.owner_id, parent_id, kind)
            .await?)
    }

    /// Stage a new or changed collection
    pub fn put_collection(&mut self, collection: Collection) {
        stage(&mut self.collections, collection);
    }

    /// Stage a new or changed content item
    pub fn put_content(&mut self, content: Content) {
        stage(&mut self.content, content);
    }

    pub fn put_node(&mut self, node: Node) {
        match node {
            Node::Collection(collection) => self.put_collection(collection),
            Node::Content(content) => self.put_content(content),
        }
    }

    pub fn delete_collection(&mut self, id: &str) {
        unstage(&mut self.collections, id);
    }

    pub fn delete_content(&mut self, id: &str) {
        unstage(&mut self.content, id);
    }

    pub fn delete_node(&mut self, id: &str, kind: NodeKind) {
        match kind {
            NodeKind::Collection => self.delete_collection(id),
            NodeKind::Content => self.delete_content(id),
        }
    }

    /// Build the guarded batch for everything staged so far
    pub fn batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        let collections = to_mutations(&self.collections, &self.owner_id, |record, expected| {
            Mutation::PutCollection {
                record,
                expected_revision: expected,
            }
        });
        let content = to_mutations(&self.content, &self.owner_id, |record, expected| {
            Mutation::PutContent {
                record,
                expected_revision: expected,
            }
        });
        for mutation in collections.into_iter().chain(content) {
            batch.push(mutation);
        }
        batch
    }

    /// Commit all staged writes atomically; read-only units commit nothing
    pub async fn commit(self) -> Result<(), TreeError> {
        let batch = self.batch();
        if batch.write_count() == 0 {
            debug!(owner_id = %self.owner_id, "Unit of work has no writes, skipping commit");
            return Ok(());
        }

        debug!(
            owner_id = %self.owner_id,
            mutations = batch.len(),
            writes = batch.write_count(),
            "Committing unit of work"
        );
        self.store.commit(batch).await?;
        Ok(())
    }
}
