//! Lifecycle Engine
//!
//! State machine per node:
//!
//! ```text
//! Active --trash--> Trashed --restore--> Active
//!                   Trashed --purge----> (removed)
//! ```
//!
//! Trash cascades over the whole subtree; restore only affects the node it is
//! called on; purge removes the whole subtree. All changes are staged on a
//! [`UnitOfWork`] and become visible together when it commits.
//!
//! Subtree traversal is iterative (queue plus visited set) and bounded by
//! `max_tree_depth`, so a corrupted parent chain cannot overflow the stack or
//! loop forever.

use super::error::TreeError;
use super::ordering::OrderingManager;
use super::unit_of_work::UnitOfWork;
use crate::db::{NodeFilter, ParentScope, TrashFilter};
use crate::models::{Collection, Content, Node, NodeKind, NodePatch, ValidationError};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// All nodes of a subtree, root collection first
#[derive(Debug, Default)]
pub struct Subtree {
    pub collections: Vec<Collection>,
    pub content: Vec<Content>,
}

impl Subtree {
    pub fn ids(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|c| c.id.clone())
            .chain(self.content.iter().map(|c| c.id.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len() + self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a committed-to-be move
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub node: Node,
    pub old_parent_id: Option<String>,
}

/// Applies lifecycle transitions to a unit of work
pub struct LifecycleEngine {
    max_tree_depth: usize,
}

impl LifecycleEngine {
    pub fn new(max_tree_depth: usize) -> Self {
        Self { max_tree_depth }
    }

    /// Load a collection that may receive a new child
    async fn attachable_parent(
        &self,
        uow: &mut UnitOfWork,
        parent_id: &str,
    ) -> Result<Collection, TreeError> {
        let parent = match uow.find_collection(parent_id).await? {
            Some(parent) => parent,
            None => {
                if uow.find_content(parent_id).await?.is_some() {
                    return Err(ValidationError::WrongKind {
                        id: parent_id.to_string(),
                        expected: NodeKind::Collection,
                    }
                    .into());
                }
                return Err(TreeError::not_found(NodeKind::Collection, parent_id));
            }
        };

        if parent.is_trash {
            return Err(TreeError::invalid_state(
                NodeKind::Collection,
                parent_id,
                "cannot attach children to a trashed collection",
            ));
        }
        Ok(parent)
    }

    pub async fn create_collection(
        &self,
        uow: &mut UnitOfWork,
        title: &str,
        description: Option<String>,
        parent_id: Option<&str>,
    ) -> Result<Collection, TreeError> {
        let collection = Collection::new(uow.owner_id(), title, parent_id.map(str::to_string))?
            .with_description(description);

        if let Some(parent_id) = parent_id {
            let mut parent = self.attachable_parent(uow, parent_id).await?;
            OrderingManager::attach(&mut parent, &collection.id, NodeKind::Collection);
            parent.touch();
            uow.put_collection(parent);
        }

        uow.put_collection(collection.clone());
        Ok(collection)
    }

    pub async fn create_content(
        &self,
        uow: &mut UnitOfWork,
        title: &str,
        thumbnail_ref: Option<String>,
        parent_id: Option<&str>,
    ) -> Result<Content, TreeError> {
        let content = Content::new(
            uow.owner_id(),
            title,
            thumbnail_ref,
            parent_id.map(str::to_string),
        )?;

        if let Some(parent_id) = parent_id {
            let mut parent = self.attachable_parent(uow, parent_id).await?;
            OrderingManager::attach(&mut parent, &content.id, NodeKind::Content);
            parent.touch();
            uow.put_collection(parent);
        }

        uow.put_content(content.clone());
        Ok(content)
    }

    /// Apply an allow-listed patch
    pub async fn update_metadata(
        &self,
        uow: &mut UnitOfWork,
        id: &str,
        kind: NodeKind,
        patch: NodePatch,
    ) -> Result<Node, TreeError> {
        if patch.kind() != kind {
            return Err(ValidationError::PatchKindMismatch {
                patch: patch.kind(),
                node: kind,
            }
            .into());
        }

        let node = match patch {
            NodePatch::Collection(patch) => {
                let mut collection = uow.collection(id).await?;
                patch.apply_to(&mut collection)?;
                Node::Collection(collection)
            }
            NodePatch::Content(patch) => {
                let mut content = uow.content(id).await?;
                patch.apply_to(&mut content)?;
                Node::Content(content)
            }
        };

        uow.put_node(node.clone());
        Ok(node)
    }

    /// Direct children of a collection: ordering arrays plus parent pointers
    ///
    /// Children found only through their `parent_id` are included so that a
    /// cascade never leaves a record behind. Trashed children are included.
    async fn children_of(
        &self,
        uow: &mut UnitOfWork,
        parent: &Collection,
    ) -> Result<(Vec<Collection>, Vec<Content>), TreeError> {
        let filter = NodeFilter::owner(uow.owner_id())
            .with_parent(ParentScope::Under(parent.id.clone()))
            .with_trash(TrashFilter::All);

        let mut collections = Vec::new();
        let mut seen = HashSet::new();
        for id in &parent.child_collections {
            match uow.find_collection(id).await? {
                Some(child) => {
                    seen.insert(child.id.clone());
                    collections.push(child);
                }
                None => warn!(
                    parent_id = %parent.id,
                    child_id = %id,
                    "Skipping dangling child collection"
                ),
            }
        }
        for child in uow.list_collections(&filter).await? {
            if seen.insert(child.id.clone()) {
                collections.push(child);
            }
        }

        let mut content = Vec::new();
        let mut seen = HashSet::new();
        for id in &parent.child_content {
            match uow.find_content(id).await? {
                Some(child) => {
                    seen.insert(child.id.clone());
                    content.push(child);
                }
                None => warn!(
                    parent_id = %parent.id,
                    child_id = %id,
                    "Skipping dangling child content"
                ),
            }
        }
        for child in uow.list_content(&filter).await? {
            if seen.insert(child.id.clone()) {
                content.push(child);
            }
        }

        Ok((collections, content))
    }

    /// Collect `root` and every transitive descendant, breadth first
    pub async fn subtree(
        &self,
        uow: &mut UnitOfWork,
        root: Collection,
    ) -> Result<Subtree, TreeError> {
        let mut subtree = Subtree::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Collection, usize)> = VecDeque::new();

        visited.insert(root.id.clone());
        queue.push_back((root, 0));

        while let Some((collection, depth)) = queue.pop_front() {
            if depth > self.max_tree_depth {
                return Err(TreeError::invalid_state(
                    NodeKind::Collection,
                    &collection.id,
                    format!("subtree deeper than {} levels", self.max_tree_depth),
                ));
            }

            let (child_collections, child_content) = self.children_of(uow, &collection).await?;
            for child in child_collections {
                if visited.insert(child.id.clone()) {
                    queue.push_back((child, depth + 1));
                }
            }
            for child in child_content {
                if visited.insert(child.id.clone()) {
                    subtree.content.push(child);
                }
            }
            subtree.collections.push(collection);
        }

        debug!(
            collections = subtree.collections.len(),
            content = subtree.content.len(),
            "Collected subtree"
        );
        Ok(subtree)
    }

    /// Trash a node and, for a collection, its whole subtree
    ///
    /// Returns the ids of every node marked trashed. Trashing an already
    /// trashed node re-applies the cascade.
    pub async fn trash(
        &self,
        uow: &mut UnitOfWork,
        id: &str,
        kind: NodeKind,
    ) -> Result<Vec<String>, TreeError> {
        match uow.node(id, kind).await? {
            Node::Content(mut content) => {
                content.is_trash = true;
                content.touch();
                uow.put_content(content);
                Ok(vec![id.to_string()])
            }
            Node::Collection(collection) => {
                let subtree = self.subtree(uow, collection).await?;
                let ids = subtree.ids();
                for mut collection in subtree.collections {
                    collection.is_trash = true;
                    collection.touch();
                    uow.put_collection(collection);
                }
                for mut content in subtree.content {
                    content.is_trash = true;
                    content.touch();
                    uow.put_content(content);
                }
                Ok(ids)
            }
        }
    }

    /// Clear the trash flag of this node only
    pub async fn restore(
        &self,
        uow: &mut UnitOfWork,
        id: &str,
        kind: NodeKind,
    ) -> Result<Node, TreeError> {
        let mut node = uow.node(id, kind).await?;
        if !node.is_trash() {
            return Err(TreeError::invalid_state(kind, id, "node is not in trash"));
        }

        match &mut node {
            Node::Collection(collection) => {
                collection.is_trash = false;
                collection.touch();
            }
            Node::Content(content) => {
                content.is_trash = false;
                content.touch();
            }
        }
        uow.put_node(node.clone());
        Ok(node)
    }

    /// Permanently delete a trashed node and its entire subtree
    ///
    /// Detaches the node from its parent and removes purged content ids from
    /// the prerequisite lists of the owner's remaining content.
    pub async fn purge(
        &self,
        uow: &mut UnitOfWork,
        id: &str,
        kind: NodeKind,
    ) -> Result<Vec<String>, TreeError> {
        let node = uow.node(id, kind).await?;
        if !node.is_trash() {
            return Err(TreeError::invalid_state(
                kind,
                id,
                "only trashed nodes can be purged",
            ));
        }

        if let Some(parent_id) = node.parent_id() {
            if let Some(mut parent) = uow.find_collection(parent_id).await? {
                if OrderingManager::detach(&mut parent, id, kind) {
                    parent.touch();
                    uow.put_collection(parent);
                }
            }
        }

        let subtree = match node {
            Node::Content(content) => Subtree {
                collections: Vec::new(),
                content: vec![content],
            },
            Node::Collection(collection) => self.subtree(uow, collection).await?,
        };

        let purged_content: HashSet<String> =
            subtree.content.iter().map(|c| c.id.clone()).collect();
        let ids = subtree.ids();
        for collection in &subtree.collections {
            uow.delete_collection(&collection.id);
        }
        for content in &subtree.content {
            uow.delete_content(&content.id);
        }

        if !purged_content.is_empty() {
            let everything = NodeFilter::owner(uow.owner_id());
            let remaining = uow.list_content(&everything).await?;
            for mut content in remaining {
                let before = content.prerequisites.len();
                content
                    .prerequisites
                    .retain(|prerequisite| !purged_content.contains(prerequisite));
                if content.prerequisites.len() != before {
                    content.touch();
                    uow.put_content(content);
                }
            }
        }

        Ok(ids)
    }

    /// Re-parent a node; `None` moves it to root level
    ///
    /// Returns `None` when the node already has the requested parent.
    pub async fn move_node(
        &self,
        uow: &mut UnitOfWork,
        id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Option<MoveOutcome>, TreeError> {
        let mut node = uow
            .find_any(id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(id))?;
        let kind = node.kind();
        let old_parent_id = node.parent_id().map(str::to_string);

        if old_parent_id.as_deref() == new_parent_id {
            return Ok(None);
        }

        if let Some(new_parent_id) = new_parent_id {
            if kind == NodeKind::Collection && new_parent_id == id {
                return Err(TreeError::cyclic_reference(format!(
                    "collection '{}' cannot become its own parent",
                    id
                )));
            }
            let mut new_parent = self.attachable_parent(uow, new_parent_id).await?;
            if kind == NodeKind::Collection {
                self.ensure_not_ancestor(uow, id, &new_parent).await?;
            }
            OrderingManager::attach(&mut new_parent, id, kind);
            new_parent.touch();
            uow.put_collection(new_parent);
        }

        if let Some(old_parent_id) = &old_parent_id {
            match uow.find_collection(old_parent_id).await? {
                Some(mut old_parent) => {
                    OrderingManager::detach(&mut old_parent, id, kind);
                    old_parent.touch();
                    uow.put_collection(old_parent);
                }
                None => warn!(
                    node_id = %id,
                    parent_id = %old_parent_id,
                    "Previous parent is missing"
                ),
            }
        }

        match &mut node {
            Node::Collection(collection) => {
                collection.parent_id = new_parent_id.map(str::to_string);
                collection.touch();
            }
            Node::Content(content) => {
                content.parent_id = new_parent_id.map(str::to_string);
                content.touch();
            }
        }
        uow.put_node(node.clone());

        Ok(Some(MoveOutcome {
            node,
            old_parent_id,
        }))
    }

    /// Walk the ancestors of `new_parent`, failing if `id` is among them
    async fn ensure_not_ancestor(
        &self,
        uow: &mut UnitOfWork,
        id: &str,
        new_parent: &Collection,
    ) -> Result<(), TreeError> {
        let mut visited = HashSet::new();
        let mut current = new_parent.parent_id.clone();
        let mut depth = 0;

        while let Some(ancestor_id) = current {
            if ancestor_id == id {
                return Err(TreeError::cyclic_reference(format!(
                    "collection '{}' cannot move under its own descendant '{}'",
                    id, new_parent.id
                )));
            }
            depth += 1;
            if depth > self.max_tree_depth || !visited.insert(ancestor_id.clone()) {
                return Err(TreeError::cyclic_reference(format!(
                    "ancestor chain of '{}' does not terminate",
                    new_parent.id
                )));
            }
            current = match uow.find_collection(&ancestor_id).await? {
                Some(ancestor) => ancestor.parent_id,
                None => {
                    warn!(
                        ancestor_id = %ancestor_id,
                        "Ancestor chain ends at a missing collection"
                    );
                    None
                }
            };
        }
        Ok(())
    }
}
