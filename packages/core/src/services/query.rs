//! Query/Assembly Layer
//!
//! Read-only compositions over the store. Explicit ordering arrays are the
//! source of truth for curated sequences; timestamp order is only used for
//! the trash listing and the legacy children listing.

use super::error::TreeError;
use super::unit_of_work::UnitOfWork;
use crate::db::{NodeFilter, ParentScope, TrashFilter};
use crate::models::{CollectionSummary, Crumb, Node, NodeKind, OrderedCollection, TreeView};
use std::collections::HashSet;
use tracing::warn;

/// Newest first; ties broken by id for a stable order
fn sort_newest_first(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        b.modified_at()
            .cmp(&a.modified_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}

/// Builds read views
pub struct TreeQuery {
    max_tree_depth: usize,
}

impl TreeQuery {
    pub fn new(max_tree_depth: usize) -> Self {
        Self { max_tree_depth }
    }

    /// One tree level with live child counts
    ///
    /// Root level is sorted by creation time; below a collection the
    /// explicit ordering arrays apply. Trashed nodes are left out.
    pub async fn get_tree(
        &self,
        uow: &mut UnitOfWork,
        parent_id: Option<&str>,
    ) -> Result<TreeView, TreeError> {
        let (mut collections, mut content) = match parent_id {
            Some(parent_id) => {
                let ordered = self.ordered_children(uow, parent_id, false).await?;
                (ordered.child_collections, ordered.child_content)
            }
            None => {
                let roots = NodeFilter::owner(uow.owner_id())
                    .with_parent(ParentScope::Root)
                    .with_trash(TrashFilter::ActiveOnly);
                let mut collections = uow.list_collections(&roots).await?;
                let mut content = uow.list_content(&roots).await?;
                collections.sort_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.id.cmp(&b.id))
                });
                content.sort_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.id.cmp(&b.id))
                });
                (collections, content)
            }
        };

        let mut view = TreeView::default();
        for collection in collections.drain(..) {
            let child_collection_count = uow
                .count_children(&collection.id, NodeKind::Collection)
                .await?;
            let child_content_count = uow.count_children(&collection.id, NodeKind::Content).await?;
            view.collections.push(CollectionSummary {
                collection,
                child_collection_count,
                child_content_count,
            });
        }
        view.content.append(&mut content);
        Ok(view)
    }

    /// A collection with its children resolved in array order
    ///
    /// Ids that no longer resolve are skipped with a warning.
    pub async fn ordered_children(
        &self,
        uow: &mut UnitOfWork,
        collection_id: &str,
        include_trash: bool,
    ) -> Result<OrderedCollection, TreeError> {
        let collection = uow.collection(collection_id).await?;

        let mut child_collections = Vec::with_capacity(collection.child_collections.len());
        for id in &collection.child_collections {
            match uow.find_collection(id).await? {
                Some(child) if include_trash || !child.is_trash => child_collections.push(child),
                Some(_) => {}
                None => warn!(collection_id, child_id = %id, "Skipping dangling child collection"),
            }
        }

        let mut child_content = Vec::with_capacity(collection.child_content.len());
        for id in &collection.child_content {
            match uow.find_content(id).await? {
                Some(child) if include_trash || !child.is_trash => child_content.push(child),
                Some(_) => {}
                None => warn!(collection_id, child_id = %id, "Skipping dangling child content"),
            }
        }

        Ok(OrderedCollection {
            collection,
            child_collections,
            child_content,
        })
    }

    /// Root-first trail of `{id, title}` ending with the node itself
    pub async fn breadcrumbs(
        &self,
        uow: &mut UnitOfWork,
        id: &str,
        kind: NodeKind,
    ) -> Result<Vec<Crumb>, TreeError> {
        let node = uow.node(id, kind).await?;
        let mut trail = vec![Crumb {
            id: node.id().to_string(),
            title: node.title().to_string(),
        }];

        let mut visited = HashSet::new();
        visited.insert(node.id().to_string());
        let mut current = node.parent_id().map(str::to_string);

        while let Some(parent_id) = current {
            if trail.len() > self.max_tree_depth || !visited.insert(parent_id.clone()) {
                warn!(node_id = %id, "Breadcrumb walk stopped at depth {}", trail.len());
                break;
            }
            match uow.find_collection(&parent_id).await? {
                Some(parent) => {
                    current = parent.parent_id.clone();
                    trail.push(Crumb {
                        id: parent.id,
                        title: parent.title,
                    });
                }
                None => {
                    warn!(node_id = %id, parent_id = %parent_id, "Breadcrumb parent is missing");
                    current = None;
                }
            }
        }

        trail.reverse();
        Ok(trail)
    }

    /// Every trashed node of the owner, most recently modified first
    pub async fn list_trash(&self, uow: &mut UnitOfWork) -> Result<Vec<Node>, TreeError> {
        let trashed = NodeFilter::owner(uow.owner_id()).with_trash(TrashFilter::TrashedOnly);
        let mut nodes: Vec<Node> = uow
            .list_collections(&trashed)
            .await?
            .into_iter()
            .map(Node::Collection)
            .collect();
        nodes.extend(
            uow.list_content(&trashed)
                .await?
                .into_iter()
                .map(Node::Content),
        );
        sort_newest_first(&mut nodes);
        Ok(nodes)
    }

    /// Legacy implicit ordering: children by parent pointer, newest first
    pub async fn list_children(
        &self,
        uow: &mut UnitOfWork,
        parent_id: Option<&str>,
        kind: NodeKind,
        include_trash: bool,
    ) -> Result<Vec<Node>, TreeError> {
        let filter = NodeFilter::owner(uow.owner_id())
            .with_parent(ParentScope::from_parent(parent_id))
            .with_trash(TrashFilter::include_trash(include_trash));

        let mut nodes: Vec<Node> = match kind {
            NodeKind::Collection => uow
                .list_collections(&filter)
                .await?
                .into_iter()
                .map(Node::Collection)
                .collect(),
            NodeKind::Content => uow
                .list_content(&filter)
                .await?
                .into_iter()
                .map(Node::Content)
                .collect(),
        };
        sort_newest_first(&mut nodes);
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, Content};
    use chrono::{Duration, Utc};

    #[test]
    fn test_sort_newest_first() {
        let mut old = Content::new("alice", "Old", None, None).unwrap();
        old.last_modified_at = Utc::now() - Duration::hours(1);
        let new = Collection::new("alice", "New", None).unwrap();

        let mut nodes = vec![Node::Content(old.clone()), Node::Collection(new.clone())];
        sort_newest_first(&mut nodes);
        assert_eq!(nodes[0].id(), new.id);
        assert_eq!(nodes[1].id(), old.id);
    }
}
