//! Prerequisite Graph Manager
//!
//! Content `Y` listing `X` in `Y.prerequisites` is the edge `X -> Y`: `X` must
//! be completed before `Y`. Edges only connect content of the same owner and
//! never form self-loops. Acyclicity across the owner's whole graph is checked
//! when enabled.

use super::error::TreeError;
use super::unit_of_work::UnitOfWork;
use crate::db::NodeFilter;
use crate::models::{GraphNode, NodeKind, PrerequisiteEdge, PrerequisiteGraph, ValidationError};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Whether any of `targets` is reachable from `start` following `adjacency`
fn reaches_any(
    start: &str,
    targets: &HashSet<&str>,
    adjacency: &HashMap<String, Vec<String>>,
) -> Option<String> {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    reachable.insert(start.to_string());
    queue.push_back(start.to_string());

    while let Some(node_id) = queue.pop_front() {
        if let Some(successors) = adjacency.get(&node_id) {
            for successor in successors {
                if targets.contains(successor.as_str()) {
                    return Some(successor.clone());
                }
                if reachable.insert(successor.clone()) {
                    queue.push_back(successor.clone());
                }
            }
        }
    }

    None
}

/// Maintains per-content prerequisite edge sets
pub struct PrerequisiteGraphManager {
    check_cycles: bool,
}

impl PrerequisiteGraphManager {
    pub fn new(check_cycles: bool) -> Self {
        Self { check_cycles }
    }

    /// Replace the prerequisites of `content_id`
    ///
    /// Duplicates are collapsed keeping first occurrence order. Returns the
    /// stored list.
    pub async fn set_prerequisites(
        &self,
        uow: &mut UnitOfWork,
        content_id: &str,
        prerequisite_ids: Vec<String>,
    ) -> Result<Vec<String>, TreeError> {
        let mut content = uow.content(content_id).await?;

        let mut seen = HashSet::new();
        let prerequisites: Vec<String> = prerequisite_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        for id in &prerequisites {
            if id == content_id {
                return Err(ValidationError::SelfPrerequisite(content_id.to_string()).into());
            }
            if uow.find_content(id).await?.is_none() {
                if uow.find_collection(id).await?.is_some() {
                    return Err(ValidationError::WrongKind {
                        id: id.clone(),
                        expected: NodeKind::Content,
                    }
                    .into());
                }
                return Err(TreeError::not_found(NodeKind::Content, id));
            }
        }

        if self.check_cycles && !prerequisites.is_empty() {
            self.ensure_acyclic(uow, content_id, &prerequisites).await?;
        }

        content.prerequisites = prerequisites.clone();
        content.touch();
        uow.put_content(content);
        Ok(prerequisites)
    }

    /// Reject the proposed edges `p -> content_id` if `content_id` already
    /// reaches some `p`
    async fn ensure_acyclic(
        &self,
        uow: &mut UnitOfWork,
        content_id: &str,
        prerequisites: &[String],
    ) -> Result<(), TreeError> {
        let everything = NodeFilter::owner(uow.owner_id());
        let all_content = uow.list_content(&everything).await?;

        // Edge q -> n for every q in n.prerequisites; the edges into
        // content_id are being replaced, so they are left out
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for node in &all_content {
            if node.id == content_id {
                continue;
            }
            for prerequisite in &node.prerequisites {
                adjacency
                    .entry(prerequisite.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }

        let targets: HashSet<&str> = prerequisites.iter().map(String::as_str).collect();
        debug!(
            content_id,
            nodes = all_content.len(),
            "Checking prerequisite graph for cycles"
        );
        if let Some(closing) = reaches_any(content_id, &targets, &adjacency) {
            return Err(TreeError::cyclic_reference(format!(
                "'{}' already depends on '{}'",
                closing, content_id
            )));
        }
        Ok(())
    }

    /// Graph of the non-trashed content directly inside a collection
    ///
    /// Nodes follow the collection's content order; only edges between two
    /// listed nodes are returned.
    pub async fn graph_for(
        &self,
        uow: &mut UnitOfWork,
        collection_id: &str,
    ) -> Result<PrerequisiteGraph, TreeError> {
        let collection = uow.collection(collection_id).await?;

        let mut members = Vec::new();
        for id in &collection.child_content {
            match uow.find_content(id).await? {
                Some(content) if !content.is_trash => members.push(content),
                Some(_) => {}
                None => warn!(collection_id, child_id = %id, "Skipping dangling child content"),
            }
        }

        let member_ids: HashSet<&str> = members.iter().map(|c| c.id.as_str()).collect();
        let mut graph = PrerequisiteGraph::default();
        for content in &members {
            for prerequisite in &content.prerequisites {
                if member_ids.contains(prerequisite.as_str()) {
                    graph.edges.push(PrerequisiteEdge {
                        from: prerequisite.clone(),
                        to: content.id.clone(),
                    });
                }
            }
        }
        graph.nodes = members
            .into_iter()
            .map(|content| GraphNode {
                id: content.id,
                title: content.title,
            })
            .collect();

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacency(edges: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for (from, to) in edges {
            adjacency
                .entry(from.to_string())
                .or_default()
                .push(to.to_string());
        }
        adjacency
    }

    #[test]
    fn test_reaches_transitive_target() {
        let graph = adjacency(&[("a", "b"), ("b", "c")]);
        let targets: HashSet<&str> = ["c"].into_iter().collect();
        assert_eq!(reaches_any("a", &targets, &graph), Some("c".to_string()));
    }

    #[test]
    fn test_unreachable_target() {
        let graph = adjacency(&[("a", "b"), ("c", "a")]);
        let targets: HashSet<&str> = ["c"].into_iter().collect();
        assert_eq!(reaches_any("a", &targets, &graph), None);
    }

    #[test]
    fn test_existing_cycle_terminates() {
        let graph = adjacency(&[("a", "b"), ("b", "a")]);
        let targets: HashSet<&str> = ["z"].into_iter().collect();
        assert_eq!(reaches_any("a", &targets, &graph), None);
    }
}
