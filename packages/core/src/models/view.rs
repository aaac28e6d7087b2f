//! Read-side view types assembled by the query layer
//!
//! None of these types are persisted; they compose stored nodes for display.

use super::node::{Collection, Content, Node};
use serde::{Deserialize, Serialize};

/// A collection together with its live (non-trashed) child counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    #[serde(flatten)]
    pub collection: Collection,
    pub child_collection_count: u64,
    pub child_content_count: u64,
}

/// One level of the tree: `get_tree` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeView {
    pub collections: Vec<CollectionSummary>,
    pub content: Vec<Content>,
}

impl TreeView {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.content.is_empty()
    }
}

/// A collection with its children resolved in explicit array order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    pub collection: Collection,
    pub child_collections: Vec<Collection>,
    pub child_content: Vec<Content>,
}

impl OrderedCollection {
    /// Combined order view: child collections first, then content, each in array order
    pub fn entries(&self) -> Vec<Node> {
        self.child_collections
            .iter()
            .cloned()
            .map(Node::Collection)
            .chain(self.child_content.iter().cloned().map(Node::Content))
            .collect()
    }
}

/// One step of a breadcrumb trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crumb {
    pub id: String,
    pub title: String,
}

/// A vertex of the prerequisite graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub title: String,
}

/// `from` must be completed before `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteEdge {
    pub from: String,
    pub to: String,
}

/// Prerequisite graph of the content directly inside one collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<PrerequisiteEdge>,
}

impl PrerequisiteGraph {
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }
}
