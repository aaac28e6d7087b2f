//! Data Models
//!
//! - [`node`] - Collection, Content and the kind-erased Node
//! - [`patch`] - Allow-listed update structures per node kind
//! - [`view`] - Read-side compositions (tree levels, ordered children, graphs)

pub mod node;
pub mod patch;
pub mod view;

pub use node::{
    validate_node_id, validate_title, Collection, Content, Node, NodeKind, NodeState,
    ValidationError,
};
pub use patch::{CollectionPatch, ContentPatch, NodePatch, PROTECTED_FIELDS};
pub use view::{
    CollectionSummary, Crumb, GraphNode, OrderedCollection, PrerequisiteEdge, PrerequisiteGraph,
    TreeView,
};
