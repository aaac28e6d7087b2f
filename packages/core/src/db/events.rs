//! Domain Events
//!
//! Events emitted by `TreeService` after a transaction commits. They follow the
//! observer pattern: subscribers receive them from a tokio broadcast channel
//! without coupling to the storage layer.
//!
//! Every event carries `source_client_id`, the identifier of the scoped service
//! that caused it (see `TreeService::with_client`), so clients can ignore their
//! own echoes.

use crate::models::{Node, NodeKind};
use serde::{Deserialize, Serialize};

/// Domain events emitted on successful commits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    /// A collection or content item was created
    NodeCreated {
        node: Node,
        source_client_id: Option<String>,
    },

    /// Metadata of a node changed
    NodeUpdated {
        node: Node,
        source_client_id: Option<String>,
    },

    /// A node was re-parented
    NodeMoved {
        id: String,
        kind: NodeKind,
        old_parent_id: Option<String>,
        new_parent_id: Option<String>,
        source_client_id: Option<String>,
    },

    /// A collection's child arrays were replaced
    ChildrenReordered {
        collection_id: String,
        source_client_id: Option<String>,
    },

    /// A subtree was moved to trash; `ids` lists every affected node
    NodesTrashed {
        root_id: String,
        ids: Vec<String>,
        source_client_id: Option<String>,
    },

    /// A single node left the trash
    NodeRestored {
        id: String,
        kind: NodeKind,
        source_client_id: Option<String>,
    },

    /// Nodes were permanently removed
    NodesPurged {
        root_id: String,
        ids: Vec<String>,
        source_client_id: Option<String>,
    },

    /// A content item's prerequisite list was replaced
    PrerequisitesChanged {
        content_id: String,
        prerequisites: Vec<String>,
        source_client_id: Option<String>,
    },
}

impl DomainEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &str {
        match self {
            DomainEvent::NodeCreated { .. } => "node:created",
            DomainEvent::NodeUpdated { .. } => "node:updated",
            DomainEvent::NodeMoved { .. } => "node:moved",
            DomainEvent::ChildrenReordered { .. } => "children:reordered",
            DomainEvent::NodesTrashed { .. } => "nodes:trashed",
            DomainEvent::NodeRestored { .. } => "node:restored",
            DomainEvent::NodesPurged { .. } => "nodes:purged",
            DomainEvent::PrerequisitesChanged { .. } => "prerequisites:changed",
        }
    }

    pub fn source_client_id(&self) -> Option<&str> {
        match self {
            DomainEvent::NodeCreated {
                source_client_id, ..
            }
            | DomainEvent::NodeUpdated {
                source_client_id, ..
            }
            | DomainEvent::NodeMoved {
                source_client_id, ..
            }
            | DomainEvent::ChildrenReordered {
                source_client_id, ..
            }
            | DomainEvent::NodesTrashed {
                source_client_id, ..
            }
            | DomainEvent::NodeRestored {
                source_client_id, ..
            }
            | DomainEvent::NodesPurged {
                source_client_id, ..
            }
            | DomainEvent::PrerequisitesChanged {
                source_client_id, ..
            } => source_client_id.as_deref(),
        }
    }
}
