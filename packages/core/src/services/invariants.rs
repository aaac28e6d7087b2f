//! Structural audit of one owner's tree
//!
//! Checks every stored-state invariant of the content tree and reports each
//! violation instead of stopping at the first. Used by tests after each
//! scenario and by `TreeService::audit_owner`.

use crate::models::{Collection, Content, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InvariantViolation {
    /// A record in the owner's set belongs to someone else
    ForeignRecord { id: String, owner_id: String },
    /// A parent pointer, child entry or prerequisite names no node of this owner
    UnknownReference { from_id: String, missing_id: String },
    /// `parent_id` points at a node that is not a collection
    ParentNotCollection { id: String, parent_id: String },
    /// A child's parent does not list it exactly once in the matching array
    NotListedByParent {
        id: String,
        parent_id: String,
        occurrences: usize,
    },
    /// A parent lists a child whose `parent_id` points elsewhere
    ListedByWrongParent { id: String, listed_by: String },
    /// An id appears in an array of the wrong kind
    KindMismatch {
        id: String,
        listed_by: String,
        expected: NodeKind,
    },
    /// A child id appears in more than one parent's arrays, or twice in one
    DuplicateMembership { id: String, listed_by: Vec<String> },
    /// Content lists itself as a prerequisite
    SelfPrerequisite { id: String },
    /// A prerequisite names a collection
    PrerequisiteNotContent { id: String, prerequisite_id: String },
}

/// Every violated invariant of `owner_id`'s nodes
pub fn audit(
    owner_id: &str,
    collections: &[Collection],
    content: &[Content],
) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let mut kinds: HashMap<&str, NodeKind> = HashMap::new();
    for collection in collections {
        kinds.insert(&collection.id, NodeKind::Collection);
        if collection.owner_id != owner_id {
            violations.push(InvariantViolation::ForeignRecord {
                id: collection.id.clone(),
                owner_id: collection.owner_id.clone(),
            });
        }
    }
    for item in content {
        kinds.insert(&item.id, NodeKind::Content);
        if item.owner_id != owner_id {
            violations.push(InvariantViolation::ForeignRecord {
                id: item.id.clone(),
                owner_id: item.owner_id.clone(),
            });
        }
    }
    let collections_by_id: HashMap<&str, &Collection> =
        collections.iter().map(|c| (c.id.as_str(), c)).collect();

    // Children: parent pointer must be mirrored exactly once by the parent
    let children = collections
        .iter()
        .map(|c| (c.id.as_str(), c.parent_id.as_deref(), NodeKind::Collection))
        .chain(
            content
                .iter()
                .map(|c| (c.id.as_str(), c.parent_id.as_deref(), NodeKind::Content)),
        );
    let mut parent_of: HashMap<&str, &str> = HashMap::new();
    for (id, parent_id, kind) in children {
        let Some(parent_id) = parent_id else {
            continue;
        };
        parent_of.insert(id, parent_id);
        match kinds.get(parent_id) {
            None => violations.push(InvariantViolation::UnknownReference {
                from_id: id.to_string(),
                missing_id: parent_id.to_string(),
            }),
            Some(NodeKind::Content) => violations.push(InvariantViolation::ParentNotCollection {
                id: id.to_string(),
                parent_id: parent_id.to_string(),
            }),
            Some(NodeKind::Collection) => {
                if let Some(parent) = collections_by_id.get(parent_id) {
                    let array = match kind {
                        NodeKind::Collection => &parent.child_collections,
                        NodeKind::Content => &parent.child_content,
                    };
                    let occurrences = array.iter().filter(|c| c.as_str() == id).count();
                    if occurrences != 1 {
                        violations.push(InvariantViolation::NotListedByParent {
                            id: id.to_string(),
                            parent_id: parent_id.to_string(),
                            occurrences,
                        });
                    }
                }
            }
        }
    }

    // Arrays: every entry resolves, has the right kind, points back, and is listed once overall
    let mut listed_by: HashMap<&str, Vec<String>> = HashMap::new();
    for parent in collections {
        let entries = parent
            .child_collections
            .iter()
            .map(|id| (id, NodeKind::Collection))
            .chain(parent.child_content.iter().map(|id| (id, NodeKind::Content)));
        for (child_id, expected) in entries {
            listed_by
                .entry(child_id.as_str())
                .or_default()
                .push(parent.id.clone());
            match kinds.get(child_id.as_str()) {
                None => violations.push(InvariantViolation::UnknownReference {
                    from_id: parent.id.clone(),
                    missing_id: child_id.clone(),
                }),
                Some(kind) if *kind != expected => {
                    violations.push(InvariantViolation::KindMismatch {
                        id: child_id.clone(),
                        listed_by: parent.id.clone(),
                        expected,
                    })
                }
                Some(_) => {
                    if parent_of.get(child_id.as_str()) != Some(&parent.id.as_str()) {
                        violations.push(InvariantViolation::ListedByWrongParent {
                            id: child_id.clone(),
                            listed_by: parent.id.clone(),
                        });
                    }
                }
            }
        }
    }
    for (id, parents) in listed_by {
        if parents.len() > 1 {
            violations.push(InvariantViolation::DuplicateMembership {
                id: id.to_string(),
                listed_by: parents,
            });
        }
    }

    // Prerequisites: same-owner content, no self-loops
    for item in content {
        for prerequisite in &item.prerequisites {
            if prerequisite == &item.id {
                violations.push(InvariantViolation::SelfPrerequisite {
                    id: item.id.clone(),
                });
                continue;
            }
            match kinds.get(prerequisite.as_str()) {
                None => violations.push(InvariantViolation::UnknownReference {
                    from_id: item.id.clone(),
                    missing_id: prerequisite.clone(),
                }),
                Some(NodeKind::Collection) => {
                    violations.push(InvariantViolation::PrerequisiteNotContent {
                        id: item.id.clone(),
                        prerequisite_id: prerequisite.clone(),
                    })
                }
                Some(NodeKind::Content) => {}
            }
        }
    }

    violations
}
