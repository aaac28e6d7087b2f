//! Ordering Manager
//!
//! The only code that mutates a Collection's `child_collections` /
//! `child_content` arrays. Attach and detach are idempotent; reorder is a full
//! replacement guarded by a set-equality check against the current arrays.

use super::error::TreeError;
use crate::models::{Collection, NodeKind};
use std::collections::HashSet;

/// Mutates explicit child orderings
pub struct OrderingManager;

impl OrderingManager {
    fn children_mut(parent: &mut Collection, kind: NodeKind) -> &mut Vec<String> {
        match kind {
            NodeKind::Collection => &mut parent.child_collections,
            NodeKind::Content => &mut parent.child_content,
        }
    }

    /// Whether `child_id` is listed in the array for `kind`
    pub fn contains(parent: &Collection, child_id: &str, kind: NodeKind) -> bool {
        let children = match kind {
            NodeKind::Collection => &parent.child_collections,
            NodeKind::Content => &parent.child_content,
        };
        children.iter().any(|id| id == child_id)
    }

    /// Append `child_id` unless already present
    ///
    /// Returns `true` if the array changed.
    pub fn attach(parent: &mut Collection, child_id: &str, kind: NodeKind) -> bool {
        if Self::contains(parent, child_id, kind) {
            return false;
        }
        Self::children_mut(parent, kind).push(child_id.to_string());
        true
    }

    /// Remove `child_id` if present
    ///
    /// Returns `true` if the array changed.
    pub fn detach(parent: &mut Collection, child_id: &str, kind: NodeKind) -> bool {
        let children = Self::children_mut(parent, kind);
        let before = children.len();
        children.retain(|id| id != child_id);
        children.len() != before
    }

    /// Replace both arrays with the supplied sequences
    ///
    /// Each supplied sequence must hold exactly the current members of its
    /// array, in any order, without duplicates. Returns `true` if the order
    /// changed.
    pub fn reorder(
        parent: &mut Collection,
        child_collections: Vec<String>,
        child_content: Vec<String>,
    ) -> Result<bool, TreeError> {
        Self::check_same_members(
            &parent.id,
            "childCollections",
            &parent.child_collections,
            &child_collections,
        )?;
        Self::check_same_members(
            &parent.id,
            "childContent",
            &parent.child_content,
            &child_content,
        )?;

        let changed =
            parent.child_collections != child_collections || parent.child_content != child_content;
        parent.child_collections = child_collections;
        parent.child_content = child_content;
        Ok(changed)
    }

    fn check_same_members(
        collection_id: &str,
        field: &str,
        current: &[String],
        proposed: &[String],
    ) -> Result<(), TreeError> {
        let mut proposed_set = HashSet::with_capacity(proposed.len());
        for id in proposed {
            if !proposed_set.insert(id.as_str()) {
                return Err(TreeError::order_mismatch(
                    collection_id,
                    format!("{} lists '{}' more than once", field, id),
                ));
            }
        }

        let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
        if let Some(missing) = current_set.difference(&proposed_set).next() {
            return Err(TreeError::order_mismatch(
                collection_id,
                format!("{} is missing current child '{}'", field, missing),
            ));
        }
        if let Some(extra) = proposed_set.difference(&current_set).next() {
            return Err(TreeError::order_mismatch(
                collection_id,
                format!("{} contains '{}' which is not a current child", field, extra),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent_with(collections: &[&str], content: &[&str]) -> Collection {
        let mut parent = Collection::new("alice", "Parent", None).unwrap();
        parent.child_collections = collections.iter().map(|s| s.to_string()).collect();
        parent.child_content = content.iter().map(|s| s.to_string()).collect();
        parent
    }

    #[test]
    fn test_attach_twice_keeps_one_occurrence() {
        let mut parent = parent_with(&[], &[]);
        assert!(OrderingManager::attach(&mut parent, "x", NodeKind::Content));
        assert!(!OrderingManager::attach(&mut parent, "x", NodeKind::Content));
        assert_eq!(parent.child_content, vec!["x".to_string()]);
        assert!(parent.child_collections.is_empty());
    }

    #[test]
    fn test_detach_is_noop_when_absent() {
        let mut parent = parent_with(&["a"], &["x"]);
        assert!(!OrderingManager::detach(&mut parent, "x", NodeKind::Collection));
        assert!(OrderingManager::detach(&mut parent, "x", NodeKind::Content));
        assert!(!OrderingManager::detach(&mut parent, "x", NodeKind::Content));
        assert_eq!(parent.child_collections, vec!["a".to_string()]);
    }

    #[test]
    fn test_reorder_changes_sequence_only() {
        let mut parent = parent_with(&["a", "b"], &["x", "y", "z"]);
        let changed = OrderingManager::reorder(
            &mut parent,
            vec!["b".into(), "a".into()],
            vec!["z".into(), "x".into(), "y".into()],
        )
        .unwrap();
        assert!(changed);
        assert_eq!(parent.child_collections, vec!["b", "a"]);
        assert_eq!(parent.child_content, vec!["z", "x", "y"]);
    }

    #[test]
    fn test_reorder_rejects_membership_changes() {
        let mut parent = parent_with(&["a"], &["x", "y"]);

        let dropped = OrderingManager::reorder(&mut parent, vec!["a".into()], vec!["x".into()]);
        assert!(matches!(dropped, Err(TreeError::OrderMismatch { .. })));

        let added = OrderingManager::reorder(
            &mut parent,
            vec!["a".into()],
            vec!["x".into(), "y".into(), "w".into()],
        );
        assert!(matches!(added, Err(TreeError::OrderMismatch { .. })));

        let duplicated = OrderingManager::reorder(
            &mut parent,
            vec!["a".into()],
            vec!["x".into(), "x".into(), "y".into()],
        );
        assert!(matches!(duplicated, Err(TreeError::OrderMismatch { .. })));

        // Rejected requests leave the arrays untouched
        assert_eq!(parent.child_content, vec!["x", "y"]);
    }

    #[test]
    fn test_reorder_same_order_reports_unchanged() {
        let mut parent = parent_with(&["a"], &["x"]);
        let changed =
            OrderingManager::reorder(&mut parent, vec!["a".into()], vec!["x".into()]).unwrap();
        assert!(!changed);
    }
}
