//! MemoryStore - in-process NodeStore backend
//!
//! Both tables live behind one `tokio::sync::RwLock`. `commit` validates every
//! revision precondition and applies the batch while holding the write lock,
//! so readers observe either none or all of a batch.

use super::error::StoreError;
use super::node_store::{Mutation, NodeFilter, NodeStore, Record, StoreResult, WriteBatch};
use crate::models::{Collection, Content, NodeKind};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    collections: HashMap<String, Collection>,
    content: HashMap<String, Content>,
}

/// In-memory NodeStore, used by tests and when no database path is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned<R: Record>(table: &HashMap<String, R>, owner_id: &str, id: &str) -> Option<R> {
    table
        .get(id)
        .filter(|record| record.owner_id() == owner_id)
        .cloned()
}

fn check_revision<R: Record>(
    table: &HashMap<String, R>,
    owner_id: &str,
    id: &str,
    expected: Option<u64>,
) -> StoreResult<()> {
    match (table.get(id), expected) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(StoreError::conflict(R::KIND, id, "record already exists")),
        (None, Some(_)) => Err(StoreError::conflict(R::KIND, id, "record no longer exists")),
        (Some(existing), Some(expected)) => {
            if existing.owner_id() != owner_id {
                return Err(StoreError::conflict(R::KIND, id, "owner mismatch"));
            }
            if existing.revision() != expected {
                return Err(StoreError::conflict(
                    R::KIND,
                    id,
                    format!(
                        "expected revision {}, found {}",
                        expected,
                        existing.revision()
                    ),
                ));
            }
            Ok(())
        }
    }
}

fn put<R: Record>(table: &mut HashMap<String, R>, mut record: R, expected: Option<u64>) {
    record.set_revision(expected.map_or(1, |rev| rev + 1));
    table.insert(record.id().to_string(), record);
}

impl Tables {
    fn validate(&self, mutation: &Mutation) -> StoreResult<()> {
        match mutation {
            Mutation::PutCollection {
                record,
                expected_revision,
            } => check_revision(
                &self.collections,
                &record.owner_id,
                &record.id,
                *expected_revision,
            ),
            Mutation::PutContent {
                record,
                expected_revision,
            } => check_revision(
                &self.content,
                &record.owner_id,
                &record.id,
                *expected_revision,
            ),
            Mutation::Delete {
                kind,
                owner_id,
                id,
                expected_revision,
            }
            | Mutation::Assert {
                kind,
                owner_id,
                id,
                expected_revision,
            } => match kind {
                NodeKind::Collection => {
                    check_revision(&self.collections, owner_id, id, Some(*expected_revision))
                }
                NodeKind::Content => {
                    check_revision(&self.content, owner_id, id, Some(*expected_revision))
                }
            },
        }
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::PutCollection {
                record,
                expected_revision,
            } => put(&mut self.collections, record, expected_revision),
            Mutation::PutContent {
                record,
                expected_revision,
            } => put(&mut self.content, record, expected_revision),
            Mutation::Delete { kind, id, .. } => match kind {
                NodeKind::Collection => {
                    self.collections.remove(&id);
                }
                NodeKind::Content => {
                    self.content.remove(&id);
                }
            },
            Mutation::Assert { .. } => {}
        }
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn get_collection(&self, owner_id: &str, id: &str) -> StoreResult<Option<Collection>> {
        let tables = self.tables.read().await;
        Ok(owned(&tables.collections, owner_id, id))
    }

    async fn get_content(&self, owner_id: &str, id: &str) -> StoreResult<Option<Content>> {
        let tables = self.tables.read().await;
        Ok(owned(&tables.content, owner_id, id))
    }

    async fn list_collections(&self, filter: &NodeFilter) -> StoreResult<Vec<Collection>> {
        let tables = self.tables.read().await;
        Ok(tables
            .collections
            .values()
            .filter(|c| filter.matches(*c))
            .cloned()
            .collect())
    }

    async fn list_content(&self, filter: &NodeFilter) -> StoreResult<Vec<Content>> {
        let tables = self.tables.read().await;
        Ok(tables
            .content
            .values()
            .filter(|c| filter.matches(*c))
            .cloned()
            .collect())
    }

    async fn count_children(
        &self,
        owner_id: &str,
        parent_id: &str,
        kind: NodeKind,
    ) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let is_live_child = |owner: &str, parent: Option<&str>, trash: bool| {
            owner == owner_id && parent == Some(parent_id) && !trash
        };
        let count = match kind {
            NodeKind::Collection => tables
                .collections
                .values()
                .filter(|c| is_live_child(c.owner_id.as_str(), c.parent_id.as_deref(), c.is_trash))
                .count(),
            NodeKind::Content => tables
                .content
                .values()
                .filter(|c| is_live_child(c.owner_id.as_str(), c.parent_id.as_deref(), c.is_trash))
                .count(),
        };
        Ok(count as u64)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        for mutation in &batch.mutations {
            tables.validate(mutation)?;
        }
        for mutation in batch.mutations {
            tables.apply(mutation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_then_read_is_owner_scoped() {
        let store = MemoryStore::new();
        let root = Collection::new("alice", "Root", None).unwrap();

        let mut batch = WriteBatch::new();
        batch.insert_collection(root.clone());
        store.commit(batch).await.unwrap();

        let stored = store.get_collection("alice", &root.id).await.unwrap();
        assert_eq!(stored.map(|c| c.revision), Some(1));
        assert!(store.get_collection("bob", &root.id).await.unwrap().is_none());
        assert!(store.get_content("alice", &root.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_revision_rejects_whole_batch() {
        let store = MemoryStore::new();
        let a = Collection::new("alice", "A", None).unwrap();
        let b = Collection::new("alice", "B", None).unwrap();

        let mut batch = WriteBatch::new();
        batch.insert_collection(a.clone());
        batch.insert_collection(b.clone());
        store.commit(batch).await.unwrap();

        let mut renamed = a.clone();
        renamed.title = "A2".into();
        let mut stale = b.clone();
        stale.title = "B2".into();

        let mut batch = WriteBatch::new();
        batch.push(Mutation::PutCollection {
            record: renamed,
            expected_revision: Some(1),
        });
        batch.push(Mutation::PutCollection {
            record: stale,
            expected_revision: Some(7),
        });
        let err = store.commit(batch).await.unwrap_err();
        assert!(err.is_conflict());

        // Neither write is visible
        let a_now = store.get_collection("alice", &a.id).await.unwrap().unwrap();
        assert_eq!(a_now.title, "A");
        assert_eq!(a_now.revision, 1);
    }

    #[tokio::test]
    async fn test_delete_and_assert_check_revision() {
        let store = MemoryStore::new();
        let content = Content::new("alice", "Lesson", None, None).unwrap();
        let mut batch = WriteBatch::new();
        batch.insert_content(content.clone());
        store.commit(batch).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.push(Mutation::Assert {
            kind: NodeKind::Content,
            owner_id: "alice".into(),
            id: content.id.clone(),
            expected_revision: 2,
        });
        assert!(store.commit(batch).await.unwrap_err().is_conflict());

        let mut batch = WriteBatch::new();
        batch.push(Mutation::Delete {
            kind: NodeKind::Content,
            owner_id: "alice".into(),
            id: content.id.clone(),
            expected_revision: 1,
        });
        store.commit(batch).await.unwrap();
        assert!(store
            .get_content("alice", &content.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_count_children_skips_trash() {
        let store = MemoryStore::new();
        let root = Collection::new("alice", "Root", None).unwrap();
        let live = Content::new("alice", "Live", None, Some(root.id.clone())).unwrap();
        let mut trashed = Content::new("alice", "Gone", None, Some(root.id.clone())).unwrap();
        trashed.is_trash = true;

        let mut batch = WriteBatch::new();
        batch.insert_collection(root.clone());
        batch.insert_content(live);
        batch.insert_content(trashed);
        store.commit(batch).await.unwrap();

        let count = store
            .count_children("alice", &root.id, NodeKind::Content)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
