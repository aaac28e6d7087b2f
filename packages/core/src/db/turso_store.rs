//! TursoStore - NodeStore Implementation for libsql
//!
//! Durable backend on an embedded libsql (SQLite-compatible) database file.
//!
//! # Schema
//!
//! One table per node kind. The full record is stored as a JSON document in
//! `doc`; the columns used for filtering are duplicated next to it so the
//! common listings are served by indexes:
//!
//! - `(owner_id, parent_id, is_trash)` for children listings and counts
//! - `(owner_id)` for trash listing and owner-wide scans
//!
//! # Transactions
//!
//! `commit` opens a `BEGIN IMMEDIATE` transaction, so concurrent writers
//! serialize on the database lock (bounded by the busy timeout). Every
//! statement is guarded by the revision the writer read; the first failed
//! guard returns `StoreError::Conflict` and the dropped transaction rolls back.

use super::error::StoreError;
use super::node_store::{
    Mutation, NodeFilter, NodeStore, ParentScope, Record, StoreResult, TrashFilter, WriteBatch,
};
use crate::models::{Collection, Content, NodeKind};
use async_trait::async_trait;
use libsql::{Builder, Connection, Database, TransactionBehavior, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Busy timeout applied to every connection (milliseconds)
const BUSY_TIMEOUT_MS: u64 = 5000;

fn table_for(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Collection => "collections",
        NodeKind::Content => "content",
    }
}

/// Map libsql errors, treating lock contention as a retryable conflict
fn map_libsql(kind: NodeKind, id: &str) -> impl Fn(libsql::Error) -> StoreError + '_ {
    move |e| {
        let message = e.to_string();
        if message.contains("database is locked") || message.contains("SQLITE_BUSY") {
            StoreError::conflict(kind, id, message)
        } else {
            StoreError::Libsql(e)
        }
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

/// libsql-backed NodeStore
#[derive(Debug, Clone)]
pub struct TursoStore {
    db: Arc<Database>,
    db_path: PathBuf,
}

impl TursoStore {
    /// Open (or create) the database file and initialize the schema
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::open_failed(db_path.clone(), e.to_string()))?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| StoreError::open_failed(db_path.clone(), e.to_string()))?;

        let store = Self {
            db: Arc::new(db),
            db_path,
        };
        store.initialize_schema().await?;

        tracing::info!("Opened libsql node store at {}", store.db_path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Connection with busy timeout configured
    async fn connect(&self) -> StoreResult<Connection> {
        let conn = self.db.connect().map_err(StoreError::Libsql)?;
        // PRAGMA statements return rows, so use query() instead of execute()
        let mut rows = conn
            .query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS), ())
            .await
            .map_err(StoreError::Libsql)?;
        rows.next().await.map_err(StoreError::Libsql)?;
        Ok(conn)
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.connect().await?;

        let mut rows = conn
            .query("PRAGMA journal_mode = WAL", ())
            .await
            .map_err(StoreError::Libsql)?;
        rows.next().await.map_err(StoreError::Libsql)?;

        for table in ["collections", "content"] {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        id TEXT PRIMARY KEY,
                        owner_id TEXT NOT NULL,
                        parent_id TEXT,
                        is_trash INTEGER NOT NULL DEFAULT 0,
                        modified_at TEXT NOT NULL,
                        revision INTEGER NOT NULL,
                        doc TEXT NOT NULL
                    )"
                ),
                (),
            )
            .await
            .map_err(StoreError::Libsql)?;

            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_owner_parent_trash
                     ON {table}(owner_id, parent_id, is_trash)"
                ),
                (),
            )
            .await
            .map_err(StoreError::Libsql)?;

            conn.execute(
                &format!("CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table}(owner_id)"),
                (),
            )
            .await
            .map_err(StoreError::Libsql)?;
        }

        Ok(())
    }

    async fn get_record<R: Record>(&self, owner_id: &str, id: &str) -> StoreResult<Option<R>> {
        let conn = self.connect().await?;
        let sql = format!(
            "SELECT doc, revision FROM {} WHERE id = ? AND owner_id = ?",
            table_for(R::KIND)
        );
        let mut rows = conn
            .query(&sql, vec![text(id), text(owner_id)])
            .await
            .map_err(StoreError::Libsql)?;

        match rows.next().await.map_err(StoreError::Libsql)? {
            Some(row) => Ok(Some(decode_row::<R>(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_records<R: Record>(&self, filter: &NodeFilter) -> StoreResult<Vec<R>> {
        let conn = self.connect().await?;

        let mut sql = format!(
            "SELECT doc, revision FROM {} WHERE owner_id = ?",
            table_for(R::KIND)
        );
        let mut params = vec![text(&filter.owner_id)];

        match &filter.parent {
            ParentScope::Any => {}
            ParentScope::Root => sql.push_str(" AND parent_id IS NULL"),
            ParentScope::Under(parent_id) => {
                sql.push_str(" AND parent_id = ?");
                params.push(text(parent_id));
            }
        }
        match filter.trash {
            TrashFilter::All => {}
            TrashFilter::ActiveOnly => sql.push_str(" AND is_trash = 0"),
            TrashFilter::TrashedOnly => sql.push_str(" AND is_trash = 1"),
        }

        let mut rows = conn.query(&sql, params).await.map_err(StoreError::Libsql)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Libsql)? {
            records.push(decode_row::<R>(&row)?);
        }
        Ok(records)
    }
}

fn decode_row<R: Record>(row: &libsql::Row) -> StoreResult<R> {
    let doc: String = row.get(0).map_err(StoreError::Libsql)?;
    let revision: i64 = row.get(1).map_err(StoreError::Libsql)?;
    let mut record: R = serde_json::from_str(&doc)?;
    record.set_revision(revision as u64);
    Ok(record)
}

async fn stored_revision(
    conn: &Connection,
    kind: NodeKind,
    owner_id: &str,
    id: &str,
) -> StoreResult<Option<u64>> {
    let sql = format!(
        "SELECT revision FROM {} WHERE id = ? AND owner_id = ?",
        table_for(kind)
    );
    let mut rows = conn
        .query(&sql, vec![text(id), text(owner_id)])
        .await
        .map_err(map_libsql(kind, id))?;
    match rows.next().await.map_err(map_libsql(kind, id))? {
        Some(row) => {
            let revision: i64 = row.get(0).map_err(StoreError::Libsql)?;
            Ok(Some(revision as u64))
        }
        None => Ok(None),
    }
}

async fn put_record<R: Record>(
    conn: &Connection,
    mut record: R,
    expected_revision: Option<u64>,
) -> StoreResult<()> {
    let table = table_for(R::KIND);
    let next_revision = expected_revision.map_or(1, |rev| rev + 1);
    record.set_revision(next_revision);
    let doc = serde_json::to_string(&record)?;
    let is_trash = Value::Integer(i64::from(record.is_trash()));
    let modified_at = text(&record.modified_at().to_rfc3339());

    match expected_revision {
        None => {
            if stored_revision(conn, R::KIND, record.owner_id(), record.id())
                .await?
                .is_some()
            {
                return Err(StoreError::conflict(R::KIND, record.id(), "record already exists"));
            }
            // A record with this id under another owner also blocks the insert
            let sql = format!(
                "INSERT INTO {table} (id, owner_id, parent_id, is_trash, modified_at, revision, doc)
                 VALUES (?, ?, ?, ?, ?, ?, ?)"
            );
            conn.execute(
                &sql,
                vec![
                    text(record.id()),
                    text(record.owner_id()),
                    opt_text(record.parent_id()),
                    is_trash,
                    modified_at,
                    Value::Integer(next_revision as i64),
                    Value::Text(doc),
                ],
            )
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("UNIQUE constraint failed") {
                    StoreError::conflict(R::KIND, record.id(), "record already exists")
                } else {
                    map_libsql(R::KIND, record.id())(e)
                }
            })?;
        }
        Some(expected) => {
            let sql = format!(
                "UPDATE {table}
                 SET parent_id = ?, is_trash = ?, modified_at = ?, revision = ?, doc = ?
                 WHERE id = ? AND owner_id = ? AND revision = ?"
            );
            let affected = conn
                .execute(
                    &sql,
                    vec![
                        opt_text(record.parent_id()),
                        is_trash,
                        modified_at,
                        Value::Integer(next_revision as i64),
                        Value::Text(doc),
                        text(record.id()),
                        text(record.owner_id()),
                        Value::Integer(expected as i64),
                    ],
                )
                .await
                .map_err(map_libsql(R::KIND, record.id()))?;
            if affected == 0 {
                return Err(StoreError::conflict(
                    R::KIND,
                    record.id(),
                    format!("expected revision {} is stale", expected),
                ));
            }
        }
    }
    Ok(())
}

async fn apply_mutation(conn: &Connection, mutation: Mutation) -> StoreResult<()> {
    match mutation {
        Mutation::PutCollection {
            record,
            expected_revision,
        } => put_record::<Collection>(conn, record, expected_revision).await,
        Mutation::PutContent {
            record,
            expected_revision,
        } => put_record::<Content>(conn, record, expected_revision).await,
        Mutation::Delete {
            kind,
            owner_id,
            id,
            expected_revision,
        } => {
            let sql = format!(
                "DELETE FROM {} WHERE id = ? AND owner_id = ? AND revision = ?",
                table_for(kind)
            );
            let affected = conn
                .execute(
                    &sql,
                    vec![
                        text(&id),
                        text(&owner_id),
                        Value::Integer(expected_revision as i64),
                    ],
                )
                .await
                .map_err(map_libsql(kind, &id))?;
            if affected == 0 {
                return Err(StoreError::conflict(kind, &id, "record changed or vanished"));
            }
            Ok(())
        }
        Mutation::Assert {
            kind,
            owner_id,
            id,
            expected_revision,
        } => match stored_revision(conn, kind, &owner_id, &id).await? {
            Some(revision) if revision == expected_revision => Ok(()),
            Some(revision) => Err(StoreError::conflict(
                kind,
                &id,
                format!("expected revision {}, found {}", expected_revision, revision),
            )),
            None => Err(StoreError::conflict(kind, &id, "record no longer exists")),
        },
    }
}

#[async_trait]
impl NodeStore for TursoStore {
    async fn get_collection(&self, owner_id: &str, id: &str) -> StoreResult<Option<Collection>> {
        self.get_record::<Collection>(owner_id, id).await
    }

    async fn get_content(&self, owner_id: &str, id: &str) -> StoreResult<Option<Content>> {
        self.get_record::<Content>(owner_id, id).await
    }

    async fn list_collections(&self, filter: &NodeFilter) -> StoreResult<Vec<Collection>> {
        self.list_records::<Collection>(filter).await
    }

    async fn list_content(&self, filter: &NodeFilter) -> StoreResult<Vec<Content>> {
        self.list_records::<Content>(filter).await
    }

    async fn count_children(
        &self,
        owner_id: &str,
        parent_id: &str,
        kind: NodeKind,
    ) -> StoreResult<u64> {
        let conn = self.connect().await?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE owner_id = ? AND parent_id = ? AND is_trash = 0",
            table_for(kind)
        );
        let mut rows = conn
            .query(&sql, vec![text(owner_id), text(parent_id)])
            .await
            .map_err(StoreError::Libsql)?;
        let count = match rows.next().await.map_err(StoreError::Libsql)? {
            Some(row) => row.get::<i64>(0).map_err(StoreError::Libsql)?,
            None => 0,
        };
        Ok(count as u64)
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("database is locked") || message.contains("SQLITE_BUSY") {
                    StoreError::Unavailable(message)
                } else {
                    StoreError::Libsql(e)
                }
            })?;

        for mutation in batch.mutations {
            // Dropping `tx` on the error path rolls the transaction back
            apply_mutation(&tx, mutation).await?;
        }

        tx.commit().await.map_err(StoreError::Libsql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (TursoStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = TursoStore::new(temp_dir.path().join("folio.db"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_round_trip_preserves_document_and_revision() {
        let (store, _temp) = create_test_store().await;
        let mut root = Collection::new("alice", "Root", None).unwrap();
        root.tags = vec!["math".into()];

        let mut batch = WriteBatch::new();
        batch.insert_collection(root.clone());
        store.commit(batch).await.unwrap();

        let stored = store
            .get_collection("alice", &root.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.tags, vec!["math".to_string()]);
        assert_eq!(stored.revision, 1);
        assert!(store.get_collection("bob", &root.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_guard_rolls_back_batch() {
        let (store, _temp) = create_test_store().await;
        let root = Collection::new("alice", "Root", None).unwrap();
        let lesson = Content::new("alice", "Lesson", None, Some(root.id.clone())).unwrap();

        let mut batch = WriteBatch::new();
        batch.insert_collection(root.clone());
        store.commit(batch).await.unwrap();

        let mut trashed = root.clone();
        trashed.is_trash = true;
        let mut batch = WriteBatch::new();
        batch.insert_content(lesson.clone());
        batch.push(Mutation::PutCollection {
            record: trashed,
            expected_revision: Some(5),
        });
        assert!(store.commit(batch).await.unwrap_err().is_conflict());

        assert!(store
            .get_content("alice", &lesson.id)
            .await
            .unwrap()
            .is_none());
        let root_now = store
            .get_collection("alice", &root.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!root_now.is_trash);
    }

    #[tokio::test]
    async fn test_listing_uses_parent_and_trash_filters() {
        let (store, _temp) = create_test_store().await;
        let root = Collection::new("alice", "Root", None).unwrap();
        let live = Content::new("alice", "Live", None, Some(root.id.clone())).unwrap();
        let mut gone = Content::new("alice", "Gone", None, Some(root.id.clone())).unwrap();
        gone.is_trash = true;

        let mut batch = WriteBatch::new();
        batch.insert_collection(root.clone());
        batch.insert_content(live.clone());
        batch.insert_content(gone.clone());
        store.commit(batch).await.unwrap();

        let under_root =
            NodeFilter::owner("alice").with_parent(ParentScope::Under(root.id.clone()));
        let active = store
            .list_content(&under_root.clone().with_trash(TrashFilter::ActiveOnly))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);

        let trashed = store
            .list_content(&NodeFilter::owner("alice").with_trash(TrashFilter::TrashedOnly))
            .await
            .unwrap();
        assert_eq!(trashed.len(), 1);

        let roots = store
            .list_collections(&NodeFilter::owner("alice").with_parent(ParentScope::Root))
            .await
            .unwrap();
        assert_eq!(roots.len(), 1);

        assert_eq!(
            store
                .count_children("alice", &root.id, NodeKind::Content)
                .await
                .unwrap(),
            1
        );
    }
}
