//! Concurrency Tests
//!
//! Racing commands against the same subtree must serialize or fail with a
//! retryable conflict; they never leave a half-applied tree behind.

#[cfg(test)]
mod concurrency_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use folio_core::db::{NodeFilter, NodeStore, StoreError, WriteBatch};
    use folio_core::models::{Collection, Content, NodeKind};
    use folio_core::services::{TreeError, TreeService};
    use folio_core::{MemoryStore, StoreConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time::Duration;

    const OWNER: &str = "owner-1";

    /// Delays commits, optionally forever-ish, to widen race windows
    struct SlowStore {
        inner: MemoryStore,
        commit_delay: Duration,
        stalled: AtomicBool,
    }

    impl SlowStore {
        fn new(commit_delay: Duration) -> Self {
            Self {
                inner: MemoryStore::new(),
                commit_delay,
                stalled: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl NodeStore for SlowStore {
        async fn get_collection(
            &self,
            owner_id: &str,
            id: &str,
        ) -> Result<Option<Collection>, StoreError> {
            self.inner.get_collection(owner_id, id).await
        }

        async fn get_content(
            &self,
            owner_id: &str,
            id: &str,
        ) -> Result<Option<Content>, StoreError> {
            self.inner.get_content(owner_id, id).await
        }

        async fn list_collections(
            &self,
            filter: &NodeFilter,
        ) -> Result<Vec<Collection>, StoreError> {
            self.inner.list_collections(filter).await
        }

        async fn list_content(&self, filter: &NodeFilter) -> Result<Vec<Content>, StoreError> {
            self.inner.list_content(filter).await
        }

        async fn count_children(
            &self,
            owner_id: &str,
            parent_id: &str,
            kind: NodeKind,
        ) -> Result<u64, StoreError> {
            self.inner.count_children(owner_id, parent_id, kind).await
        }

        async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
            if self.stalled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            } else {
                tokio::time::sleep(self.commit_delay).await;
            }
            self.inner.commit(batch).await
        }
    }

    fn create_test_service(store: Arc<dyn NodeStore>) -> Result<TreeService> {
        folio_core::logging::init_test_tracing();
        Ok(TreeService::new(store, StoreConfig::default())?)
    }

    fn is_retryable_or_rejected(err: &TreeError) -> bool {
        matches!(
            err,
            TreeError::TransactionConflict(_)
                | TreeError::InvalidState { .. }
                | TreeError::OrderMismatch { .. }
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_trash_racing_create_never_leaves_live_child_under_trash() -> Result<()> {
        let store = Arc::new(SlowStore::new(Duration::from_millis(5)));
        let service = create_test_service(store)?;

        for _ in 0..10 {
            let a = service.create_collection(OWNER, "A", None, None).await?;
            let b = service
                .create_collection(OWNER, "B", None, Some(a.id.as_str()))
                .await?;

            let trasher = service.clone();
            let creator = service.clone();
            let a_id = a.id.clone();
            let b_id = b.id.clone();
            let trash = tokio::spawn(async move {
                trasher.trash(OWNER, &a_id, NodeKind::Collection).await
            });
            let create = tokio::spawn(async move {
                creator
                    .create_content(OWNER, "Late", None, Some(b_id.as_str()))
                    .await
            });
            let (trash, create) = (trash.await?, create.await?);

            if let Err(err) = &trash {
                assert!(is_retryable_or_rejected(err), "unexpected error: {err}");
            }
            if let Err(err) = &create {
                assert!(is_retryable_or_rejected(err), "unexpected error: {err}");
            }

            if trash.is_ok() {
                let b_children = service
                    .get_collection_with_ordered_children(OWNER, &b.id, true)
                    .await?;
                assert!(service.get_collection(OWNER, &b.id).await?.is_trash);
                assert!(b_children.child_content.iter().all(|c| c.is_trash));
            }
            if let Ok(created) = &create {
                let b = service.get_collection(OWNER, &b.id).await?;
                assert_eq!(b.child_content, vec![created.id.clone()]);
            }
            assert!(service.audit_owner(OWNER).await?.is_empty());
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reorder_racing_create_never_drops_a_child() -> Result<()> {
        let store = Arc::new(SlowStore::new(Duration::from_millis(5)));
        let service = create_test_service(store)?;

        for _ in 0..10 {
            let root = service.create_collection(OWNER, "Root", None, None).await?;
            let x = service
                .create_content(OWNER, "X", None, Some(root.id.as_str()))
                .await?;
            let y = service
                .create_content(OWNER, "Y", None, Some(root.id.as_str()))
                .await?;

            let reorderer = service.clone();
            let creator = service.clone();
            let root_id = root.id.clone();
            let order = vec![y.id.clone(), x.id.clone()];
            let reorder = tokio::spawn(async move {
                reorderer.set_order(OWNER, &root_id, vec![], order).await
            });
            let root_id = root.id.clone();
            let create = tokio::spawn(async move {
                creator
                    .create_content(OWNER, "Z", None, Some(root_id.as_str()))
                    .await
            });
            let (reorder, create) = (reorder.await?, create.await?);

            if let Err(err) = &reorder {
                assert!(is_retryable_or_rejected(err), "unexpected error: {err}");
            }
            let stored = service.get_collection(OWNER, &root.id).await?;
            match create {
                Ok(z) => {
                    assert!(stored.child_content.contains(&z.id));
                    assert_eq!(stored.child_content.len(), 3);
                }
                Err(err) => {
                    assert!(is_retryable_or_rejected(&err), "unexpected error: {err}");
                    assert_eq!(stored.child_content.len(), 2);
                }
            }
            assert!(service.audit_owner(OWNER).await?.is_empty());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_slow_commit_times_out_without_partial_writes() -> Result<()> {
        let store = Arc::new(SlowStore::new(Duration::ZERO));
        let config = StoreConfig {
            transaction_timeout_ms: 50,
            ..StoreConfig::default()
        };
        let service = TreeService::new(store.clone(), config)?;

        let root = service.create_collection(OWNER, "Root", None, None).await?;
        service
            .create_content(OWNER, "Lesson", None, Some(root.id.as_str()))
            .await?;

        store.stalled.store(true, Ordering::SeqCst);
        let err = service
            .trash(OWNER, &root.id, NodeKind::Collection)
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::TransactionTimeout { .. }));
        assert!(err.is_retryable());

        store.stalled.store(false, Ordering::SeqCst);
        assert!(service.list_trash(OWNER).await?.is_empty());
        assert!(!service.get_collection(OWNER, &root.id).await?.is_trash);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_keyed_request_can_be_retried() -> Result<()> {
        let store = Arc::new(SlowStore::new(Duration::ZERO));
        let service = create_test_service(store.clone())?;
        let keyed = service.with_idempotency_key("req-1");

        store.stalled.store(true, Ordering::SeqCst);
        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            keyed.create_collection(OWNER, "Root", None, None),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(service.get_tree(OWNER, None).await?.is_empty());

        store.stalled.store(false, Ordering::SeqCst);
        let created = keyed.create_collection(OWNER, "Root", None, None).await?;
        let replayed = keyed.create_collection(OWNER, "Root", None, None).await?;
        assert_eq!(created.id, replayed.id);

        let tree = service.get_tree(OWNER, None).await?;
        assert_eq!(tree.collections.len(), 1);
        assert_eq!(tree.collections[0].collection.id, created.id);
        Ok(())
    }
}
