//! Turso Store Tests
//!
//! Runs the service against the embedded libsql backend and reopens the
//! database file to check that committed trees persist.

#![cfg(feature = "turso")]

#[cfg(test)]
mod turso_store_tests {
    use anyhow::Result;
    use folio_core::models::NodeKind;
    use folio_core::services::{TreeError, TreeService};
    use folio_core::StoreConfig;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const OWNER: &str = "owner-1";

    async fn create_test_service() -> Result<(TreeService, TempDir, PathBuf)> {
        folio_core::logging::init_test_tracing();
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("folio.db");
        let config = StoreConfig {
            database_path: Some(db_path.clone()),
            ..StoreConfig::default()
        };
        let service = TreeService::open(config).await?;
        Ok((service, temp_dir, db_path))
    }

    #[tokio::test]
    async fn test_tree_survives_reopen() -> Result<()> {
        let (service, _temp_dir, db_path) = create_test_service().await?;
        let root = service.create_collection(OWNER, "Root", None, None).await?;
        let a = service
            .create_content(OWNER, "A", None, Some(root.id.as_str()))
            .await?;
        let b = service
            .create_content(OWNER, "B", None, Some(root.id.as_str()))
            .await?;
        service
            .set_order(OWNER, &root.id, vec![], vec![b.id.clone(), a.id.clone()])
            .await?;
        service
            .set_prerequisites(OWNER, &b.id, vec![a.id.clone()])
            .await?;
        drop(service);

        let reopened = TreeService::open(StoreConfig {
            database_path: Some(db_path),
            ..StoreConfig::default()
        })
        .await?;
        let root = reopened.get_collection(OWNER, &root.id).await?;
        assert_eq!(root.child_content, vec![b.id.clone(), a.id.clone()]);
        let graph = reopened.get_prerequisite_graph(OWNER, &root.id).await?;
        assert!(graph.has_edge(&a.id, &b.id));
        assert!(reopened.audit_owner(OWNER).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_trash_restore_purge_on_disk() -> Result<()> {
        let (service, _temp_dir, _) = create_test_service().await?;
        let a = service.create_collection(OWNER, "A", None, None).await?;
        let b = service
            .create_collection(OWNER, "B", None, Some(a.id.as_str()))
            .await?;
        let c = service
            .create_content(OWNER, "C", None, Some(b.id.as_str()))
            .await?;

        service.trash(OWNER, &a.id, NodeKind::Collection).await?;
        assert_eq!(service.list_trash(OWNER).await?.len(), 3);

        service.restore(OWNER, &a.id, NodeKind::Collection).await?;
        assert!(service.get_collection(OWNER, &b.id).await?.is_trash);

        service.purge(OWNER, &b.id, NodeKind::Collection).await?;
        let err = service.get_content(OWNER, &c.id).await.unwrap_err();
        assert!(matches!(err, TreeError::NotFound { .. }));
        assert!(service
            .get_collection(OWNER, &a.id)
            .await?
            .child_collections
            .is_empty());

        let tree = service.get_tree(OWNER, None).await?;
        assert_eq!(tree.collections.len(), 1);
        assert_eq!(tree.collections[0].child_collection_count, 0);
        assert!(service.audit_owner(OWNER).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_owner_isolation_on_disk() -> Result<()> {
        let (service, _temp_dir, _) = create_test_service().await?;
        let root = service.create_collection(OWNER, "Root", None, None).await?;

        let err = service.get_collection("owner-2", &root.id).await.unwrap_err();
        assert!(matches!(err, TreeError::NotFound { .. }));
        assert!(service.get_tree("owner-2", None).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_move_cycle_rejected_on_disk() -> Result<()> {
        let (service, _temp_dir, _) = create_test_service().await?;
        let a = service.create_collection(OWNER, "A", None, None).await?;
        let b = service
            .create_collection(OWNER, "B", None, Some(a.id.as_str()))
            .await?;

        let err = service
            .move_node(OWNER, &a.id, Some(b.id.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::CyclicReference { .. }));
        assert!(service.get_collection(OWNER, &a.id).await?.parent_id.is_none());
        Ok(())
    }
}
