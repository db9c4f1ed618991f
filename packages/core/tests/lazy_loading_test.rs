//! Lazy Loading Tests
//!
//! A session only renders some of a book's chunks; the rest live in the
//! store. Overflow, renumbering and structure repair must treat the stored
//! chunks as part of the document: never collide with them, never lose
//! them, and keep them reachable afterwards.

#[cfg(test)]
mod lazy_loading_tests {
    use anyhow::Result;
    use hyperlit_core::operations::ManualFrameHost;
    use hyperlit_core::surface::{
        chunk_containers, chunk_id_of, EditingSurface, MemorySurface, NODE_ID_ATTR, STABLE_ID_ATTR,
    };
    use hyperlit_core::{
        ChunkId, EditorConfig, InMemoryNodeStore, NodeIdentifier, NodeRecord, NodeStore,
        OperationCoordinator, StableId,
    };
    use std::sync::Arc;

    type Session = OperationCoordinator<MemorySurface, ManualFrameHost>;

    fn record(id: u64, chunk: u64, text: &str) -> NodeRecord {
        NodeRecord::new(
            "book",
            NodeIdentifier::Integer(id),
            StableId(format!("stable_{}", id)),
            ChunkId::new(chunk),
            format!("<p id=\"{}\">{}</p>", id, text),
        )
    }

    /// Store every `(id, chunk, text)` node; render only the chunks in `loaded`
    fn session(
        nodes: &[(u64, u64, &str)],
        loaded: &[u64],
        node_limit: usize,
    ) -> (Session, Arc<InMemoryNodeStore>) {
        let ids: Vec<String> = nodes.iter().map(|(id, _, _)| id.to_string()).collect();
        let rendered: Vec<(u64, Vec<(&str, &str)>)> = loaded
            .iter()
            .map(|chunk| {
                let blocks = nodes
                    .iter()
                    .zip(&ids)
                    .filter(|((_, c, _), _)| c == chunk)
                    .map(|((_, _, text), id)| (id.as_str(), *text))
                    .collect();
                (*chunk, blocks)
            })
            .collect();

        let mut surface = MemorySurface::with_chunks("book", &rendered);
        for id in &ids {
            if let Some(el) = surface.find_by_id(id) {
                surface.set_attr(el, STABLE_ID_ATTR, &format!("stable_{}", id));
            }
        }
        surface.take_records();

        let records = nodes.iter().map(|(id, chunk, text)| record(*id, *chunk, text));
        let store = Arc::new(InMemoryNodeStore::with_records(records));
        let config = EditorConfig {
            node_limit,
            ..EditorConfig::default()
        };
        let coordinator =
            OperationCoordinator::new("book", config, surface, ManualFrameHost::new(), store.clone())
                .unwrap();
        (coordinator, store)
    }

    fn chunk_order(surface: &MemorySurface) -> Vec<ChunkId> {
        chunk_containers(surface)
            .into_iter()
            .filter_map(|c| chunk_id_of(surface, c))
            .collect()
    }

    fn ints(ids: &[u64]) -> Vec<NodeIdentifier> {
        ids.iter().map(|n| NodeIdentifier::Integer(*n)).collect()
    }

    #[tokio::test]
    async fn test_overflow_does_not_collide_with_unloaded_chunk() -> Result<()> {
        let (mut coordinator, store) = session(
            &[(1, 0, "a"), (2, 0, "b"), (3, 0, "c"), (400, 1, "stored x"), (401, 1, "stored y")],
            &[0],
            3,
        );

        let last = coordinator.surface().find_by_id("3").unwrap();
        let block = coordinator.insert_block_after(Some(last), "p", "typed").await?;
        coordinator.surface_mut().set_attr(block, NODE_ID_ATTR, "103");
        let report = coordinator.on_animation_frame().await;

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.overflows.len(), 1);
        let destination = report.overflows[0].destination.clone();
        assert!(report.overflows[0].created);
        assert!(destination > ChunkId::new(0) && destination < ChunkId::new(1));

        let stored = store.range_by_chunk("book", &ChunkId::new(1)).await?;
        assert_eq!(
            stored.iter().map(|r| r.node_id.clone()).collect::<Vec<_>>(),
            ints(&[400, 401])
        );
        let migrated = store.get("book", &NodeIdentifier::Integer(103)).await?;
        assert_eq!(migrated.map(|r| r.chunk_id), Some(destination.clone()));

        // The stored chunk still renders in full, after the new one
        assert_eq!(coordinator.load_chunk(&ChunkId::new(1)).await?, 2);
        assert_eq!(
            chunk_order(coordinator.surface()),
            vec![ChunkId::new(0), destination, ChunkId::new(1)]
        );
        assert_eq!(coordinator.surface().block_ids(), ints(&[1, 2, 3, 103, 400, 401]));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_renumbering_keeps_unloaded_records() -> Result<()> {
        let (mut coordinator, store) =
            session(&[(1, 0, "loaded"), (400, 1, "unloaded")], &[0], 100);
        store.fail_writes("book", &NodeIdentifier::Integer(200), 1).await;

        assert!(!coordinator.request_renumbering().await);

        assert_eq!(store.len().await, 2);
        let kept = store.get("book", &NodeIdentifier::Integer(400)).await?.expect("400 survives");
        assert_eq!(kept.content, "<p id=\"400\">unloaded</p>");
        assert_eq!(kept.chunk_id, ChunkId::new(1));
        assert!(store.get("book", &NodeIdentifier::Integer(100)).await?.is_none());
        assert_eq!(coordinator.surface().block_ids(), ints(&[1]));

        // The injected failure is spent; a second request goes through
        assert!(coordinator.request_renumbering().await);
        assert_eq!(store.len().await, 2);
        let moved = store.get("book", &NodeIdentifier::Integer(200)).await?.unwrap();
        assert_eq!(moved.stable_id, StableId::from("stable_400"));
        assert!(store.get("book", &NodeIdentifier::Integer(400)).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_renumbering_renders_stored_members_of_loaded_chunks() -> Result<()> {
        let (mut coordinator, store) = session(
            &[(1, 0, "a"), (10, 1, "b"), (11, 1, "c"), (20, 2, "d"), (21, 2, "e")],
            &[0, 2],
            2,
        );

        assert!(coordinator.request_renumbering().await);

        let surface = coordinator.surface();
        assert_eq!(surface.block_ids(), ints(&[100, 200, 300, 400, 500]));
        assert_eq!(
            chunk_order(surface),
            vec![ChunkId::new(0), ChunkId::new(1), ChunkId::new(2)]
        );
        let old_eleven = surface.find_by_id("300").unwrap();
        assert_eq!(surface.text_content(old_eleven), "c");
        assert_eq!(surface.attr(old_eleven, STABLE_ID_ATTR).as_deref(), Some("stable_11"));

        let stored = store.get("book", &NodeIdentifier::Integer(300)).await?.unwrap();
        assert_eq!(stored.chunk_id, ChunkId::new(1));
        assert_eq!(coordinator.load_chunk(&ChunkId::new(1)).await?, 0);
        assert_eq!(store.len().await, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_removing_last_rendered_node_loads_a_stored_chunk() -> Result<()> {
        let (mut coordinator, store) =
            session(&[(1, 0, "first"), (500, 5, "last")], &[5], 100);

        let last = coordinator.surface().find_by_id("500").unwrap();
        coordinator.surface_mut().remove(last);
        let report = coordinator.on_animation_frame().await;

        let repaired = report.repaired.expect("structure repair ran");
        assert_eq!(repaired.loaded_chunk, Some(ChunkId::new(0)));
        assert_eq!(repaired.created_node, None);
        assert_eq!(coordinator.surface().block_ids(), ints(&[1]));

        coordinator.flush().await;
        assert!(store.get("book", &NodeIdentifier::Integer(500)).await?.is_none());
        let first = store.get("book", &NodeIdentifier::Integer(1)).await?.expect("1 untouched");
        assert_eq!(first.stable_id, StableId::from("stable_1"));
        assert_eq!(first.content, "<p id=\"1\">first</p>");
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_loaded_inline_markup_serializes_unchanged() -> Result<()> {
        let content = "<p id=\"7\" data-node-id=\"stable_7\">a <b>bold</b><br>x</p>";
        let store = Arc::new(InMemoryNodeStore::with_records(vec![NodeRecord::new(
            "book",
            NodeIdentifier::Integer(7),
            StableId::from("stable_7"),
            ChunkId::new(3),
            content,
        )]));
        let mut coordinator = OperationCoordinator::new(
            "book",
            EditorConfig::default(),
            MemorySurface::with_chunks("book", &[(0, vec![("1", "head")])]),
            ManualFrameHost::new(),
            store.clone(),
        )?;

        assert_eq!(coordinator.load_chunk(&ChunkId::new(3)).await?, 1);
        let block = coordinator.surface().find_by_id("7").unwrap();
        assert_eq!(coordinator.surface().serialize(block), content);
        assert_eq!(coordinator.surface().text_content(block), "a boldx");
        Ok(())
    }
}
