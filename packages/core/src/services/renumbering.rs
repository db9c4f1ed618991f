//! Renumbering
//!
//! Reassigns every identifier in a book to evenly spaced integers
//! (`gap`, `2 * gap`, ...) and re-partitions the nodes into chunks of
//! `node_limit`, keeping document order and stable ids. Runs when decimal
//! identifiers have nested too deep to keep subdividing.
//!
//! Requests are idempotent while one is outstanding: every caller gets a
//! ticket on the same in-flight run.

use super::error::EditorError;
use super::structure::bottom_sentinel_id;
use crate::config::EditorConfig;
use crate::db::NodeStore;
use crate::models::{ChunkId, NodeIdentifier, NodeRecord, StableId};
use crate::operations::{OperationGuards, Phase};
use crate::surface::{
    all_blocks, chunk_containers, rewrite_element_id, EditingSurface, ElementRef, CHUNK_CLASS,
    CHUNK_ID_ATTR, NODE_ID_ATTR, STABLE_ID_ATTR,
};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::watch;

/// Completion handle for a requested renumbering
#[derive(Debug, Clone)]
pub struct RenumberTicket {
    rx: watch::Receiver<Option<bool>>,
}

impl RenumberTicket {
    /// Wait for the in-flight renumbering; `true` when it succeeded
    pub async fn wait(mut self) -> bool {
        loop {
            if let Some(ok) = *self.rx.borrow_and_update() {
                return ok;
            }
            if self.rx.changed().await.is_err() {
                return (*self.rx.borrow()).unwrap_or(false);
            }
        }
    }

    /// Result if the run has already finished
    pub fn try_result(&self) -> Option<bool> {
        *self.rx.borrow()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenumberReport {
    pub node_count: usize,
    pub chunk_count: usize,
    /// Rewritten records, ready for upstream sync
    pub records: Vec<NodeRecord>,
    /// `(old, new)` identifier pairs in document order
    pub mapping: Vec<(NodeIdentifier, NodeIdentifier)>,
}

struct Entry {
    old_id: NodeIdentifier,
    record: NodeRecord,
    element: Option<ElementRef>,
    /// Record as stored before the run, `None` for surface-only blocks
    original: Option<NodeRecord>,
}

pub struct RenumberingEngine {
    book: String,
    gap: u64,
    node_limit: usize,
    in_flight: Option<watch::Sender<Option<bool>>>,
}

impl RenumberingEngine {
    pub fn new(book: impl Into<String>, config: &EditorConfig) -> Self {
        Self {
            book: book.into(),
            gap: config.renumber_gap,
            node_limit: config.node_limit,
            in_flight: None,
        }
    }

    /// Ask for a renumbering. Returns the ticket and whether this call
    /// started a new request (`false` when one was already outstanding).
    pub fn request(&mut self) -> (RenumberTicket, bool) {
        if let Some(tx) = &self.in_flight {
            return (RenumberTicket { rx: tx.subscribe() }, false);
        }
        let (tx, rx) = watch::channel(None);
        self.in_flight = Some(tx);
        tracing::debug!("Renumbering of '{}' requested", self.book);
        (RenumberTicket { rx }, true)
    }

    pub fn is_requested(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Resolve every outstanding ticket
    pub fn complete(&mut self, ok: bool) {
        if let Some(tx) = self.in_flight.take() {
            tx.send_replace(Some(ok));
        }
    }

    /// Renumber the whole book in the store and on the surface.
    ///
    /// Pending saves must be flushed before calling. Records produced on the
    /// surface by the re-partition are left for the caller to discard.
    pub async fn run<S: EditingSurface + ?Sized>(
        &self,
        surface: &mut S,
        store: &dyn NodeStore,
        guards: &OperationGuards,
    ) -> Result<RenumberReport, EditorError> {
        let _guard = guards.enter(Phase::Renumbering);
        let mut entries = self.collect(surface, store).await?;
        let node_count = entries.len();
        let chunk_count = node_count.div_ceil(self.node_limit.max(1));
        tracing::info!(
            "Renumbering {} node(s) of '{}' into {} chunk(s)",
            node_count,
            self.book,
            chunk_count
        );

        let mut mapping = Vec::with_capacity(node_count);
        for (i, entry) in entries.iter_mut().enumerate() {
            let new_id = NodeIdentifier::Integer((i as u64 + 1) * self.gap);
            let new_raw = new_id.to_string();
            entry.record.content = rewrite_element_id(&entry.record.content, &new_raw);
            entry.record.node_id = new_id.clone();
            entry.record.chunk_id = ChunkId::new((i / self.node_limit.max(1)) as u64);
            mapping.push((entry.old_id.clone(), new_id));
        }

        self.write(store, &entries).await?;
        self.repartition(surface, &entries);

        Ok(RenumberReport {
            node_count,
            chunk_count,
            records: entries.into_iter().map(|e| e.record).collect(),
            mapping,
        })
    }

    /// Put every renumbered record, then delete the old keys nothing was
    /// written over. Any failure restores the original records before the
    /// error is returned, so no node is lost.
    async fn write(&self, store: &dyn NodeStore, entries: &[Entry]) -> Result<(), EditorError> {
        let old_keys: HashSet<&NodeIdentifier> = entries
            .iter()
            .filter(|e| e.original.is_some())
            .map(|e| &e.old_id)
            .collect();
        let new_keys: HashSet<&NodeIdentifier> = entries.iter().map(|e| &e.record.node_id).collect();

        let mut written: Vec<&NodeIdentifier> = Vec::with_capacity(entries.len());
        let mut failure = None;
        for entry in entries {
            match store.put(entry.record.clone()).await {
                Ok(()) => written.push(&entry.record.node_id),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if failure.is_none() {
            for old_id in old_keys.iter().filter(|id| !new_keys.contains(*id)) {
                if let Err(e) = store.delete(&self.book, old_id).await {
                    failure = Some(e);
                    break;
                }
            }
        }

        let Some(error) = failure else {
            return Ok(());
        };
        tracing::error!("Renumbering of '{}' failed, restoring records: {}", self.book, error);
        for new_id in written.into_iter().filter(|id| !old_keys.contains(id)) {
            if let Err(e) = store.delete(&self.book, new_id).await {
                tracing::warn!("Could not remove renumbered record {}: {}", new_id, e);
            }
        }
        for original in entries.iter().filter_map(|e| e.original.as_ref()) {
            if let Err(e) = store.put(original.clone()).await {
                tracing::warn!("Could not restore record {}: {}", original.node_id, e);
            }
        }
        Err(error.into())
    }

    /// Stored records merged with blocks that so far exist only on the
    /// surface, in old identifier order
    async fn collect<S: EditingSurface + ?Sized>(
        &self,
        surface: &S,
        store: &dyn NodeStore,
    ) -> Result<Vec<Entry>, EditorError> {
        let mut merged: BTreeMap<NodeIdentifier, Entry> = store
            .all_for_book(&self.book)
            .await?
            .into_iter()
            .map(|record| {
                (
                    record.node_id.clone(),
                    Entry {
                        old_id: record.node_id.clone(),
                        original: Some(record.clone()),
                        record,
                        element: None,
                    },
                )
            })
            .collect();

        for (element, id) in all_blocks(surface) {
            let content = surface.serialize(element);
            match merged.get_mut(&id) {
                Some(entry) => {
                    entry.element = Some(element);
                    entry.record.content = content;
                }
                None => {
                    let stable_id = surface
                        .attr(element, STABLE_ID_ATTR)
                        .map(StableId)
                        .unwrap_or_else(|| StableId::generate(&self.book));
                    let record = NodeRecord::new(
                        self.book.clone(),
                        id.clone(),
                        stable_id,
                        ChunkId::new(0),
                        content,
                    );
                    merged.insert(
                        id.clone(),
                        Entry {
                            old_id: id,
                            record,
                            element: Some(element),
                            original: None,
                        },
                    );
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Rebuild the chunk containers so each holds its new members in order.
    ///
    /// A new chunk with at least one loaded member is rendered in full:
    /// members that were only stored are built from their rewritten content,
    /// since a chunk already on the surface is never loaded again. Chunks
    /// without loaded members stay unloaded.
    fn repartition<S: EditingSurface + ?Sized>(&self, surface: &mut S, entries: &[Entry]) {
        let caret = surface.caret();
        let root = surface.root();

        let loaded: HashSet<&ChunkId> = entries
            .iter()
            .filter(|e| e.element.is_some())
            .map(|e| &e.record.chunk_id)
            .collect();

        let mut containers: BTreeMap<ChunkId, ElementRef> = BTreeMap::new();
        let mut materialized = 0;
        for entry in entries.iter().filter(|e| loaded.contains(&e.record.chunk_id)) {
            let element = match entry.element {
                Some(element) => element,
                None => match surface.create_from_markup(&entry.record.content) {
                    Some(element) => {
                        materialized += 1;
                        element
                    }
                    None => {
                        tracing::warn!(
                            "Stored content of {} is not a single block, leaving it unrendered",
                            entry.record.node_id
                        );
                        continue;
                    }
                },
            };
            surface.set_attr(element, NODE_ID_ATTR, &entry.record.node_id.to_string());
            surface.set_attr(element, STABLE_ID_ATTR, entry.record.stable_id.as_str());

            let container = *containers
                .entry(entry.record.chunk_id.clone())
                .or_insert_with(|| {
                    let container = surface.create_element("div");
                    surface.set_attr(container, "class", CHUNK_CLASS);
                    surface.set_attr(container, CHUNK_ID_ATTR, &entry.record.chunk_id.to_string());
                    container
                });
            surface.insert_before(container, element, None);
        }
        if materialized > 0 {
            tracing::debug!("Rendered {} stored node(s) joining loaded chunks", materialized);
        }

        for old in chunk_containers(surface) {
            surface.remove(old);
        }
        let bottom = surface.find_by_id(&bottom_sentinel_id(&self.book));
        for container in containers.into_values() {
            surface.insert_before(root, container, bottom);
        }

        if let Some(caret) = caret {
            if surface.is_attached(caret.node) {
                surface.set_caret(caret.node, caret.offset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryNodeStore;
    use crate::surface::{blocks_in, chunk_id_of, MemorySurface};

    fn config(limit: usize) -> EditorConfig {
        EditorConfig {
            node_limit: limit,
            ..EditorConfig::default()
        }
    }

    fn id(raw: &str) -> NodeIdentifier {
        NodeIdentifier::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_request_is_idempotent() {
        let mut engine = RenumberingEngine::new("book", &config(100));
        let (first, started) = engine.request();
        assert!(started);
        let (second, started_again) = engine.request();
        assert!(!started_again);
        assert!(engine.is_requested());

        engine.complete(true);
        assert!(first.wait().await);
        assert!(second.wait().await);
        assert!(!engine.is_requested());
    }

    #[test]
    fn test_ticket_stays_pending_until_completed() {
        let mut engine = RenumberingEngine::new("book", &config(100));
        let (ticket, _) = engine.request();
        assert_eq!(ticket.try_result(), None);

        let mut waiting = tokio_test::task::spawn(ticket.wait());
        tokio_test::assert_pending!(waiting.poll());

        engine.complete(false);
        assert!(waiting.is_woken());
        assert!(!tokio_test::assert_ready!(waiting.poll()));
    }

    #[tokio::test]
    async fn test_renumbers_store_and_surface() {
        let mut surface = MemorySurface::with_chunks(
            "book",
            &[
                (0, vec![("1", "a"), ("1.1", "b"), ("1.11", "c")]),
                (1, vec![("1.111", "d"), ("2", "e")]),
            ],
        );
        let stable_before: Vec<Option<String>> = all_blocks(&surface)
            .into_iter()
            .map(|(el, _)| surface.attr(el, STABLE_ID_ATTR))
            .collect();

        let store = InMemoryNodeStore::new();
        store
            .put(NodeRecord::new(
                "book",
                id("1.1"),
                StableId(stable_before[1].clone().unwrap()),
                ChunkId::new(0),
                "<p id=\"1.1\">b</p>",
            ))
            .await
            .unwrap();

        let engine = RenumberingEngine::new("book", &config(2));
        let guards = OperationGuards::new();
        let report = engine.run(&mut surface, &store, &guards).await.unwrap();

        assert_eq!(report.node_count, 5);
        assert_eq!(report.chunk_count, 3);
        assert_eq!(
            surface.block_ids(),
            vec![
                NodeIdentifier::Integer(100),
                NodeIdentifier::Integer(200),
                NodeIdentifier::Integer(300),
                NodeIdentifier::Integer(400),
                NodeIdentifier::Integer(500),
            ]
        );
        let stable_after: Vec<Option<String>> = all_blocks(&surface)
            .into_iter()
            .map(|(el, _)| surface.attr(el, STABLE_ID_ATTR))
            .collect();
        assert_eq!(stable_before, stable_after);

        let sizes: Vec<(ChunkId, usize)> = chunk_containers(&surface)
            .into_iter()
            .map(|c| (chunk_id_of(&surface, c).unwrap(), blocks_in(&surface, c).len()))
            .collect();
        assert_eq!(
            sizes,
            vec![(ChunkId::new(0), 2), (ChunkId::new(1), 2), (ChunkId::new(2), 1)]
        );

        assert!(store.get("book", &id("1.1")).await.unwrap().is_none());
        let record = store
            .get("book", &NodeIdentifier::Integer(200))
            .await
            .unwrap()
            .unwrap();
        assert!(record.content.starts_with("<p id=\"200\""));
        assert_eq!(record.chunk_id, ChunkId::new(0));
        assert_eq!(store.len().await, 5);
        assert!(!guards.is_active(Phase::Renumbering));
    }

    #[tokio::test]
    async fn test_stored_only_records_are_renumbered() {
        let mut surface = MemorySurface::with_chunks("book", &[(0, vec![("5", "loaded")])]);
        let store = InMemoryNodeStore::with_records(vec![
            NodeRecord::new("book", id("5"), StableId::from("s5"), ChunkId::new(0), "<p id=\"5\">loaded</p>"),
            NodeRecord::new("book", id("7"), StableId::from("s7"), ChunkId::new(1), "<p id=\"7\">unloaded</p>")
                .with_annotations(vec![serde_json::json!({"type": "highlight"})]),
        ]);

        let engine = RenumberingEngine::new("book", &config(100));
        let report = engine
            .run(&mut surface, &store, &OperationGuards::new())
            .await
            .unwrap();

        assert_eq!(
            report.mapping,
            vec![
                (id("5"), NodeIdentifier::Integer(100)),
                (id("7"), NodeIdentifier::Integer(200)),
            ]
        );
        let moved = store
            .get("book", &NodeIdentifier::Integer(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.stable_id, StableId::from("s7"));
        assert_eq!(moved.annotations.len(), 1);
        assert_eq!(moved.content, "<p id=\"200\">unloaded</p>");
        // 200 joins the loaded chunk 0, so it is rendered with it
        assert_eq!(
            surface.block_ids(),
            vec![NodeIdentifier::Integer(100), NodeIdentifier::Integer(200)]
        );
        let rendered = surface.find_by_id("200").unwrap();
        assert_eq!(surface.attr(rendered, STABLE_ID_ATTR).as_deref(), Some("s7"));
    }

    #[tokio::test]
    async fn test_chunks_without_loaded_members_stay_unloaded() {
        let mut surface = MemorySurface::with_chunks("book", &[(0, vec![("5", "loaded")])]);
        let store = InMemoryNodeStore::with_records(vec![
            NodeRecord::new("book", id("5"), StableId::from("s5"), ChunkId::new(0), "<p id=\"5\">loaded</p>"),
            NodeRecord::new("book", id("7"), StableId::from("s7"), ChunkId::new(1), "<p id=\"7\">x</p>"),
            NodeRecord::new("book", id("8"), StableId::from("s8"), ChunkId::new(1), "<p id=\"8\">y</p>"),
        ]);

        let engine = RenumberingEngine::new("book", &config(1));
        engine
            .run(&mut surface, &store, &OperationGuards::new())
            .await
            .unwrap();

        assert_eq!(surface.block_ids(), vec![NodeIdentifier::Integer(100)]);
        assert_eq!(chunk_containers(&surface).len(), 1);
        let third = store
            .get("book", &NodeIdentifier::Integer(300))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third.chunk_id, ChunkId::new(2));
    }

    #[tokio::test]
    async fn test_failed_write_restores_every_record() {
        let mut surface = MemorySurface::with_chunks("book", &[(0, vec![("1", "loaded")])]);
        let store = InMemoryNodeStore::with_records(vec![
            NodeRecord::new("book", id("1"), StableId::from("s1"), ChunkId::new(0), "<p id=\"1\">loaded</p>"),
            NodeRecord::new("book", id("400"), StableId::from("s4"), ChunkId::new(1), "<p id=\"400\">unloaded</p>"),
        ]);
        store.fail_writes("book", &NodeIdentifier::Integer(200), 1).await;

        let guards = OperationGuards::new();
        let engine = RenumberingEngine::new("book", &config(100));
        let err = engine.run(&mut surface, &store, &guards).await.unwrap_err();
        assert!(matches!(err, EditorError::Store(_)));

        assert_eq!(store.len().await, 2);
        let kept = store.get("book", &id("400")).await.unwrap().unwrap();
        assert_eq!(kept.content, "<p id=\"400\">unloaded</p>");
        assert_eq!(kept.chunk_id, ChunkId::new(1));
        assert!(store.get("book", &NodeIdentifier::Integer(100)).await.unwrap().is_none());
        assert_eq!(surface.block_ids(), vec![NodeIdentifier::Integer(1)]);
        assert!(!guards.is_active(Phase::Renumbering));
    }

    #[tokio::test]
    async fn test_overlapping_old_and_new_keys_are_kept() {
        let mut surface = MemorySurface::with_chunks("book", &[(0, vec![("100", "a"), ("150", "b")])]);
        let store = InMemoryNodeStore::with_records(vec![
            NodeRecord::new("book", id("100"), StableId::from("a"), ChunkId::new(0), "<p id=\"100\">a</p>"),
            NodeRecord::new("book", id("150"), StableId::from("b"), ChunkId::new(0), "<p id=\"150\">b</p>"),
        ]);

        RenumberingEngine::new("book", &config(100))
            .run(&mut surface, &store, &OperationGuards::new())
            .await
            .unwrap();

        assert_eq!(store.len().await, 2);
        let first = store.get("book", &id("100")).await.unwrap().unwrap();
        assert_eq!(first.stable_id, StableId::from("a"));
        let second = store.get("book", &id("200")).await.unwrap().unwrap();
        assert_eq!(second.stable_id, StableId::from("b"));
    }
}
