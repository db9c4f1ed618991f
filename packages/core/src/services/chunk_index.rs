//! Chunk membership index
//!
//! Per-book map of chunk -> member count and node -> chunk. Counts are kept
//! two ways: an optimistic delta applied as changes are classified, and an
//! authoritative recount read straight from the surface. Every delta arms a
//! debounced recount, and the recount always wins. Overflow decisions must
//! recount first rather than trust the delta.

use crate::config::EditorConfig;
use crate::models::{ChunkId, NodeIdentifier};
use crate::operations::WorkQueue;
use crate::surface::{blocks_in, chunk_containers, chunk_id_of, find_chunk, EditingSurface};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

pub struct ChunkIndex {
    book: String,
    counts: BTreeMap<ChunkId, usize>,
    node_chunks: HashMap<NodeIdentifier, ChunkId>,
    recounts: WorkQueue<ChunkId>,
    recount_delay: Duration,
}

impl ChunkIndex {
    pub fn new(book: impl Into<String>, config: &EditorConfig) -> Self {
        Self {
            book: book.into(),
            counts: BTreeMap::new(),
            node_chunks: HashMap::new(),
            recounts: WorkQueue::new(config.schedule_policy),
            recount_delay: config.recount_debounce(),
        }
    }

    /// Register a newly discovered or created chunk
    pub fn track_chunk(&mut self, chunk_id: ChunkId, initial_count: usize) {
        tracing::debug!(
            "Tracking chunk {} of '{}' with {} node(s)",
            chunk_id,
            self.book,
            initial_count
        );
        self.counts.insert(chunk_id, initial_count);
    }

    /// Authoritative count read from the surface. A chunk whose container is
    /// not on the surface counts as empty.
    pub fn recount<S: EditingSurface + ?Sized>(&mut self, surface: &S, chunk_id: &ChunkId) -> usize {
        self.recounts.cancel(chunk_id);
        let members = match find_chunk(surface, chunk_id) {
            Some(container) => blocks_in(surface, container),
            None => Vec::new(),
        };
        for (_, id) in &members {
            self.node_chunks.insert(id.clone(), chunk_id.clone());
        }

        let count = members.len();
        if let Some(previous) = self.counts.insert(chunk_id.clone(), count) {
            if previous != count {
                tracing::trace!(
                    "Recount corrected chunk {}: {} -> {}",
                    chunk_id,
                    previous,
                    count
                );
            }
        }
        count
    }

    /// Rebuild everything from the surface
    pub fn rebuild<S: EditingSurface + ?Sized>(&mut self, surface: &S) {
        self.counts.clear();
        self.node_chunks.clear();
        self.recounts.drain();
        for container in chunk_containers(surface) {
            if let Some(chunk_id) = chunk_id_of(surface, container) {
                self.recount(surface, &chunk_id);
            }
        }
    }

    /// Optimistic update during typing; arms a debounced recount
    pub fn apply_delta(&mut self, chunk_id: &ChunkId, added: usize, removed: usize) {
        let count = self.counts.entry(chunk_id.clone()).or_insert(0);
        *count = (*count + added).saturating_sub(removed);
        self.recounts.schedule(chunk_id.clone(), self.recount_delay);
    }

    /// Run recounts whose debounce has elapsed; returns the chunks recounted
    pub fn run_due_recounts<S: EditingSurface + ?Sized>(
        &mut self,
        surface: &S,
        now: Instant,
    ) -> Vec<ChunkId> {
        let due = self.recounts.take_due(now);
        for chunk_id in &due {
            self.recount(surface, chunk_id);
        }
        due
    }

    pub fn next_recount_deadline(&self) -> Option<Instant> {
        self.recounts.next_deadline()
    }

    /// Current count. Unknown chunks are discovered with a count of 0.
    pub fn count(&mut self, chunk_id: &ChunkId) -> usize {
        if !self.counts.contains_key(chunk_id) {
            tracing::debug!("Discovered chunk {} of '{}' lazily", chunk_id, self.book);
        }
        *self.counts.entry(chunk_id.clone()).or_insert(0)
    }

    pub fn is_over_budget(&mut self, chunk_id: &ChunkId, limit: usize) -> bool {
        self.count(chunk_id) > limit
    }

    pub fn is_tracked(&self, chunk_id: &ChunkId) -> bool {
        self.counts.contains_key(chunk_id)
    }

    /// Drop a chunk that has left the surface
    pub fn forget(&mut self, chunk_id: &ChunkId) {
        self.counts.remove(chunk_id);
        self.recounts.cancel(chunk_id);
        self.node_chunks.retain(|_, c| c != chunk_id);
    }

    pub fn chunk_of(&self, node_id: &NodeIdentifier) -> Option<&ChunkId> {
        self.node_chunks.get(node_id)
    }

    pub fn note_node(&mut self, node_id: NodeIdentifier, chunk_id: ChunkId) {
        self.node_chunks.insert(node_id, chunk_id);
    }

    pub fn forget_node(&mut self, node_id: &NodeIdentifier) {
        self.node_chunks.remove(node_id);
    }

    /// Tracked chunks and their counts, in chunk order
    pub fn chunks(&self) -> Vec<(ChunkId, usize)> {
        self.counts.iter().map(|(c, n)| (c.clone(), *n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::SchedulePolicyKind;
    use crate::surface::MemorySurface;

    fn config() -> EditorConfig {
        EditorConfig {
            schedule_policy: SchedulePolicyKind::Timer,
            ..EditorConfig::default()
        }
    }

    fn surface() -> MemorySurface {
        MemorySurface::with_chunks(
            "book",
            &[(0, vec![("1", "a"), ("2", "b")]), (1, vec![("100", "c")])],
        )
    }

    #[test]
    fn test_rebuild_from_surface() {
        let s = surface();
        let mut index = ChunkIndex::new("book", &config());
        index.rebuild(&s);

        assert_eq!(index.chunks(), vec![(ChunkId::new(0), 2), (ChunkId::new(1), 1)]);
        assert_eq!(index.chunk_of(&NodeIdentifier::Integer(100)), Some(&ChunkId::new(1)));
    }

    #[test]
    fn test_unknown_chunk_is_discovered_as_empty() {
        let mut index = ChunkIndex::new("book", &config());
        assert!(!index.is_tracked(&ChunkId::new(7)));
        assert_eq!(index.count(&ChunkId::new(7)), 0);
        assert!(index.is_tracked(&ChunkId::new(7)));
        assert!(!index.is_over_budget(&ChunkId::new(7), 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_recount_corrects_drift() {
        let s = surface();
        let mut index = ChunkIndex::new("book", &config());
        index.rebuild(&s);

        // Optimistic delta that doesn't match the surface
        index.apply_delta(&ChunkId::new(0), 3, 0);
        assert_eq!(index.count(&ChunkId::new(0)), 5);
        assert!(index
            .run_due_recounts(&s, Instant::now())
            .is_empty());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(
            index.run_due_recounts(&s, Instant::now()),
            vec![ChunkId::new(0)]
        );
        assert_eq!(index.count(&ChunkId::new(0)), 2);
    }

    #[test]
    fn test_over_budget_and_forget() {
        let s = surface();
        let mut index = ChunkIndex::new("book", &config());
        index.rebuild(&s);
        assert!(index.is_over_budget(&ChunkId::new(0), 1));
        assert!(!index.is_over_budget(&ChunkId::new(0), 2));

        index.forget(&ChunkId::new(0));
        assert!(!index.is_tracked(&ChunkId::new(0)));
        assert_eq!(index.chunk_of(&NodeIdentifier::Integer(1)), None);
    }

    #[test]
    fn test_recount_of_missing_container_is_zero() {
        let s = surface();
        let mut index = ChunkIndex::new("book", &config());
        index.track_chunk(ChunkId::new(9), 4);
        assert_eq!(index.recount(&s, &ChunkId::new(9)), 0);
    }
}
