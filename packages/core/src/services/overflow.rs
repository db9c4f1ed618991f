//! Overflow resolution
//!
//! When a chunk holds more than `node_limit` addressable nodes, the trailing
//! nodes (by identifier order) move to the next chunk if it has room, or to
//! a new chunk created right after the source. Identifiers never change
//! during migration; only the owning chunk does.
//!
//! The resolver holds the overflow guard and suspends user input for the
//! whole operation. Both are released on every exit path.

use super::chunk_index::ChunkIndex;
use super::error::EditorError;
use crate::config::EditorConfig;
use crate::db::{Migration, NodeStore, OrderedIdentifier};
use crate::models::{ChunkId, NodeIdentifier, NodeRecord, StableId};
use crate::operations::{ChangeClassifier, OperationGuards, Phase};
use crate::surface::{
    blocks_in, caret_at_offset, chunk_container_of, chunk_containers, chunk_id_of,
    enclosing_block, find_chunk, text_offset_within, EditingSurface, ElementRef, CHUNK_CLASS,
    CHUNK_ID_ATTR, STABLE_ID_ATTR,
};
use std::collections::BTreeSet;
use std::ops::Bound;
use std::time::Duration;

/// What one overflow resolution did
#[derive(Debug, Clone, PartialEq)]
pub struct OverflowReport {
    pub source: ChunkId,
    pub destination: ChunkId,
    /// The destination chunk was created by this resolution
    pub created: bool,
    pub migrations: Vec<Migration>,
    /// Nodes left in the source chunk
    pub kept: usize,
    /// Migrated nodes whose new chunk assignment could not be written
    pub failed: Vec<NodeIdentifier>,
    /// Stray text fragments removed after extraction
    pub cleaned_fragments: usize,
    pub caret_restored: bool,
    /// Chunk holding the caret afterwards, if any
    pub observed_chunk: Option<ChunkId>,
}

impl OverflowReport {
    pub fn migrated_ids(&self) -> Vec<NodeIdentifier> {
        self.migrations.iter().map(|m| m.node_id.clone()).collect()
    }
}

/// Caret context captured before nodes move
struct CaretAnchor {
    block: ElementRef,
    offset: usize,
    next: Option<ElementRef>,
}

pub struct OverflowResolver {
    book: String,
    node_limit: usize,
    settle: Duration,
    ids: OrderedIdentifier,
}

impl OverflowResolver {
    pub fn new(book: impl Into<String>, config: &EditorConfig) -> Self {
        Self {
            book: book.into(),
            node_limit: config.node_limit,
            settle: config.overflow_settle(),
            ids: OrderedIdentifier::from_config(config),
        }
    }

    pub fn node_limit(&self) -> usize {
        self.node_limit
    }

    /// Split `source` so it holds at most `node_limit` nodes.
    ///
    /// Migrated nodes are tagged on `classifier` so their removal and
    /// re-insertion are not mistaken for deletions and additions.
    pub async fn resolve<S: EditingSurface + ?Sized>(
        &self,
        surface: &mut S,
        store: &dyn NodeStore,
        index: &mut ChunkIndex,
        classifier: &mut ChangeClassifier,
        guards: &OperationGuards,
        source: &ChunkId,
    ) -> Result<OverflowReport, EditorError> {
        let _guard = guards.enter(Phase::Overflow);
        let was_editable = surface.is_editable();
        surface.set_editable(false);

        let result = self
            .migrate(surface, store, index, classifier, source)
            .await;

        surface.set_editable(was_editable);
        match &result {
            Ok(report) => tracing::info!(
                "Resolved overflow of chunk {} in '{}': {} node(s) -> chunk {}{}",
                report.source,
                self.book,
                report.migrations.len(),
                report.destination,
                if report.created { " (new)" } else { "" }
            ),
            Err(e) => {
                tracing::error!("Overflow resolution of chunk {} failed: {}", source, e);
                // Leave both sides countable even after a partial move
                index.recount(surface, source);
            }
        }
        result
    }

    async fn migrate<S: EditingSurface + ?Sized>(
        &self,
        surface: &mut S,
        store: &dyn NodeStore,
        index: &mut ChunkIndex,
        classifier: &mut ChangeClassifier,
        source: &ChunkId,
    ) -> Result<OverflowReport, EditorError> {
        let source_el = find_chunk(surface, source).ok_or_else(|| {
            EditorError::structural(format!("chunk {} is not on the surface", source))
        })?;

        let mut members = blocks_in(surface, source_el);
        members.sort_by(|a, b| OrderedIdentifier::compare(&a.1, &b.1));
        if members.len() <= self.node_limit {
            return Err(EditorError::structural(format!(
                "chunk {} holds {} node(s), nothing overflows a limit of {}",
                source,
                members.len(),
                self.node_limit
            )));
        }
        let overflow = members.split_off(self.node_limit);
        let kept = members.len();

        let anchor = self.capture_caret(surface);

        let (dest_el, destination, created) = self
            .choose_destination(surface, store, index, source, source_el, overflow.len())
            .await?;
        if created {
            index.track_chunk(destination.clone(), 0);
        }

        // Reused chunks receive the overflow at their start, in order
        let insert_ref = if created {
            None
        } else {
            surface.children(dest_el).into_iter().next()
        };
        for (node, id) in &overflow {
            classifier.mark_migrating(id.clone());
            surface.remove(*node);
            surface.insert_before(dest_el, *node, insert_ref);
        }

        let root = surface.root();
        let cleaned_fragments = self.clean_fragments(surface, &[root, source_el, dest_el]);

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let mut migrations = Vec::with_capacity(overflow.len());
        let mut failed = Vec::new();
        for (node, id) in &overflow {
            migrations.push(Migration {
                node_id: id.clone(),
                from_chunk: source.clone(),
                to_chunk: destination.clone(),
            });
            if let Err(e) = self.persist(surface, store, *node, id, &destination).await {
                tracing::warn!("Could not persist migration of {}: {}", id, e);
                failed.push(id.clone());
            }
        }

        index.recount(surface, source);
        index.recount(surface, &destination);

        let caret_restored = anchor
            .map(|a| self.restore_caret(surface, a, &overflow))
            .unwrap_or(false);
        let observed_chunk = surface
            .caret()
            .and_then(|c| chunk_container_of(surface, c.node))
            .and_then(|c| chunk_id_of(surface, c));

        Ok(OverflowReport {
            source: source.clone(),
            destination,
            created,
            migrations,
            kept,
            failed,
            cleaned_fragments,
            caret_restored,
            observed_chunk,
        })
    }

    fn capture_caret<S: EditingSurface + ?Sized>(&self, surface: &S) -> Option<CaretAnchor> {
        let caret = surface.caret()?;
        let (block, _) = enclosing_block(surface, caret.node)?;
        Some(CaretAnchor {
            block,
            offset: text_offset_within(surface, block, caret),
            next: surface.next_sibling(block),
        })
    }

    /// Next chunk when it is loaded and can take the whole overflow,
    /// otherwise a new container placed right after the source.
    ///
    /// Chunk ids already used in the store count as taken even when their
    /// chunk is not on the surface, so a new chunk never lands on top of an
    /// unloaded one.
    async fn choose_destination<S: EditingSurface + ?Sized>(
        &self,
        surface: &mut S,
        store: &dyn NodeStore,
        index: &mut ChunkIndex,
        source: &ChunkId,
        source_el: ElementRef,
        incoming: usize,
    ) -> Result<(ElementRef, ChunkId, bool), EditorError> {
        let mut known: BTreeSet<ChunkId> = store.chunk_ids(&self.book).await?.into_iter().collect();
        known.extend(
            chunk_containers(surface)
                .into_iter()
                .filter_map(|c| chunk_id_of(surface, c)),
        );
        let next = known
            .range((Bound::Excluded(source.clone()), Bound::Unbounded))
            .next()
            .cloned();

        if let Some(next_id) = &next {
            match find_chunk(surface, next_id) {
                Some(el) => {
                    let count = index.recount(surface, next_id);
                    if count + incoming <= self.node_limit {
                        tracing::debug!(
                            "Reusing chunk {} ({} + {} <= {})",
                            next_id,
                            count,
                            incoming,
                            self.node_limit
                        );
                        return Ok((el, next_id.clone(), false));
                    }
                }
                None => tracing::debug!("Next chunk {} is not loaded, creating a new one", next_id),
            }
        }

        let live: BTreeSet<NodeIdentifier> = known.iter().map(|c| c.0.clone()).collect();
        let new_id = match &next {
            None => {
                let incremented = NodeIdentifier::Integer(source.0.int_part() + 1);
                if live.contains(&incremented) {
                    self.ids
                        .generate_between(Some(&source.0), None, &live)?
                        .id
                } else {
                    incremented
                }
            }
            Some(next_id) => {
                self.ids
                    .generate_between(Some(&source.0), Some(&next_id.0), &live)?
                    .id
            }
        };
        let new_id = ChunkId(new_id);

        let container = surface.create_element("div");
        surface.set_attr(container, "class", CHUNK_CLASS);
        surface.set_attr(container, CHUNK_ID_ATTR, &new_id.to_string());
        let parent = surface
            .parent(source_el)
            .ok_or_else(|| EditorError::structural(format!("chunk {} has no parent", source)))?;
        let after_source = surface.next_sibling(source_el);
        surface.insert_before(parent, container, after_source);
        tracing::debug!("Created chunk {} after chunk {}", new_id, source);

        Ok((container, new_id, true))
    }

    /// Remove whitespace-only text nodes sitting directly in `parents`
    fn clean_fragments<S: EditingSurface + ?Sized>(&self, surface: &mut S, parents: &[ElementRef]) -> usize {
        let mut removed = 0;
        for parent in parents {
            for child in surface.children(*parent) {
                if surface.is_text(child) && surface.text_content(child).trim().is_empty() {
                    surface.remove(child);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::trace!("Removed {} stray text fragment(s)", removed);
        }
        removed
    }

    async fn persist<S: EditingSurface + ?Sized>(
        &self,
        surface: &S,
        store: &dyn NodeStore,
        node: ElementRef,
        node_id: &NodeIdentifier,
        destination: &ChunkId,
    ) -> anyhow::Result<()> {
        let existing = store.get(&self.book, node_id).await?;
        let stable_id = surface
            .attr(node, STABLE_ID_ATTR)
            .map(StableId)
            .or_else(|| existing.as_ref().map(|r| r.stable_id.clone()))
            .unwrap_or_else(|| StableId::generate(&self.book));
        let annotations = existing.map(|r| r.annotations).unwrap_or_default();

        let record = NodeRecord::new(
            self.book.clone(),
            node_id.clone(),
            stable_id,
            destination.clone(),
            surface.serialize(node),
        )
        .with_annotations(annotations);
        store.put(record).await
    }

    /// Put the caret back when its block or the block after it moved
    fn restore_caret<S: EditingSurface + ?Sized>(
        &self,
        surface: &mut S,
        anchor: CaretAnchor,
        moved: &[(ElementRef, NodeIdentifier)],
    ) -> bool {
        let was_moved = |el: ElementRef| moved.iter().any(|(m, _)| *m == el);
        let caret_in_block = surface
            .caret()
            .map(|c| surface.is_attached(c.node) && surface.contains(anchor.block, c.node))
            .unwrap_or(false);

        let target = if was_moved(anchor.block) && !caret_in_block {
            Some((anchor.block, anchor.offset))
        } else if surface.caret().is_none() {
            anchor.next.filter(|n| was_moved(*n)).map(|n| (n, 0))
        } else {
            None
        };

        match target {
            Some((block, offset)) => {
                let caret = caret_at_offset(surface, block, offset);
                surface.set_caret(caret.node, caret.offset);
                tracing::debug!("Restored caret at offset {} after migration", offset);
                true
            }
            None => false,
        }
    }
}
