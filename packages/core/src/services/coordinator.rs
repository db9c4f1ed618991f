//! Operation Coordinator
//!
//! One document session. Owns the editing surface and every piece of
//! per-book state that would otherwise be global: phase guards, the
//! mutation batcher, classifier, chunk index, save queue, renumbering
//! engine, the chunk the caret is in, and the deferred-work queues.
//!
//! # Driving a session
//!
//! The host forwards surface notifications with
//! [`OperationCoordinator::collect_surface_changes`] (or
//! [`OperationCoordinator::on_external_change`] for records it observed
//! itself), calls [`OperationCoordinator::on_animation_frame`] when the
//! requested frame fires, and calls [`OperationCoordinator::run_due_work`]
//! from a timer (see [`OperationCoordinator::next_deadline`]) and
//! [`OperationCoordinator::on_idle`] when the main thread is idle.
//!
//! Programmatic operations (paste, chunk loading, structure repair,
//! renumbering) first hand any records already on the surface to the
//! batcher, then do their work and discard the records their own mutations
//! produced, so user edits are never lost and self-inflicted churn is never
//! classified.

use super::chunk_index::ChunkIndex;
use super::error::EditorError;
use super::overflow::{OverflowReport, OverflowResolver};
use super::renumbering::{RenumberReport, RenumberTicket, RenumberingEngine};
use super::save_queue::{FlushReport, SaveQueue};
use super::status::StatusIndicator;
use super::structure::{bottom_sentinel_id, ensure_structure, StructureOutcome};
use super::sync::{NoopSyncTransport, PassthroughSanitizer, Sanitizer, SyncTransport};
use crate::config::EditorConfig;
use crate::db::{DocumentEvent, NodeStore, OrderedIdentifier};
use crate::models::{ChunkId, DirtyIntent, IntentKind, NodeIdentifier, NodeRecord, StableId};
use crate::operations::{
    BatchOutcome, ChangeClassifier, DropReason, FrameHost, MutationBatcher, OperationGuards,
    Phase, WorkQueue,
};
use crate::surface::{
    all_blocks, blocks_in, chunk_container_of, chunk_containers, chunk_id_of, enclosing_block,
    find_chunk, neighbor_identifiers, ChangeRecord, EditingSurface, ElementRef, CHUNK_CLASS,
    CHUNK_ID_ATTR, NODE_ID_ATTR, STABLE_ID_ATTR,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What one animation-frame callback did
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// Records classified (after gating and filtering)
    pub processed: usize,
    pub dropped: Option<DropReason>,
    pub intents: Vec<DirtyIntent>,
    pub overflows: Vec<OverflowReport>,
    pub repaired: Option<StructureOutcome>,
    /// Failures caught at the batch boundary
    pub errors: Vec<String>,
}

/// What one pass of deferred work did
#[derive(Debug, Clone, Default)]
pub struct WorkReport {
    pub recounted: Vec<ChunkId>,
    pub toc_invalidated: bool,
    pub saves: Option<FlushReport>,
    pub renumbered: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct PasteReport {
    pub node_ids: Vec<NodeIdentifier>,
    /// Blocks the sanitizer or markup reader rejected
    pub skipped: usize,
    pub overflows: Vec<OverflowReport>,
    pub saves: FlushReport,
    /// Upstream sync confirmed the pasted records
    pub synced: bool,
    pub needs_renumbering: bool,
}

pub struct OperationCoordinator<S: EditingSurface, F: FrameHost> {
    book: String,
    config: EditorConfig,
    surface: S,
    frames: F,
    store: Arc<dyn NodeStore>,
    sync: Arc<dyn SyncTransport>,
    sanitizer: Arc<dyn Sanitizer>,
    guards: OperationGuards,
    batcher: MutationBatcher,
    classifier: ChangeClassifier,
    ids: OrderedIdentifier,
    index: ChunkIndex,
    overflow: OverflowResolver,
    saves: SaveQueue,
    renumbering: RenumberingEngine,
    toc: WorkQueue<()>,
    toc_heading: bool,
    status: StatusIndicator,
    events: broadcast::Sender<DocumentEvent>,
    observed_chunk: Option<ChunkId>,
    renumber_after_save: bool,
}

impl<S: EditingSurface, F: FrameHost> OperationCoordinator<S, F> {
    /// Start a session over an already-rendered surface
    pub fn new(
        book: impl Into<String>,
        config: EditorConfig,
        surface: S,
        frames: F,
        store: Arc<dyn NodeStore>,
    ) -> Result<Self, EditorError> {
        config.validate().map_err(EditorError::invalid_config)?;
        let book = book.into();
        let guards = OperationGuards::new();
        let ids = OrderedIdentifier::from_config(&config);
        let status = StatusIndicator::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut index = ChunkIndex::new(book.clone(), &config);
        index.rebuild(&surface);

        tracing::info!(
            "Opened session for '{}' with {} chunk(s) on the surface",
            book,
            index.chunks().len()
        );

        let mut coordinator = Self {
            batcher: MutationBatcher::new(guards.clone()),
            classifier: ChangeClassifier::new(book.clone(), ids.clone()),
            overflow: OverflowResolver::new(book.clone(), &config),
            saves: SaveQueue::new(book.clone(), &config, status.clone()),
            renumbering: RenumberingEngine::new(book.clone(), &config),
            toc: WorkQueue::new(config.schedule_policy),
            toc_heading: false,
            sync: Arc::new(NoopSyncTransport),
            sanitizer: Arc::new(PassthroughSanitizer),
            observed_chunk: None,
            renumber_after_save: false,
            book,
            config,
            surface,
            frames,
            store,
            guards,
            ids,
            index,
            status,
            events,
        };
        coordinator.refresh_observed_chunk();
        Ok(coordinator)
    }

    pub fn with_sync(mut self, sync: Arc<dyn SyncTransport>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn book(&self) -> &str {
        &self.book
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Direct surface access, standing in for user input. Changes made
    /// through it are picked up by the next frame.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn frames(&self) -> &F {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut F {
        &mut self.frames
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn guards(&self) -> OperationGuards {
        self.guards.clone()
    }

    pub fn status(&self) -> StatusIndicator {
        self.status.clone()
    }

    pub fn chunk_index(&self) -> &ChunkIndex {
        &self.index
    }

    pub fn chunk_index_mut(&mut self) -> &mut ChunkIndex {
        &mut self.index
    }

    /// Chunk the caret was last seen in
    pub fn observed_chunk(&self) -> Option<&ChunkId> {
        self.observed_chunk.as_ref()
    }

    pub fn pending_saves(&self) -> usize {
        self.saves.pending_count()
    }

    pub fn save_queue(&self) -> &SaveQueue {
        &self.saves
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    /// Earliest deadline among recounts, cache invalidation and saves
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.index.next_recount_deadline(),
            self.toc.next_deadline(),
            self.saves.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ------------------------------------------------------------------
    // Mutation pipeline
    // ------------------------------------------------------------------

    /// Records observed by the host; requests one frame
    pub fn on_external_change(&mut self, records: Vec<ChangeRecord>) {
        self.batcher.enqueue(records, &mut self.frames);
    }

    /// Hand whatever the surface logged to the batcher
    pub fn collect_surface_changes(&mut self) {
        let records = self.surface.take_records();
        self.on_external_change(records);
    }

    /// Frame callback: gate, filter, classify and apply one batch
    pub async fn on_animation_frame(&mut self) -> FrameReport {
        self.collect_surface_changes();
        let outcome = self.batcher.process(&self.surface);
        self.apply_outcome(outcome).await
    }

    /// Process queued records now instead of waiting for the frame
    pub async fn flush_mutations(&mut self) -> FrameReport {
        self.collect_surface_changes();
        let outcome = self.batcher.flush(&self.surface, &mut self.frames);
        self.apply_outcome(outcome).await
    }

    /// Drop queued records, e.g. when the surface is torn down
    pub fn cancel_mutations(&mut self) {
        self.batcher.cancel(&mut self.frames);
    }

    async fn apply_outcome(&mut self, outcome: BatchOutcome) -> FrameReport {
        match outcome {
            BatchOutcome::Empty => FrameReport::default(),
            BatchOutcome::Dropped { reason, .. } => FrameReport {
                dropped: Some(reason),
                ..FrameReport::default()
            },
            BatchOutcome::Ready(records) => self.dispatch(records).await,
        }
    }

    async fn dispatch(&mut self, records: Vec<ChangeRecord>) -> FrameReport {
        let mut report = FrameReport {
            processed: records.len(),
            ..FrameReport::default()
        };

        let classification = self.classifier.classify(&mut self.surface, &records);
        // Identifier assignment and unwrapping write to the surface
        self.discard_own_records();

        for chunk_id in &classification.discovered_chunks {
            self.index.recount(&self.surface, chunk_id);
        }
        for chunk_id in &classification.removed_chunks {
            self.index.forget(chunk_id);
        }
        for (chunk_id, delta) in &classification.chunk_deltas {
            self.index.apply_delta(chunk_id, delta.added, delta.removed);
        }

        for intent in &classification.intents {
            match intent.kind {
                IntentKind::Add | IntentKind::Update => {
                    if let Some(chunk_id) = chunk_container_of(&self.surface, intent.node_ref)
                        .and_then(|c| chunk_id_of(&self.surface, c))
                    {
                        self.index.note_node(intent.node_id.clone(), chunk_id);
                    }
                    self.saves.queue_update(intent.node_id.clone(), intent.node_ref);
                }
                IntentKind::Delete => {
                    self.index.forget_node(&intent.node_id);
                    self.saves
                        .queue_deletion(intent.node_id.clone(), intent.node_ref);
                }
            }
        }

        if let Some(heading) = classification.toc_invalidation {
            self.toc_heading |= heading;
            self.toc.schedule_once((), self.config.toc_idle_timeout());
        }

        if classification.needs_renumbering {
            tracing::debug!("Renumbering will follow the next successful save");
            self.renumber_after_save = true;
        }

        if classification.structure_repair {
            // Stale records of the removed nodes go first, so the store
            // reflects what is really left of the book
            self.write_pending().await;
            let outcome = self.repair_structure().await;
            report.repaired = Some(outcome);
        }

        let (overflows, errors) = self
            .resolve_overflows(classification.overflow_candidates.iter().cloned())
            .await;
        report.overflows = overflows;
        report.errors = errors;
        report.intents = classification.intents;

        self.refresh_observed_chunk();
        report
    }

    /// Resolve every candidate chunk that a recount shows over budget,
    /// following destinations that end up over budget themselves
    async fn resolve_overflows(
        &mut self,
        candidates: impl IntoIterator<Item = ChunkId>,
    ) -> (Vec<OverflowReport>, Vec<String>) {
        let mut queue: VecDeque<ChunkId> = candidates.into_iter().collect();
        let mut reports = Vec::new();
        let mut errors = Vec::new();

        while let Some(chunk_id) = queue.pop_front() {
            if self.index.recount(&self.surface, &chunk_id) <= self.config.node_limit {
                continue;
            }
            let result = self
                .overflow
                .resolve(
                    &mut self.surface,
                    self.store.as_ref(),
                    &mut self.index,
                    &mut self.classifier,
                    &self.guards,
                    &chunk_id,
                )
                .await;

            match result {
                Ok(overflow) => {
                    self.after_overflow(&overflow);
                    if self.index.count(&overflow.destination) > self.config.node_limit {
                        queue.push_back(overflow.destination.clone());
                    }
                    reports.push(overflow);
                }
                Err(EditorError::IdentifierSpaceExhausted(msg)) => {
                    tracing::warn!("No chunk identifier available after {}: {}", chunk_id, msg);
                    self.renumber_after_save = true;
                    errors.push(msg);
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        if !reports.is_empty() {
            // Migration records were produced under the overflow guard
            self.discard_own_records();
            self.classifier.clear_migrations();
        }
        (reports, errors)
    }

    fn after_overflow(&mut self, overflow: &OverflowReport) {
        if overflow.created {
            self.emit(DocumentEvent::ChunkCreated {
                chunk_id: overflow.destination.clone(),
            });
        }
        for migration in &overflow.migrations {
            self.index
                .note_node(migration.node_id.clone(), migration.to_chunk.clone());
        }
        for node_id in &overflow.failed {
            if let Some(element) = self.surface.find_by_id(&node_id.to_string()) {
                self.saves.queue_update(node_id.clone(), element);
            }
        }
        if let Some(chunk_id) = &overflow.observed_chunk {
            self.observed_chunk = Some(chunk_id.clone());
        }
        self.emit(DocumentEvent::NodesMigrated {
            migrations: overflow.migrations.clone(),
        });
    }

    // ------------------------------------------------------------------
    // Deferred work and persistence
    // ------------------------------------------------------------------

    /// Timer callback: due recounts, due cache invalidation, due saves
    pub async fn run_due_work(&mut self, now: Instant) -> WorkReport {
        let recounted = self.index.run_due_recounts(&self.surface, now);
        let toc_invalidated = !self.toc.take_due(now).is_empty();
        if toc_invalidated {
            self.emit_toc();
        }

        let mut report = WorkReport {
            recounted,
            toc_invalidated,
            ..WorkReport::default()
        };
        if self.saves.is_due(now) {
            let flushed = self.write_pending().await;
            report.renumbered = self.renumber_if_advised(&flushed).await;
            report.saves = Some(flushed);
        }
        report
    }

    /// Idle callback: cache invalidation that may run early
    pub fn on_idle(&mut self, now: Instant) -> bool {
        if self.toc.take_idle(now).is_empty() {
            return false;
        }
        self.emit_toc();
        true
    }

    /// Process queued records and write every pending save now
    pub async fn flush(&mut self) -> FlushReport {
        self.flush_mutations().await;
        let flushed = self.write_pending().await;
        self.renumber_if_advised(&flushed).await;
        flushed
    }

    /// Flush the save queue, publish the outcome and hand records to sync
    async fn write_pending(&mut self) -> FlushReport {
        let flushed = self.saves.flush(&self.surface, self.store.as_ref()).await;
        if !flushed.saved.is_empty() {
            self.emit(DocumentEvent::NodesSaved {
                node_ids: flushed.saved.clone(),
            });
        }
        if !flushed.deleted.is_empty() {
            self.emit(DocumentEvent::NodesDeleted {
                node_ids: flushed.deleted.clone(),
            });
        }
        self.hand_off_sync(flushed.records.clone());
        flushed
    }

    /// Fire-and-forget upstream sync
    fn hand_off_sync(&self, records: Vec<NodeRecord>) {
        if records.is_empty() {
            return;
        }
        let sync = Arc::clone(&self.sync);
        let book = self.book.clone();
        tokio::spawn(async move {
            let count = records.len();
            if let Err(e) = sync.upsert(&book, records).await {
                tracing::warn!("Background sync of {} record(s) for '{}' failed: {}", count, book, e);
            }
        });
    }

    async fn renumber_if_advised(&mut self, flushed: &FlushReport) -> Option<bool> {
        if !self.renumber_after_save || !flushed.failed.is_empty() {
            return None;
        }
        self.renumber_after_save = false;
        self.renumbering.request();
        self.run_pending_renumbering().await
    }

    fn emit_toc(&mut self) {
        let heading = std::mem::take(&mut self.toc_heading);
        self.emit(DocumentEvent::TocInvalidated { heading });
    }

    fn emit(&self, event: DocumentEvent) {
        tracing::debug!("Event {} for '{}'", event.event_type(), self.book);
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Make sure the document has sentinels, a chunk and an addressable node
    pub async fn ensure_structure(&mut self) -> StructureOutcome {
        self.collect_surface_changes();
        self.repair_structure().await
    }

    /// When the surface has no node left but the store still does, the
    /// nearest unloaded chunk is rendered instead of a default paragraph.
    async fn repair_structure(&mut self) -> StructureOutcome {
        let mut stored: BTreeSet<NodeIdentifier> = BTreeSet::new();
        let mut loaded_chunk = None;
        if all_blocks(&self.surface).is_empty() {
            match self.store.all_for_book(&self.book).await {
                Ok(records) => {
                    let unloaded: BTreeSet<ChunkId> = records
                        .iter()
                        .map(|r| r.chunk_id.clone())
                        .filter(|c| find_chunk(&self.surface, c).is_none())
                        .collect();
                    stored = records.into_iter().map(|r| r.node_id).collect();
                    if let Some(chunk_id) = self.nearest_chunk(&unloaded) {
                        match self.load_chunk(&chunk_id).await {
                            Ok(placed) if placed > 0 => {
                                self.place_caret_in(&chunk_id);
                                loaded_chunk = Some(chunk_id);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!("Could not load chunk {} during repair: {}", chunk_id, e)
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not read '{}' during structure repair: {}", self.book, e)
                }
            }
        }

        let mut outcome = {
            let _guard = self.guards.enter(Phase::Programmatic);
            ensure_structure(&mut self.surface, &self.book, &self.ids, &stored)
        };
        outcome.loaded_chunk = loaded_chunk;
        self.discard_own_records();
        if let Some(chunk_id) = &outcome.loaded_chunk {
            tracing::info!(
                "Rendered stored chunk {} of '{}' to keep a node on screen",
                chunk_id,
                self.book
            );
        }

        if let Some(chunk_id) = &outcome.created_chunk {
            self.index.recount(&self.surface, chunk_id);
        }
        if let Some(node_id) = &outcome.created_node {
            if let Some(element) = self.surface.find_by_id(&node_id.to_string()) {
                if let Some(chunk_id) = chunk_container_of(&self.surface, element)
                    .and_then(|c| chunk_id_of(&self.surface, c))
                {
                    self.index.recount(&self.surface, &chunk_id);
                }
                self.saves.queue_update(node_id.clone(), element);
            }
            self.emit(DocumentEvent::StructureRepaired {
                node_id: node_id.clone(),
            });
        }
        self.refresh_observed_chunk();
        outcome
    }

    /// Closest chunk to the observed one in `candidates`: the last one
    /// before it, else the first
    fn nearest_chunk(&self, candidates: &BTreeSet<ChunkId>) -> Option<ChunkId> {
        self.observed_chunk
            .as_ref()
            .and_then(|observed| candidates.range(..observed.clone()).next_back())
            .or_else(|| candidates.iter().next())
            .cloned()
    }

    fn place_caret_in(&mut self, chunk_id: &ChunkId) {
        let before_observed = self
            .observed_chunk
            .as_ref()
            .map(|observed| chunk_id < observed)
            .unwrap_or(false);
        let Some(container) = find_chunk(&self.surface, chunk_id) else {
            return;
        };
        let blocks = blocks_in(&self.surface, container);
        let target = if before_observed { blocks.last() } else { blocks.first() };
        if let Some((block, _)) = target {
            self.surface.set_caret(*block, 0);
        }
    }

    /// Insert a new, unidentified block after `after` (or at the start of
    /// the observed chunk) and put the caret in it, as pressing Enter does.
    /// The block gets its identifier when the next frame is processed.
    pub async fn insert_block_after(
        &mut self,
        after: Option<ElementRef>,
        tag: &str,
        text: &str,
    ) -> Result<ElementRef, EditorError> {
        let (container, reference) = self.insertion_point(after).await?;
        let block = self.surface.create_element(tag);
        if text.is_empty() {
            let line_break = self.surface.create_element("br");
            self.surface.insert_before(block, line_break, None);
        } else {
            let text_node = self.surface.create_text(text);
            self.surface.insert_before(block, text_node, None);
        }
        self.surface.insert_before(container, block, reference);
        self.surface.set_caret(block, 0);
        Ok(block)
    }

    /// Container and reference child for inserting after `after`
    async fn insertion_point(
        &mut self,
        after: Option<ElementRef>,
    ) -> Result<(ElementRef, Option<ElementRef>), EditorError> {
        if let Some(node) = after {
            let (block, _) = enclosing_block(&self.surface, node).ok_or_else(|| {
                EditorError::structural("insertion anchor is not inside an identified block")
            })?;
            let container = chunk_container_of(&self.surface, block).ok_or_else(|| {
                EditorError::structural("insertion anchor is not inside a chunk")
            })?;
            return Ok((container, self.surface.next_sibling(block)));
        }

        let container = match self
            .observed_chunk
            .as_ref()
            .and_then(|c| find_chunk(&self.surface, c))
            .or_else(|| chunk_containers(&self.surface).into_iter().next())
        {
            Some(container) => container,
            None => {
                self.repair_structure().await;
                chunk_containers(&self.surface)
                    .into_iter()
                    .next()
                    .ok_or_else(|| EditorError::structural("no chunk container after repair"))?
            }
        };
        let first = self.surface.children(container).into_iter().next();
        Ok((container, first))
    }

    /// Paste sanitized blocks after `after`, honoring the chunk budget.
    ///
    /// The paste guard is held throughout, so the batcher drops the
    /// resulting notifications. New nodes are written and synced before
    /// this returns.
    pub async fn paste_blocks(
        &mut self,
        after: Option<ElementRef>,
        blocks: Vec<String>,
    ) -> Result<PasteReport, EditorError> {
        self.collect_surface_changes();
        let mut report = PasteReport::default();

        {
            let _guard = self.guards.enter(Phase::Paste);
            let (container, reference) = self.insertion_point(after).await?;

            let mut live: BTreeSet<NodeIdentifier> =
                all_blocks(&self.surface).into_iter().map(|(_, id)| id).collect();
            let mut placed = Vec::with_capacity(blocks.len());

            for html in &blocks {
                let clean = self.sanitizer.sanitize(html);
                let Some(element) = self.surface.create_from_markup(&clean) else {
                    tracing::warn!("Skipping pasted block that is not a single element");
                    report.skipped += 1;
                    continue;
                };
                self.surface.remove_attr(element, NODE_ID_ATTR);
                self.surface.remove_attr(element, STABLE_ID_ATTR);
                self.surface.insert_before(container, element, reference);

                let Some((before, next)) = neighbor_identifiers(&self.surface, element) else {
                    continue;
                };
                let generated =
                    self.ids
                        .generate_between(before.as_ref(), next.as_ref(), &live)?;
                report.needs_renumbering |= generated.needs_renumbering;

                self.surface
                    .set_attr(element, NODE_ID_ATTR, &generated.id.to_string());
                self.surface.set_attr(
                    element,
                    STABLE_ID_ATTR,
                    StableId::generate(&self.book).as_str(),
                );
                live.insert(generated.id.clone());
                placed.push((element, generated.id.clone()));
                report.node_ids.push(generated.id);
            }

            let chunk_id = chunk_id_of(&self.surface, container);
            if let Some(chunk_id) = &chunk_id {
                for (_, id) in &placed {
                    self.index.note_node(id.clone(), chunk_id.clone());
                }
            }
            self.discard_own_records();

            let (overflows, errors) = self.resolve_overflows(chunk_id).await;
            for error in errors {
                tracing::warn!("Overflow after paste: {}", error);
            }
            report.overflows = overflows;

            for (element, id) in placed {
                self.saves.queue_update(id, element);
            }
            report.saves = self.write_pending_without_sync().await;

            report.synced = match self
                .sync
                .upsert(&self.book, report.saves.records.clone())
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Sync of pasted blocks for '{}' failed: {}", self.book, e);
                    false
                }
            };
        }

        if report.needs_renumbering {
            self.renumber_after_save = true;
        }
        self.ensure_structure().await;
        tracing::info!(
            "Pasted {} block(s) into '{}' ({} skipped, {} overflow(s))",
            report.node_ids.len(),
            self.book,
            report.skipped,
            report.overflows.len()
        );
        Ok(report)
    }

    /// Like `write_pending`, but the caller syncs the records itself
    async fn write_pending_without_sync(&mut self) -> FlushReport {
        let flushed = self.saves.flush(&self.surface, self.store.as_ref()).await;
        if !flushed.saved.is_empty() {
            self.emit(DocumentEvent::NodesSaved {
                node_ids: flushed.saved.clone(),
            });
        }
        if !flushed.deleted.is_empty() {
            self.emit(DocumentEvent::NodesDeleted {
                node_ids: flushed.deleted.clone(),
            });
        }
        flushed
    }

    // ------------------------------------------------------------------
    // Chunk loading
    // ------------------------------------------------------------------

    /// Render a stored chunk onto the surface in chunk order. Returns the
    /// number of nodes placed; an already-loaded chunk places none.
    pub async fn load_chunk(&mut self, chunk_id: &ChunkId) -> Result<usize, EditorError> {
        if find_chunk(&self.surface, chunk_id).is_some() {
            return Ok(0);
        }
        self.collect_surface_changes();
        let records = self.store.range_by_chunk(&self.book, chunk_id).await?;

        let placed = {
            let _guard = self.guards.enter(Phase::ChunkLoading);
            let container = self.surface.create_element("div");
            self.surface.set_attr(container, "class", CHUNK_CLASS);
            self.surface
                .set_attr(container, CHUNK_ID_ATTR, &chunk_id.to_string());

            let mut placed = 0;
            for record in &records {
                let Some(element) = self.surface.create_from_markup(&record.content) else {
                    tracing::warn!(
                        "Stored content of {} in chunk {} is not a single element",
                        record.node_id,
                        chunk_id
                    );
                    continue;
                };
                self.surface
                    .set_attr(element, NODE_ID_ATTR, &record.node_id.to_string());
                self.surface
                    .set_attr(element, STABLE_ID_ATTR, record.stable_id.as_str());
                self.surface.insert_before(container, element, None);
                placed += 1;
            }

            let reference = chunk_containers(&self.surface)
                .into_iter()
                .find(|c| {
                    chunk_id_of(&self.surface, *c)
                        .map(|other| other > *chunk_id)
                        .unwrap_or(false)
                })
                .or_else(|| self.surface.find_by_id(&bottom_sentinel_id(&self.book)));
            let root = self.surface.root();
            self.surface.insert_before(root, container, reference);
            placed
        };
        self.discard_own_records();
        self.index.recount(&self.surface, chunk_id);

        tracing::debug!("Loaded chunk {} of '{}' with {} node(s)", chunk_id, self.book, placed);
        Ok(placed)
    }

    /// Take a chunk off the surface without deleting its nodes
    pub fn unload_chunk(&mut self, chunk_id: &ChunkId) -> bool {
        let Some(container) = find_chunk(&self.surface, chunk_id) else {
            return false;
        };
        self.collect_surface_changes();
        {
            let _guard = self.guards.enter(Phase::ChunkLoading);
            self.surface.remove(container);
        }
        self.discard_own_records();
        self.index.forget(chunk_id);
        self.refresh_observed_chunk();
        true
    }

    // ------------------------------------------------------------------
    // Renumbering
    // ------------------------------------------------------------------

    /// Ticket on the outstanding renumbering, requesting one if needed.
    /// Nothing runs until `run_pending_renumbering` is called.
    pub fn renumbering_ticket(&mut self) -> RenumberTicket {
        self.renumbering.request().0
    }

    /// Request renumbering and run it; `true` on success. Calls made while
    /// a request is outstanding share its result.
    pub async fn request_renumbering(&mut self) -> bool {
        let ticket = self.renumbering_ticket();
        self.run_pending_renumbering().await;
        ticket.wait().await
    }

    /// Run the outstanding renumbering request, if any
    pub async fn run_pending_renumbering(&mut self) -> Option<bool> {
        if !self.renumbering.is_requested() {
            return None;
        }
        let ok = match self.renumber().await {
            Ok(report) => {
                self.emit(DocumentEvent::Renumbered {
                    node_count: report.node_count,
                    chunk_count: report.chunk_count,
                });
                self.hand_off_sync(report.records);
                true
            }
            Err(e) => {
                tracing::error!("Renumbering of '{}' failed: {}", self.book, e);
                false
            }
        };
        self.renumbering.complete(ok);
        Some(ok)
    }

    async fn renumber(&mut self) -> Result<RenumberReport, EditorError> {
        self.flush_mutations().await;
        let flushed = self.write_pending().await;
        if !flushed.failed.is_empty() {
            return Err(EditorError::persistence(
                flushed.failed[0].clone(),
                self.config.max_write_attempts,
                "pending saves could not be flushed before renumbering",
            ));
        }

        // A failed run has already restored the store and left the surface alone
        let report = self
            .renumbering
            .run(&mut self.surface, self.store.as_ref(), &self.guards)
            .await?;

        self.discard_own_records();
        self.classifier.clear_migrations();
        self.index.rebuild(&self.surface);
        self.saves.drop_pending();
        self.renumber_after_save = false;
        self.refresh_observed_chunk();
        Ok(report)
    }

    fn discard_own_records(&mut self) {
        let discarded = self.surface.take_records();
        if !discarded.is_empty() {
            tracing::trace!("Discarded {} self-inflicted change record(s)", discarded.len());
        }
    }

    fn refresh_observed_chunk(&mut self) {
        if let Some(chunk_id) = self
            .surface
            .caret()
            .and_then(|c| chunk_container_of(&self.surface, c.node))
            .and_then(|c| chunk_id_of(&self.surface, c))
        {
            self.observed_chunk = Some(chunk_id);
        }
    }
}
