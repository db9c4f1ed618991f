//! Save queue
//!
//! Coalesces dirty intents into durable writes. Updates to the same
//! identifier collapse into one write whose content is read from the surface
//! at flush time, so a burst of keystrokes produces a single write of the
//! final state. A pending deletion always beats a pending update.
//!
//! Each identifier is written independently with bounded exponential
//! backoff (10ms, 20ms, 40ms, ...). An identifier that exhausts its attempts
//! is reported through the status indicator; other identifiers in the same
//! flush are unaffected.

use super::status::{StatusIndicator, SyncStatus};
use crate::config::EditorConfig;
use crate::db::NodeStore;
use crate::models::{NodeIdentifier, NodeRecord, StableId};
use crate::surface::{
    chunk_container_of, chunk_id_of, node_identifier, EditingSurface, ElementRef, STABLE_ID_ATTR,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Upsert,
    Delete,
}

/// Latest desired state for one identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSync {
    kind: PendingKind,
    node_ref: ElementRef,
}

/// Result of one flush
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    pub saved: Vec<NodeIdentifier>,
    pub deleted: Vec<NodeIdentifier>,
    /// Exhausted their retries
    pub failed: Vec<NodeIdentifier>,
    /// Dropped because their element no longer carries the identifier
    pub skipped: Vec<NodeIdentifier>,
    /// Records written, ready for upstream sync
    pub records: Vec<NodeRecord>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
            && self.deleted.is_empty()
            && self.failed.is_empty()
            && self.skipped.is_empty()
    }
}

pub struct SaveQueue {
    book: String,
    pending: BTreeMap<NodeIdentifier, PendingSync>,
    deadline: Option<Instant>,
    debounce: Duration,
    max_attempts: u32,
    config: EditorConfig,
    status: StatusIndicator,
}

impl SaveQueue {
    pub fn new(book: impl Into<String>, config: &EditorConfig, status: StatusIndicator) -> Self {
        Self {
            book: book.into(),
            pending: BTreeMap::new(),
            deadline: None,
            debounce: config.save_debounce(),
            max_attempts: config.max_write_attempts.max(1),
            config: config.clone(),
            status,
        }
    }

    /// Queue a content write; repeated calls collapse to one write
    pub fn queue_update(&mut self, node_id: NodeIdentifier, node_ref: ElementRef) {
        let entry = self.pending.entry(node_id).or_insert(PendingSync {
            kind: PendingKind::Upsert,
            node_ref,
        });
        if entry.kind == PendingKind::Upsert {
            entry.node_ref = node_ref;
        }
        self.arm();
    }

    /// Queue a deletion; wins over any pending update for the same identifier
    pub fn queue_deletion(&mut self, node_id: NodeIdentifier, node_ref: ElementRef) {
        self.pending.insert(
            node_id,
            PendingSync {
                kind: PendingKind::Delete,
                node_ref,
            },
        );
        self.arm();
    }

    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.debounce);
        if self.status.current() != SyncStatus::Pending {
            self.status.set(SyncStatus::Pending);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_kind(&self, node_id: &NodeIdentifier) -> Option<PendingKind> {
        self.pending.get(node_id).map(|p| p.kind)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the trailing debounce has elapsed
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map(|d| d <= now).unwrap_or(false)
    }

    /// Drop everything not yet written
    pub fn drop_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.deadline = None;
        if dropped > 0 {
            tracing::debug!("Dropped {} stale pending save(s)", dropped);
        }
        dropped
    }

    /// Write everything pending to the store now
    pub async fn flush<S: EditingSurface + ?Sized>(
        &mut self,
        surface: &S,
        store: &dyn NodeStore,
    ) -> FlushReport {
        let pending = std::mem::take(&mut self.pending);
        self.deadline = None;
        let mut report = FlushReport::default();
        if pending.is_empty() {
            return report;
        }

        self.status.set(SyncStatus::Saving);
        tracing::debug!(
            "Flushing {} pending write(s) for '{}'",
            pending.len(),
            self.book
        );

        for (node_id, write) in pending {
            match write.kind {
                PendingKind::Delete => {
                    if self.delete_with_retry(store, &node_id).await {
                        report.deleted.push(node_id);
                    } else {
                        report.failed.push(node_id);
                    }
                }
                PendingKind::Upsert => {
                    let Some(record) = self.build_record(surface, store, &node_id, write.node_ref).await
                    else {
                        report.skipped.push(node_id);
                        continue;
                    };
                    if self.put_with_retry(store, &record).await {
                        report.saved.push(node_id);
                        report.records.push(record);
                    } else {
                        report.failed.push(node_id);
                    }
                }
            }
        }

        if report.failed.is_empty() {
            self.status.set(SyncStatus::Saved {
                at: chrono::Utc::now(),
            });
        } else {
            self.status.set(SyncStatus::Failed {
                node_ids: report.failed.clone(),
            });
        }
        report
    }

    /// Record for the element's current state, carrying stored annotations
    async fn build_record<S: EditingSurface + ?Sized>(
        &self,
        surface: &S,
        store: &dyn NodeStore,
        node_id: &NodeIdentifier,
        node_ref: ElementRef,
    ) -> Option<NodeRecord> {
        if !surface.is_attached(node_ref) {
            tracing::warn!("Skipping save of {}: element left the document", node_id);
            return None;
        }
        if node_identifier(surface, node_ref).as_ref() != Some(node_id) {
            tracing::warn!("Skipping save of {}: element was re-identified", node_id);
            return None;
        }
        let Some(chunk_id) =
            chunk_container_of(surface, node_ref).and_then(|c| chunk_id_of(surface, c))
        else {
            tracing::warn!("Skipping save of {}: not inside a chunk", node_id);
            return None;
        };

        let existing = match store.get(&self.book, node_id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!("Could not read existing record for {}: {}", node_id, e);
                None
            }
        };
        let stable_id = surface
            .attr(node_ref, STABLE_ID_ATTR)
            .map(StableId)
            .or_else(|| existing.as_ref().map(|r| r.stable_id.clone()))
            .unwrap_or_else(|| StableId::generate(&self.book));
        let annotations = existing.map(|r| r.annotations).unwrap_or_default();

        Some(
            NodeRecord::new(
                self.book.clone(),
                node_id.clone(),
                stable_id,
                chunk_id,
                surface.serialize(node_ref),
            )
            .with_annotations(annotations),
        )
    }

    async fn put_with_retry(&self, store: &dyn NodeStore, record: &NodeRecord) -> bool {
        for attempt in 0..self.max_attempts {
            match store.put(record.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::debug!(
                            "Saved {} after {} retry(ies)",
                            record.node_id,
                            attempt
                        );
                    }
                    return true;
                }
                Err(e) => self.backoff(&record.node_id, attempt, &e).await,
            }
        }
        false
    }

    async fn delete_with_retry(&self, store: &dyn NodeStore, node_id: &NodeIdentifier) -> bool {
        for attempt in 0..self.max_attempts {
            match store.delete(&self.book, node_id).await {
                Ok(()) => return true,
                Err(e) => self.backoff(node_id, attempt, &e).await,
            }
        }
        false
    }

    async fn backoff(&self, node_id: &NodeIdentifier, attempt: u32, err: &anyhow::Error) {
        if attempt + 1 >= self.max_attempts {
            tracing::error!(
                "Write for {} failed after {} attempt(s): {}",
                node_id,
                self.max_attempts,
                err
            );
            return;
        }
        let delay = self.config.retry_backoff(attempt);
        tracing::warn!(
            "Write for {} failed (attempt {}), retrying in {:?}: {}",
            node_id,
            attempt + 1,
            delay,
            err
        );
        tokio::time::sleep(delay).await;
    }
}
