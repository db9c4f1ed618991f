//! Per-frame mutation batching
//!
//! Change notifications arrive in bursts. The batcher queues them and asks
//! the host for exactly one animation frame; when the frame fires the whole
//! queue is processed at once. Processing is gated: while any phase guard is
//! held, or when the batch only touches editor chrome, the batch is dropped.

use super::classifier::{filter_records, is_chrome_only};
use super::guards::{OperationGuards, Phase};
use crate::surface::{ChangeRecord, EditingSurface};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameHandle(pub u64);

/// Host-side animation frame scheduling
pub trait FrameHost {
    fn request_frame(&mut self) -> FrameHandle;
    fn cancel_frame(&mut self, handle: FrameHandle);
}

/// Frame host driven by hand: frames fire only when `fire` is called
#[derive(Debug, Default)]
pub struct ManualFrameHost {
    next: u64,
    pending: BTreeSet<FrameHandle>,
    requested: usize,
}

impl ManualFrameHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the oldest pending frame, returning its handle
    pub fn fire(&mut self) -> Option<FrameHandle> {
        self.pending.pop_first()
    }

    pub fn has_pending_frame(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Total frames ever requested
    pub fn requested_count(&self) -> usize {
        self.requested
    }
}

impl FrameHost for ManualFrameHost {
    fn request_frame(&mut self) -> FrameHandle {
        self.next += 1;
        self.requested += 1;
        let handle = FrameHandle(self.next);
        self.pending.insert(handle);
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        self.pending.remove(&handle);
    }
}

/// Why a batch was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Guarded(Phase),
    UiChromeOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing was queued, or everything was filtered out
    Empty,
    Dropped { reason: DropReason, records: usize },
    /// Filtered records, ready for classification
    Ready(Vec<ChangeRecord>),
}

pub struct MutationBatcher {
    queue: Vec<ChangeRecord>,
    scheduled: Option<FrameHandle>,
    guards: OperationGuards,
}

impl MutationBatcher {
    pub fn new(guards: OperationGuards) -> Self {
        Self {
            queue: Vec::new(),
            scheduled: None,
            guards,
        }
    }

    /// Queue records; at most one frame is requested until it fires
    pub fn enqueue(&mut self, records: Vec<ChangeRecord>, host: &mut dyn FrameHost) {
        if records.is_empty() {
            return;
        }
        self.queue.extend(records);
        if self.scheduled.is_none() {
            self.scheduled = Some(host.request_frame());
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }

    /// Frame callback: drain the queue, apply the gates, filter
    pub fn process<S: EditingSurface + ?Sized>(&mut self, surface: &S) -> BatchOutcome {
        self.scheduled = None;
        let batch = std::mem::take(&mut self.queue);
        if batch.is_empty() {
            return BatchOutcome::Empty;
        }

        if let Some(phase) = self.guards.blocking_phase() {
            tracing::debug!(
                "Dropping batch of {} record(s): {} in progress",
                batch.len(),
                phase
            );
            return BatchOutcome::Dropped {
                reason: DropReason::Guarded(phase),
                records: batch.len(),
            };
        }

        if is_chrome_only(surface, &batch) {
            tracing::trace!("Dropping UI-chrome-only batch of {} record(s)", batch.len());
            return BatchOutcome::Dropped {
                reason: DropReason::UiChromeOnly,
                records: batch.len(),
            };
        }

        let filtered = filter_records(surface, batch);
        if filtered.is_empty() {
            BatchOutcome::Empty
        } else {
            BatchOutcome::Ready(filtered)
        }
    }

    /// Cancel the scheduled frame and process now
    pub fn flush<S: EditingSurface + ?Sized>(
        &mut self,
        surface: &S,
        host: &mut dyn FrameHost,
    ) -> BatchOutcome {
        if let Some(handle) = self.scheduled.take() {
            host.cancel_frame(handle);
        }
        self.process(surface)
    }

    /// Drop queued records without processing
    pub fn cancel(&mut self, host: &mut dyn FrameHost) {
        if let Some(handle) = self.scheduled.take() {
            host.cancel_frame(handle);
        }
        if !self.queue.is_empty() {
            tracing::debug!("Discarding {} queued record(s)", self.queue.len());
        }
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{EditingSurface, MemorySurface};

    fn typing_records(surface: &mut MemorySurface, n: usize) -> Vec<ChangeRecord> {
        let block = surface.find_by_id("1").unwrap();
        let text = surface.first_text(block).unwrap();
        for i in 0..n {
            surface.set_text(text, &format!("draft {}", i));
        }
        surface.take_records()
    }

    fn setup() -> (MemorySurface, OperationGuards, MutationBatcher, ManualFrameHost) {
        let surface = MemorySurface::with_chunks("book", &[(0, vec![("1", "one")])]);
        let guards = OperationGuards::new();
        let batcher = MutationBatcher::new(guards.clone());
        (surface, guards, batcher, ManualFrameHost::new())
    }

    #[test]
    fn test_one_frame_per_burst() {
        let (mut surface, _guards, mut batcher, mut host) = setup();
        for _ in 0..5 {
            let records = typing_records(&mut surface, 2);
            batcher.enqueue(records, &mut host);
        }
        assert_eq!(host.requested_count(), 1);
        assert_eq!(batcher.pending(), 10);

        assert!(host.fire().is_some());
        match batcher.process(&surface) {
            BatchOutcome::Ready(records) => assert_eq!(records.len(), 10),
            other => panic!("unexpected outcome {:?}", other),
        }

        // Next burst gets a new frame
        let records = typing_records(&mut surface, 1);
        batcher.enqueue(records, &mut host);
        assert_eq!(host.requested_count(), 2);
    }

    #[test]
    fn test_guarded_batch_is_dropped_not_requeued() {
        let (mut surface, guards, mut batcher, mut host) = setup();
        let records = typing_records(&mut surface, 3);
        batcher.enqueue(records, &mut host);

        {
            let _paste = guards.enter(Phase::Paste);
            assert_eq!(
                batcher.process(&surface),
                BatchOutcome::Dropped {
                    reason: DropReason::Guarded(Phase::Paste),
                    records: 3
                }
            );
        }
        assert_eq!(batcher.pending(), 0);
        assert_eq!(batcher.process(&surface), BatchOutcome::Empty);
    }

    #[test]
    fn test_overflow_phase_blocks_processing() {
        let (mut surface, guards, mut batcher, mut host) = setup();
        let records = typing_records(&mut surface, 1);
        batcher.enqueue(records, &mut host);
        let _overflow = guards.enter(Phase::Overflow);
        assert!(matches!(
            batcher.process(&surface),
            BatchOutcome::Dropped {
                reason: DropReason::Guarded(Phase::Overflow),
                ..
            }
        ));
    }

    #[test]
    fn test_flush_cancels_frame_and_processes() {
        let (mut surface, _guards, mut batcher, mut host) = setup();
        let records = typing_records(&mut surface, 1);
        batcher.enqueue(records, &mut host);
        assert!(host.has_pending_frame());

        assert!(matches!(
            batcher.flush(&surface, &mut host),
            BatchOutcome::Ready(_)
        ));
        assert!(!host.has_pending_frame());
        assert!(!batcher.is_scheduled());
    }

    #[test]
    fn test_cancel_drops_queue() {
        let (mut surface, _guards, mut batcher, mut host) = setup();
        let records = typing_records(&mut surface, 4);
        batcher.enqueue(records, &mut host);
        batcher.cancel(&mut host);

        assert_eq!(batcher.pending(), 0);
        assert!(!host.has_pending_frame());
        assert_eq!(batcher.process(&surface), BatchOutcome::Empty);
    }

    #[test]
    fn test_chrome_only_batch_is_dropped() {
        let (mut surface, _guards, mut batcher, mut host) = setup();
        let icon = surface.create_element("span");
        surface.set_attr(icon, "class", "status-icon");
        let root = surface.root();
        surface.insert_before(root, icon, None);
        surface.clear_records();
        surface.set_attr(icon, "class", "status-icon saved");

        let records = surface.take_records();
        batcher.enqueue(records, &mut host);
        assert!(matches!(
            batcher.process(&surface),
            BatchOutcome::Dropped {
                reason: DropReason::UiChromeOnly,
                ..
            }
        ));
    }
}
