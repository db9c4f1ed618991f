//! Document Services
//!
//! The stateful half of the chunking core:
//!
//! - `ChunkIndex` - chunk membership counts, optimistic deltas plus
//!   authoritative recounts
//! - `OverflowResolver` - splits over-budget chunks, preserving the caret
//! - `SaveQueue` - coalesced, retried writes to the `NodeStore`
//! - `RenumberingEngine` - whole-book identifier reassignment
//! - `ensure_structure` - sentinels, a chunk and at least one node
//! - `OperationCoordinator` - one document session tying it all together
//!
//! Collaborators the host provides (`SyncTransport`, `Sanitizer`) and the
//! user-visible `StatusIndicator` live here too.

mod chunk_index;
mod coordinator;
mod error;
mod overflow;
mod renumbering;
mod save_queue;
mod status;
mod structure;
mod sync;

pub use chunk_index::ChunkIndex;
pub use coordinator::{FrameReport, OperationCoordinator, PasteReport, WorkReport};
pub use error::EditorError;
pub use overflow::{OverflowReport, OverflowResolver};
pub use renumbering::{RenumberReport, RenumberTicket, RenumberingEngine};
pub use save_queue::{FlushReport, PendingKind, SaveQueue};
pub use status::{StatusIndicator, SyncStatus};
pub use structure::{bottom_sentinel_id, ensure_structure, top_sentinel_id, StructureOutcome};
pub use sync::{
    NoopSyncTransport, PassthroughSanitizer, RecordingSyncTransport, Sanitizer, SyncTransport,
};
