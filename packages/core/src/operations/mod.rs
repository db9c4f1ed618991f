//! Mutation Pipeline Operations
//!
//! The synchronous half of the core, run from animation-frame callbacks:
//!
//! - `OperationGuards` - phase flags that suppress batch processing while
//!   paste, overflow, renumbering and friends mutate the surface
//! - `MutationBatcher` - one batch per frame, gated and filtered
//! - `ChangeClassifier` - records to dirty intents and side effects
//! - `WorkQueue` - keyed deadlines for debounced and idle-time work

mod batcher;
mod classifier;
mod guards;
mod scheduler;

pub use batcher::{BatchOutcome, DropReason, FrameHandle, FrameHost, ManualFrameHost, MutationBatcher};
pub use classifier::{filter_records, is_chrome_only, ChangeClassifier, ChunkDelta, Classification};
pub use guards::{OperationGuards, Phase, PhaseGuard};
pub use scheduler::{SchedulePolicyKind, WorkQueue};
