//! Phase guards
//!
//! Subsystems that mutate the editing surface outside the normal observer
//! flow (paste, overflow, renumbering, formatting, ...) hold a phase guard
//! while they work. The mutation batcher consults the guards and drops any
//! batch that arrives while one is held.
//!
//! Guards are counters, not booleans, so nested holders of the same phase
//! do not release each other. A [`PhaseGuard`] releases on drop, which
//! covers early returns and errors alike.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Operations that suppress mutation-batch processing while in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Paste,
    Programmatic,
    HypercitePaste,
    ChunkLoading,
    Formatting,
    KeyboardLayout,
    Overflow,
    Renumbering,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Paste,
        Phase::Programmatic,
        Phase::HypercitePaste,
        Phase::ChunkLoading,
        Phase::Formatting,
        Phase::KeyboardLayout,
        Phase::Overflow,
        Phase::Renumbering,
    ];

    fn index(self) -> usize {
        match self {
            Phase::Paste => 0,
            Phase::Programmatic => 1,
            Phase::HypercitePaste => 2,
            Phase::ChunkLoading => 3,
            Phase::Formatting => 4,
            Phase::KeyboardLayout => 5,
            Phase::Overflow => 6,
            Phase::Renumbering => 7,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Paste => "paste",
            Phase::Programmatic => "programmatic-update",
            Phase::HypercitePaste => "hypercite-paste",
            Phase::ChunkLoading => "chunk-loading",
            Phase::Formatting => "formatting",
            Phase::KeyboardLayout => "keyboard-layout",
            Phase::Overflow => "overflow",
            Phase::Renumbering => "renumbering",
        };
        f.write_str(name)
    }
}

/// Shared set of phase counters for one document session
///
/// Cloning shares the counters, so a host-side paste handler and the
/// coordinator can hold the same guards.
#[derive(Debug, Clone, Default)]
pub struct OperationGuards {
    counters: Arc<[AtomicUsize; 8]>,
}

impl OperationGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `phase` as in flight until the returned guard is dropped
    pub fn enter(&self, phase: Phase) -> PhaseGuard {
        self.counters[phase.index()].fetch_add(1, Ordering::SeqCst);
        tracing::trace!("Entered {} phase", phase);
        PhaseGuard {
            counters: Arc::clone(&self.counters),
            phase,
        }
    }

    pub fn is_active(&self, phase: Phase) -> bool {
        self.counters[phase.index()].load(Ordering::SeqCst) > 0
    }

    /// First in-flight phase, if any
    pub fn blocking_phase(&self) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| self.is_active(*p))
    }
}

/// Holds a phase open; releases it on drop
#[must_use = "the phase is released as soon as the guard is dropped"]
pub struct PhaseGuard {
    counters: Arc<[AtomicUsize; 8]>,
    phase: Phase,
}

impl PhaseGuard {
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.counters[self.phase.index()].fetch_sub(1, Ordering::SeqCst);
        tracing::trace!("Left {} phase", self.phase);
    }
}
