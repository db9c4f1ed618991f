//! Save status indicator
//!
//! The user-visible signal for persistence state. Failures end up here
//! instead of bubbling to the UI as errors, so edits are never silently
//! discarded without something visible changing.

use crate::models::NodeIdentifier;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    Idle,
    /// Writes are queued but not yet flushed
    Pending,
    Saving,
    Saved { at: DateTime<Utc> },
    /// These identifiers exhausted their retries
    Failed { node_ids: Vec<NodeIdentifier> },
}

impl SyncStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, SyncStatus::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StatusIndicator {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl Default for StatusIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusIndicator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, status: SyncStatus) {
        if let SyncStatus::Failed { node_ids } = &status {
            tracing::error!("Sync failed for {} node(s)", node_ids.len());
        }
        self.tx.send_replace(status);
    }

    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }
}
