//! Upstream collaborators: background sync and paste sanitization
//!
//! The core hands saved records to a `SyncTransport` and never retries
//! beyond what the save queue already does against the local store.
//! Externally sourced markup always passes through a `Sanitizer`.

use crate::models::NodeRecord;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Background durable sync to a server
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn upsert(&self, book: &str, nodes: Vec<NodeRecord>) -> Result<()>;
}

/// Sync transport that drops everything
pub struct NoopSyncTransport;

#[async_trait]
impl SyncTransport for NoopSyncTransport {
    async fn upsert(&self, _book: &str, _nodes: Vec<NodeRecord>) -> Result<()> {
        Ok(())
    }
}

/// Sync transport that remembers every upsert
#[derive(Default)]
pub struct RecordingSyncTransport {
    calls: Mutex<Vec<(String, Vec<NodeRecord>)>>,
    failing: AtomicBool,
}

impl RecordingSyncTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent upserts fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<(String, Vec<NodeRecord>)> {
        self.calls.lock().await.clone()
    }

    /// Every record ever upserted, flattened
    pub async fn records(&self) -> Vec<NodeRecord> {
        self.calls
            .lock()
            .await
            .iter()
            .flat_map(|(_, nodes)| nodes.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl SyncTransport for RecordingSyncTransport {
    async fn upsert(&self, book: &str, nodes: Vec<NodeRecord>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("sync transport offline");
        }
        self.calls.lock().await.push((book.to_string(), nodes));
        Ok(())
    }
}

/// Strips executable content from externally sourced markup
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, html: &str) -> String;
}

/// Sanitizer for trusted input; returns markup unchanged
pub struct PassthroughSanitizer;

impl Sanitizer for PassthroughSanitizer {
    fn sanitize(&self, html: &str) -> String {
        html.to_string()
    }
}
