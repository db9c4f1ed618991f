//! In-memory NodeStore
//!
//! A `BTreeMap` keyed by `(book, node_id)`, so range scans come out in
//! document order. Used by tests and by hosts that keep their own durable
//! layer behind a sync transport.
//!
//! Supports failure injection: a key can be made to fail its next `n`
//! writes, which is how retry and failure isolation are exercised.

use super::error::StoreError;
use super::node_store::NodeStore;
use crate::models::{ChunkId, NodeIdentifier, NodeRecord};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

type Key = (String, NodeIdentifier);

#[derive(Default)]
pub struct InMemoryNodeStore {
    records: RwLock<BTreeMap<Key, NodeRecord>>,
    failures: RwLock<HashMap<Key, u32>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store
    pub fn with_records(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| ((r.book.clone(), r.node_id.clone()), r))
            .collect();
        Self {
            records: RwLock::new(map),
            ..Self::default()
        }
    }

    /// Make the next `times` writes (put or delete) for this key fail
    pub async fn fail_writes(&self, book: &str, node_id: &NodeIdentifier, times: u32) {
        self.failures
            .write()
            .await
            .insert((book.to_string(), node_id.clone()), times);
    }

    /// Number of successful `put` calls so far
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of successful `delete` calls so far
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn check_injected_failure(&self, key: &Key) -> Result<()> {
        let mut failures = self.failures.write().await;
        if let Some(remaining) = failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::write_rejected(
                    key.0.clone(),
                    key.1.to_string(),
                    "injected failure",
                )
                .into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn get(&self, book: &str, node_id: &NodeIdentifier) -> Result<Option<NodeRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(book.to_string(), node_id.clone())).cloned())
    }

    async fn put(&self, record: NodeRecord) -> Result<()> {
        let key = (record.book.clone(), record.node_id.clone());
        self.check_injected_failure(&key).await?;
        self.records.write().await.insert(key, record);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, book: &str, node_id: &NodeIdentifier) -> Result<()> {
        let key = (book.to_string(), node_id.clone());
        self.check_injected_failure(&key).await?;
        self.records.write().await.remove(&key);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn range_by_chunk(&self, book: &str, chunk_id: &ChunkId) -> Result<Vec<NodeRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((b, _), r)| b == book && &r.chunk_id == chunk_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn all_for_book(&self, book: &str) -> Result<Vec<NodeRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((b, _), _)| b == book)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
