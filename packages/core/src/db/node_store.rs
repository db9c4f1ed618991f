//! NodeStore Trait - Local Durable Store Abstraction
//!
//! The chunking core persists node records through this trait and never talks
//! to a storage engine directly. Records are keyed by `(book, node_id)`.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: every method is async; real backends (IndexedDB through
//!    a bridge, SQLite, a remote KV) all have latency.
//! 2. **Ownership Semantics**: `put` takes the record by value.
//! 3. **Error Handling**: `anyhow::Result` for flexible error context.
//!
//! # Examples
//!
//! ```rust
//! use hyperlit_core::db::{InMemoryNodeStore, NodeStore};
//! use hyperlit_core::models::{ChunkId, NodeIdentifier, NodeRecord, StableId};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = InMemoryNodeStore::new();
//! let record = NodeRecord::new(
//!     "book1",
//!     NodeIdentifier::Integer(100),
//!     StableId::generate("book1"),
//!     ChunkId::new(0),
//!     "<p id=\"100\">Hello</p>",
//! );
//! store.put(record).await?;
//! assert!(store.get("book1", &NodeIdentifier::Integer(100)).await?.is_some());
//! # Ok(())
//! # }
//! ```

use crate::models::{ChunkId, NodeIdentifier, NodeRecord};
use anyhow::Result;
use async_trait::async_trait;

/// Durable per-book node storage
///
/// Implementations must be `Send + Sync` so a store can be shared with
/// background sync tasks.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Get a node by key
    ///
    /// - `Ok(Some(record))` if the node exists
    /// - `Ok(None)` if it doesn't (not an error)
    async fn get(&self, book: &str, node_id: &NodeIdentifier) -> Result<Option<NodeRecord>>;

    /// Insert or replace the record stored under `(record.book, record.node_id)`
    async fn put(&self, record: NodeRecord) -> Result<()>;

    /// Delete a record. Deleting a missing key is not an error.
    async fn delete(&self, book: &str, node_id: &NodeIdentifier) -> Result<()>;

    /// All records of one chunk, ordered by `node_id`
    async fn range_by_chunk(&self, book: &str, chunk_id: &ChunkId) -> Result<Vec<NodeRecord>>;

    /// All records of a book, ordered by `node_id`
    async fn all_for_book(&self, book: &str) -> Result<Vec<NodeRecord>>;

    /// Distinct chunk ids holding at least one record, ascending
    ///
    /// The default scans the whole book; backends with a chunk index should
    /// override it.
    async fn chunk_ids(&self, book: &str) -> Result<Vec<ChunkId>> {
        let mut ids: Vec<ChunkId> = self
            .all_for_book(book)
            .await?
            .into_iter()
            .map(|r| r.chunk_id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
