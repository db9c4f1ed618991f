//! Domain Events for a Document Session
//!
//! Emitted by the coordinator whenever the durable or structural state of a
//! book changes, so that dependent features (table of contents, sync badges,
//! lazy-loader caches) can react without coupling to the chunking core.
//!
//! Events go out on a tokio broadcast channel; slow subscribers may lag and
//! miss events, which is acceptable for cache-invalidation style consumers.

use crate::models::{ChunkId, NodeIdentifier};
use serde::{Deserialize, Serialize};

/// A node moved from one chunk to another without changing its identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub node_id: NodeIdentifier,
    pub from_chunk: ChunkId,
    pub to_chunk: ChunkId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    /// Records were written to the store
    NodesSaved { node_ids: Vec<NodeIdentifier> },

    /// Records were removed from the store
    NodesDeleted { node_ids: Vec<NodeIdentifier> },

    /// Overflow created a new chunk container
    ChunkCreated { chunk_id: ChunkId },

    /// Overflow moved nodes between chunks
    NodesMigrated { migrations: Vec<Migration> },

    /// Every identifier in the book was reassigned
    Renumbered { node_count: usize, chunk_count: usize },

    /// The document was empty and a default paragraph was created
    StructureRepaired { node_id: NodeIdentifier },

    /// Heading-keyed caches (table of contents) must be rebuilt.
    /// `heading` is true when a heading-like element changed.
    TocInvalidated { heading: bool },
}

impl DocumentEvent {
    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::NodesSaved { .. } => "nodes:saved",
            DocumentEvent::NodesDeleted { .. } => "nodes:deleted",
            DocumentEvent::ChunkCreated { .. } => "chunk:created",
            DocumentEvent::NodesMigrated { .. } => "nodes:migrated",
            DocumentEvent::Renumbered { .. } => "document:renumbered",
            DocumentEvent::StructureRepaired { .. } => "document:repaired",
            DocumentEvent::TocInvalidated { .. } => "toc:invalidated",
        }
    }
}
