//! Node Records
//!
//! The persisted shape of a node in the local store, keyed by `(book, node_id)`:
//!
//! ```json
//! { "nodeId": "42.3", "stableId": "book_1718000000000_k3j9x0a1b",
//!   "chunkId": 0, "content": "<p id=\"42.3\" ...>...</p>", "annotations": [] }
//! ```
//!
//! `node_id` orders the node and may change (renumbering, conflict
//! resolution). `stable_id` never changes once assigned.

use super::identifier::{ChunkId, NodeIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Permanent identity of a node, surviving renumbering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(pub String);

impl StableId {
    /// Generate a fresh stable id: `{book}_{unix_millis}_{random suffix}`
    pub fn generate(book: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}_{}", book, millis, &random[..9]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StableId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Citation, highlight or footnote attached to a node.
///
/// Opaque to the chunking core; carried along whenever the node moves
/// between chunks or is renumbered.
pub type Annotation = serde_json::Value;

/// Persisted node record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Book the node belongs to. Part of the store key, not of the record body.
    #[serde(skip)]
    pub book: String,

    /// Order-defining display identifier
    pub node_id: NodeIdentifier,

    /// Permanent identity
    pub stable_id: StableId,

    /// Owning chunk
    pub chunk_id: ChunkId,

    /// Serialized markup; its outer element's `id` is always `node_id`
    pub content: String,

    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl NodeRecord {
    pub fn new(
        book: impl Into<String>,
        node_id: NodeIdentifier,
        stable_id: StableId,
        chunk_id: ChunkId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            book: book.into(),
            node_id,
            stable_id,
            chunk_id,
            content: content.into(),
            annotations: Vec::new(),
        }
    }

    /// Store key for this record
    pub fn key(&self) -> (&str, &NodeIdentifier) {
        (&self.book, &self.node_id)
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }
}
