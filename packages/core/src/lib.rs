//! Hyperlit Core
//!
//! The chunked document model behind the Hyperlit editor: very large books
//! stay editable because only a window of bounded-size chunks is ever on the
//! editing surface.
//!
//! # Architecture
//!
//! - **Sparse ordered identifiers**: nodes carry `42`, `42.3`, `42.31`, ...
//!   so an insertion between any two nodes never renumbers the rest
//! - **Bounded chunks**: a chunk holds at most `node_limit` nodes; overflow
//!   moves trailing nodes to the next or a new chunk
//! - **Per-frame batching**: surface change records are coalesced into one
//!   batch per animation frame, gated by phase guards
//! - **Coalesced persistence**: dirty nodes become one write each, retried
//!   per identifier, then handed to background sync
//!
//! # Modules
//!
//! - [`models`] - identifiers, node records, dirty intents
//! - [`db`] - the `NodeStore` collaborator, identifier generation, events
//! - [`surface`] - the editing-surface abstraction and an in-memory adapter
//! - [`operations`] - guards, scheduling, batching, classification
//! - [`services`] - chunk index, overflow, saves, renumbering, the session

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod operations;
pub mod services;
pub mod surface;

// Re-export commonly used types
pub use config::EditorConfig;
pub use db::{DocumentEvent, InMemoryNodeStore, NodeStore, OrderedIdentifier};
pub use models::*;
pub use services::*;
