//! Persistence Layer
//!
//! Everything below the editing surface that deals with durable node state:
//!
//! - Order-defining identifier generation (`OrderedIdentifier`)
//! - The `NodeStore` collaborator trait and its in-memory implementation
//! - Domain events published after persistence and structural changes
//!
//! # Architecture
//!
//! Nodes are keyed by `(book, node_id)`. Document order is the order of the
//! identifiers themselves, so no separate position column exists. Any store
//! that can get, put, delete and range over a chunk satisfies `NodeStore`.

mod error;
pub mod events;
mod memory_store;
mod node_store;
pub mod ordered_identifier;

pub use error::StoreError;
pub use events::{DocumentEvent, Migration};
pub use memory_store::InMemoryNodeStore;
pub use node_store::NodeStore;
pub use ordered_identifier::{
    GeneratedIdentifier, IdentifierError, LiveIdentifiers, NoLiveIdentifiers, OrderedIdentifier,
};
