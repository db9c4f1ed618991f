//! Data Models
//!
//! - `NodeIdentifier` / `ChunkId` - typed order identifiers
//! - `NodeRecord` - the persisted node shape
//! - `DirtyIntent` - ephemeral change signals between classifier and save queue

mod identifier;
mod intent;
mod node;

pub use identifier::{ChunkId, InvalidIdentifier, NodeIdentifier};
pub use intent::{DirtyIntent, IntentKind};
pub use node::{Annotation, NodeRecord, StableId};
