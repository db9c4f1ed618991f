//! Service Layer Error Types
//!
//! Error taxonomy for the chunking core. Most of these are recovered close
//! to where they happen (logged, converted to a status signal); they surface
//! as values only from operations that report success or failure to callers.

use crate::db::IdentifierError;
use crate::models::{InvalidIdentifier, NodeIdentifier};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    /// Identifier generation was asked for a slot between out-of-order neighbors
    #[error("Ordering violation: {before} is not before {after}")]
    OrderingViolation {
        before: NodeIdentifier,
        after: NodeIdentifier,
    },

    /// No identifier can be generated at the requested position
    #[error("Identifier space exhausted: {0}")]
    IdentifierSpaceExhausted(String),

    /// The surface is not in the shape an operation requires
    #[error("Structural integrity violation: {0}")]
    StructuralIntegrity(String),

    /// A store write failed after every retry
    #[error("Persistence failed for {node_id} after {attempts} attempt(s): {reason}")]
    PersistenceFailure {
        node_id: NodeIdentifier,
        attempts: u32,
        reason: String,
    },

    /// An operation would leave the document without addressable nodes
    #[error("Refusing to remove the last addressable node: {0}")]
    LastNodeProtection(String),

    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Collaborator failure (store, sync transport)
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EditorError {
    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::IdentifierSpaceExhausted(msg.into())
    }

    pub fn structural(msg: impl Into<String>) -> Self {
        Self::StructuralIntegrity(msg.into())
    }

    pub fn persistence(node_id: NodeIdentifier, attempts: u32, reason: impl Into<String>) -> Self {
        Self::PersistenceFailure {
            node_id,
            attempts,
            reason: reason.into(),
        }
    }

    pub fn last_node(msg: impl Into<String>) -> Self {
        Self::LastNodeProtection(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<IdentifierError> for EditorError {
    fn from(err: IdentifierError) -> Self {
        Self::IdentifierSpaceExhausted(err.to_string())
    }
}
