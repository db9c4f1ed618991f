//! Store Error Types
//!
//! Errors raised by the bundled store implementation. Collaborator traits
//! return `anyhow::Result`, so these travel boxed inside `anyhow::Error` and
//! can be recovered with `downcast_ref`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Write refused for a key (failure injection, quota, locked store)
    #[error("Write rejected for {book}/{node_id}: {reason}")]
    WriteRejected {
        book: String,
        node_id: String,
        reason: String,
    },

    /// The store is closed or otherwise unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn write_rejected(
        book: impl Into<String>,
        node_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::WriteRejected {
            book: book.into(),
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
