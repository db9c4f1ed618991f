//! Dirty-node intents
//!
//! Ephemeral add/update/delete signals produced by the change classifier and
//! consumed by the save queue. Never persisted.

use super::identifier::NodeIdentifier;
use crate::surface::ElementRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Add,
    Update,
    Delete,
}

impl IntentKind {
    /// Merge two intents for the same identifier seen in one batch.
    ///
    /// A later delete wins, a later add wins over a delete (the node came
    /// back), and an update never downgrades an add.
    pub fn merge(self, later: IntentKind) -> IntentKind {
        match (self, later) {
            (_, IntentKind::Delete) => IntentKind::Delete,
            (_, IntentKind::Add) => IntentKind::Add,
            (IntentKind::Add, IntentKind::Update) => IntentKind::Add,
            (IntentKind::Delete, IntentKind::Update) => IntentKind::Delete,
            (IntentKind::Update, IntentKind::Update) => IntentKind::Update,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyIntent {
    pub node_id: NodeIdentifier,
    pub kind: IntentKind,
    /// Element the intent refers to (for deletes: the detached element)
    pub node_ref: ElementRef,
}

impl DirtyIntent {
    pub fn new(node_id: NodeIdentifier, kind: IntentKind, node_ref: ElementRef) -> Self {
        Self {
            node_id,
            kind,
            node_ref,
        }
    }
}
