//! Structure repair
//!
//! A book must always show its two boundary sentinels, at least one chunk
//! container, and at least one addressable node. `ensure_structure` adds
//! whatever is missing and reports what it did; it never removes anything.
//!
//! The surface is only a window on a lazily loaded book, so the caller
//! passes the identifiers the store still holds as `live`; the default
//! paragraph never takes one of them.

use crate::db::{LiveIdentifiers, OrderedIdentifier};
use crate::models::{ChunkId, NodeIdentifier, StableId};
use crate::surface::{
    all_blocks, chunk_containers, chunk_id_of, EditingSurface, ElementRef, CHUNK_CLASS,
    CHUNK_ID_ATTR, NODE_ID_ATTR, STABLE_ID_ATTR,
};

/// What `ensure_structure` had to add
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureOutcome {
    pub added_top_sentinel: bool,
    pub added_bottom_sentinel: bool,
    pub created_chunk: Option<ChunkId>,
    /// Stored chunk rendered because the surface ran out of nodes while the
    /// book still had some
    pub loaded_chunk: Option<ChunkId>,
    /// Default paragraph created because no addressable node remained
    pub created_node: Option<NodeIdentifier>,
}

impl StructureOutcome {
    pub fn changed(&self) -> bool {
        self.added_top_sentinel
            || self.added_bottom_sentinel
            || self.created_chunk.is_some()
            || self.loaded_chunk.is_some()
            || self.created_node.is_some()
    }
}

pub fn top_sentinel_id(book: &str) -> String {
    format!("{}-top-sentinel", book)
}

pub fn bottom_sentinel_id(book: &str) -> String {
    format!("{}-bottom-sentinel", book)
}

/// Make sure the document has sentinels, a chunk and an addressable node
pub fn ensure_structure<S: EditingSurface + ?Sized>(
    surface: &mut S,
    book: &str,
    ids: &OrderedIdentifier,
    live: &dyn LiveIdentifiers,
) -> StructureOutcome {
    let mut outcome = StructureOutcome::default();
    let root = surface.root();

    let top_id = top_sentinel_id(book);
    if surface.find_by_id(&top_id).is_none() {
        let first = surface.children(root).into_iter().next();
        let sentinel = sentinel(surface, &top_id);
        surface.insert_before(root, sentinel, first);
        outcome.added_top_sentinel = true;
    }

    let bottom_id = bottom_sentinel_id(book);
    if surface.find_by_id(&bottom_id).is_none() {
        let sentinel = sentinel(surface, &bottom_id);
        surface.insert_before(root, sentinel, None);
        outcome.added_bottom_sentinel = true;
    }

    let container = match chunk_containers(surface).into_iter().next() {
        Some(container) => container,
        None => {
            let chunk_id = ChunkId::new(0);
            let container = surface.create_element("div");
            surface.set_attr(container, "class", CHUNK_CLASS);
            surface.set_attr(container, CHUNK_ID_ATTR, &chunk_id.to_string());
            let bottom = surface.find_by_id(&bottom_id);
            surface.insert_before(root, container, bottom);
            outcome.created_chunk = Some(chunk_id);
            container
        }
    };

    if all_blocks(surface).is_empty() {
        let node_id = match ids.generate_between(None, None, live) {
            Ok(generated) => generated.id,
            Err(_) => NodeIdentifier::Integer(1),
        };
        let paragraph = surface.create_element("p");
        surface.set_attr(paragraph, NODE_ID_ATTR, &node_id.to_string());
        surface.set_attr(paragraph, STABLE_ID_ATTR, StableId::generate(book).as_str());
        let line_break = surface.create_element("br");
        surface.insert_before(paragraph, line_break, None);
        let first = surface.children(container).into_iter().next();
        surface.insert_before(container, paragraph, first);
        surface.set_caret(paragraph, 0);
        outcome.created_node = Some(node_id);
    }

    if outcome.changed() {
        tracing::info!(
            "Repaired structure of '{}' (chunk {:?}, node {:?})",
            book,
            outcome
                .created_chunk
                .as_ref()
                .map(|c| c.to_string())
                .or_else(|| chunk_id_of(surface, container).map(|c| c.to_string())),
            outcome.created_node.as_ref().map(|n| n.to_string())
        );
    }
    outcome
}

fn sentinel<S: EditingSurface + ?Sized>(surface: &mut S, id: &str) -> ElementRef {
    let sentinel = surface.create_element("div");
    surface.set_attr(sentinel, NODE_ID_ATTR, id);
    surface.set_attr(sentinel, "class", "sentinel");
    sentinel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NoLiveIdentifiers;
    use crate::surface::{MemorySurface, SelectionController};
    use std::collections::BTreeSet;

    #[test]
    fn test_empty_surface_gets_full_skeleton() {
        let mut surface = MemorySurface::new();
        let outcome =
            ensure_structure(&mut surface, "book", &OrderedIdentifier::default(), &NoLiveIdentifiers);

        assert!(outcome.added_top_sentinel);
        assert!(outcome.added_bottom_sentinel);
        assert_eq!(outcome.created_chunk, Some(ChunkId::new(0)));
        assert_eq!(outcome.created_node, Some(NodeIdentifier::Integer(1)));

        let children = surface.children(surface.root());
        assert_eq!(children.len(), 3);
        assert_eq!(
            surface.attr(children[0], NODE_ID_ATTR).as_deref(),
            Some("book-top-sentinel")
        );
        assert_eq!(
            surface.attr(children[2], NODE_ID_ATTR).as_deref(),
            Some("book-bottom-sentinel")
        );
        let blocks = all_blocks(&surface);
        assert_eq!(blocks.len(), 1);
        assert_eq!(surface.tag(blocks[0].0).as_deref(), Some("p"));
        assert!(surface.attr(blocks[0].0, STABLE_ID_ATTR).is_some());
    }

    #[test]
    fn test_complete_document_is_untouched() {
        let mut surface = MemorySurface::with_chunks("book", &[(0, vec![("1", "hello")])]);
        let outcome =
            ensure_structure(&mut surface, "book", &OrderedIdentifier::default(), &NoLiveIdentifiers);
        assert!(!outcome.changed());
        assert!(surface.take_records().is_empty());
    }

    #[test]
    fn test_default_paragraph_avoids_stored_identifiers() {
        let mut surface = MemorySurface::with_chunks("book", &[(5, vec![])]);
        let stored: BTreeSet<NodeIdentifier> =
            [NodeIdentifier::Integer(1), NodeIdentifier::Integer(2)].into_iter().collect();
        let outcome =
            ensure_structure(&mut surface, "book", &OrderedIdentifier::default(), &stored);
        let created = outcome.created_node.unwrap();
        assert!(!stored.contains(&created));
    }

    #[test]
    fn test_empty_chunk_gets_default_paragraph() {
        let mut surface = MemorySurface::with_chunks("book", &[(3, vec![])]);
        let outcome =
            ensure_structure(&mut surface, "book", &OrderedIdentifier::default(), &NoLiveIdentifiers);
        assert_eq!(outcome.created_chunk, None);
        assert!(outcome.created_node.is_some());
        assert!(surface.caret().is_some());
    }
}
