//! Editing Surface Abstraction
//!
//! The chunking core never touches a browser DOM directly. It sees an ordered
//! tree of elements through [`EditingSurface`], reads and moves the caret
//! through [`SelectionController`], and consumes [`ChangeRecord`]s shaped like
//! mutation-observer notifications.
//!
//! Document shape the core relies on:
//!
//! ```text
//! root
//! ├── {book}-top-sentinel
//! ├── div.chunk[data-chunk-id=0]
//! │   ├── p#1[data-node-id=...]
//! │   └── h2#2[data-node-id=...]
//! ├── div.chunk[data-chunk-id=1]
//! │   └── ...
//! └── {book}-bottom-sentinel
//! ```
//!
//! [`MemorySurface`] is the bundled adapter; a browser host provides its own.

mod markup;
mod memory;

pub use markup::{
    escape_attr, escape_text, is_void_element, parse_block_markup, parse_fragment, rewrite_element_id,
    MarkupNode,
};
pub use memory::MemorySurface;

use crate::models::{ChunkId, NodeIdentifier};

/// Attribute holding a block's order identifier
pub const NODE_ID_ATTR: &str = "id";
/// Attribute holding a block's stable identity
pub const STABLE_ID_ATTR: &str = "data-node-id";
/// Attribute holding a chunk container's identifier
pub const CHUNK_ID_ATTR: &str = "data-chunk-id";
/// Class carried by chunk containers
pub const CHUNK_CLASS: &str = "chunk";
/// Prefix of inline hypercite anchors, which never get identifiers of their own
pub const HYPERCITE_PREFIX: &str = "hypercite_";

/// Handle to an element or text node owned by a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementRef(pub u64);

/// Caret position: a node plus a character offset into it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caret {
    pub node: ElementRef,
    pub offset: usize,
}

/// Abstraction over the host's selection API
pub trait SelectionController {
    fn caret(&self) -> Option<Caret>;
    fn set_caret(&mut self, node: ElementRef, offset: usize);
}

/// One low-level change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord {
    ChildList {
        target: ElementRef,
        added: Vec<ElementRef>,
        removed: Vec<ElementRef>,
    },
    CharacterData {
        target: ElementRef,
    },
    Attributes {
        target: ElementRef,
        name: String,
    },
}

impl ChangeRecord {
    pub fn target(&self) -> ElementRef {
        match self {
            ChangeRecord::ChildList { target, .. }
            | ChangeRecord::CharacterData { target }
            | ChangeRecord::Attributes { target, .. } => *target,
        }
    }
}

/// Ordered-node-container view of the editable document
///
/// Text nodes and elements share the `ElementRef` handle space; `tag`
/// returns `None` for text nodes. Detached nodes stay readable (their
/// attributes and subtree survive), which is what removal records need.
pub trait EditingSurface: SelectionController {
    fn root(&self) -> ElementRef;

    /// Lowercase tag name, `None` for text nodes
    fn tag(&self, node: ElementRef) -> Option<String>;

    fn attr(&self, node: ElementRef, name: &str) -> Option<String>;
    fn attr_names(&self, node: ElementRef) -> Vec<String>;
    fn set_attr(&mut self, node: ElementRef, name: &str, value: &str);
    fn remove_attr(&mut self, node: ElementRef, name: &str);

    fn parent(&self, node: ElementRef) -> Option<ElementRef>;
    fn children(&self, node: ElementRef) -> Vec<ElementRef>;

    /// Whether the node is connected to `root`
    fn is_attached(&self, node: ElementRef) -> bool;

    fn create_element(&mut self, tag: &str) -> ElementRef;
    fn create_text(&mut self, text: &str) -> ElementRef;

    /// Build a detached element from one block of markup
    fn create_from_markup(&mut self, html: &str) -> Option<ElementRef>;

    /// Insert `node` under `parent` before `reference` (append when `None`).
    /// A node that is attached elsewhere is moved.
    fn insert_before(&mut self, parent: ElementRef, node: ElementRef, reference: Option<ElementRef>);

    /// Detach `node` from its parent. No-op when already detached.
    fn remove(&mut self, node: ElementRef);

    fn text_content(&self, node: ElementRef) -> String;

    /// Replace the node's text. Elements lose their children for one text node.
    fn set_text(&mut self, node: ElementRef, text: &str);

    /// Outer markup of a node
    fn serialize(&self, node: ElementRef) -> String;

    /// Suspend or restore user input
    fn set_editable(&mut self, editable: bool);
    fn is_editable(&self) -> bool;

    /// Drain change records observed since the last call
    fn take_records(&mut self) -> Vec<ChangeRecord>;

    fn is_text(&self, node: ElementRef) -> bool {
        self.tag(node).is_none()
    }

    fn next_sibling(&self, node: ElementRef) -> Option<ElementRef> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == node)?;
        siblings.get(pos + 1).copied()
    }

    fn previous_sibling(&self, node: ElementRef) -> Option<ElementRef> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == node)?;
        pos.checked_sub(1).and_then(|p| siblings.get(p).copied())
    }

    /// Pre-order descendants, excluding `node` itself
    fn descendants(&self, node: ElementRef) -> Vec<ElementRef> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementRef> = self.children(node).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    fn contains(&self, ancestor: ElementRef, node: ElementRef) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// Attached element whose `id` attribute equals `id`
    fn find_by_id(&self, id: &str) -> Option<ElementRef> {
        self.descendants(self.root())
            .into_iter()
            .find(|n| self.attr(*n, NODE_ID_ATTR).as_deref() == Some(id))
    }
}

/// Parsed order identifier of an element, if it carries a valid one
pub fn node_identifier<S: EditingSurface + ?Sized>(
    surface: &S,
    node: ElementRef,
) -> Option<NodeIdentifier> {
    surface
        .attr(node, NODE_ID_ATTR)
        .and_then(|raw| NodeIdentifier::parse(&raw).ok())
}

/// Whether the element is a chunk container
pub fn is_chunk_container<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef) -> bool {
    surface.attr(node, CHUNK_ID_ATTR).is_some()
}

/// Identifier of a chunk container
pub fn chunk_id_of<S: EditingSurface + ?Sized>(surface: &S, container: ElementRef) -> Option<ChunkId> {
    surface
        .attr(container, CHUNK_ID_ATTR)
        .and_then(|raw| ChunkId::parse(&raw).ok())
}

/// Closest chunk container at or above `node`
pub fn chunk_container_of<S: EditingSurface + ?Sized>(
    surface: &S,
    node: ElementRef,
) -> Option<ElementRef> {
    let mut current = Some(node);
    while let Some(n) = current {
        if is_chunk_container(surface, n) {
            return Some(n);
        }
        current = surface.parent(n);
    }
    None
}

/// Closest block (element with a valid order identifier) at or above `node`
pub fn enclosing_block<S: EditingSurface + ?Sized>(
    surface: &S,
    node: ElementRef,
) -> Option<(ElementRef, NodeIdentifier)> {
    let mut current = Some(node);
    while let Some(n) = current {
        if is_chunk_container(surface, n) {
            return None;
        }
        if let Some(id) = node_identifier(surface, n) {
            return Some((n, id));
        }
        current = surface.parent(n);
    }
    None
}

/// Attached chunk containers in document order
pub fn chunk_containers<S: EditingSurface + ?Sized>(surface: &S) -> Vec<ElementRef> {
    surface
        .descendants(surface.root())
        .into_iter()
        .filter(|n| is_chunk_container(surface, *n))
        .collect()
}

/// Attached chunk container with the given identifier
pub fn find_chunk<S: EditingSurface + ?Sized>(surface: &S, chunk_id: &ChunkId) -> Option<ElementRef> {
    chunk_containers(surface)
        .into_iter()
        .find(|c| chunk_id_of(surface, *c).as_ref() == Some(chunk_id))
}

/// Direct children of a chunk container that carry a valid identifier
pub fn blocks_in<S: EditingSurface + ?Sized>(
    surface: &S,
    container: ElementRef,
) -> Vec<(ElementRef, NodeIdentifier)> {
    surface
        .children(container)
        .into_iter()
        .filter_map(|c| node_identifier(surface, c).map(|id| (c, id)))
        .collect()
}

/// Every attached block in document order
pub fn all_blocks<S: EditingSurface + ?Sized>(surface: &S) -> Vec<(ElementRef, NodeIdentifier)> {
    chunk_containers(surface)
        .into_iter()
        .flat_map(|c| blocks_in(surface, c))
        .collect()
}

/// Identifiers of the closest identified blocks before and after `node` in
/// document order. The `after` neighbor is skipped past anything that does
/// not sort above `before`. `None` when `node` is not a chunk child.
pub fn neighbor_identifiers<S: EditingSurface + ?Sized>(
    surface: &S,
    node: ElementRef,
) -> Option<(Option<NodeIdentifier>, Option<NodeIdentifier>)> {
    let order: Vec<ElementRef> = chunk_containers(surface)
        .into_iter()
        .flat_map(|c| surface.children(c))
        .filter(|c| !surface.is_text(*c))
        .collect();
    let pos = order.iter().position(|c| *c == node)?;

    let before = order[..pos]
        .iter()
        .rev()
        .find_map(|c| node_identifier(surface, *c));
    let after = order[pos + 1..]
        .iter()
        .filter_map(|c| node_identifier(surface, *c))
        .find(|id| before.as_ref().map(|b| id > b).unwrap_or(true));
    Some((before, after))
}

/// Whether the tag renders as a heading (table-of-contents relevant)
pub fn is_heading_tag(tag: &str) -> bool {
    matches!(tag, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

/// Character offset of `caret` measured from the start of `node`'s text
pub fn text_offset_within<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef, caret: Caret) -> usize {
    if caret.node == node {
        return if surface.is_text(node) { caret.offset } else { 0 };
    }
    let mut offset = 0;
    for n in surface.descendants(node) {
        if n == caret.node {
            return offset + if surface.is_text(n) { caret.offset } else { 0 };
        }
        if surface.is_text(n) {
            offset += surface.text_content(n).chars().count();
        }
    }
    offset
}

/// Caret position `offset` characters into `node`'s text.
///
/// Lands in the text node containing the offset, clamped to the end of the
/// last text node; an element without text gets the caret on itself.
pub fn caret_at_offset<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef, offset: usize) -> Caret {
    let texts: Vec<ElementRef> = if surface.is_text(node) {
        vec![node]
    } else {
        surface
            .descendants(node)
            .into_iter()
            .filter(|n| surface.is_text(*n))
            .collect()
    };

    let mut remaining = offset;
    for (i, text) in texts.iter().enumerate() {
        let len = surface.text_content(*text).chars().count();
        if remaining <= len || i == texts.len() - 1 {
            return Caret {
                node: *text,
                offset: remaining.min(len),
            };
        }
        remaining -= len;
    }
    Caret { node, offset: 0 }
}
