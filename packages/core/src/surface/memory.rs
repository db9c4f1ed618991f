//! In-memory editing surface
//!
//! An arena-backed element tree that behaves like the parts of a browser DOM
//! the chunking core relies on: ordered children, attributes, text nodes,
//! detached subtrees that stay readable, a caret that is lost when its node
//! leaves the document, and a mutation log drained with `take_records`.

use super::markup::{escape_attr, escape_text, is_void_element, parse_block_markup, MarkupNode};
use super::{
    Caret, ChangeRecord, EditingSurface, ElementRef, SelectionController, CHUNK_CLASS,
    CHUNK_ID_ATTR, NODE_ID_ATTR, STABLE_ID_ATTR,
};
use crate::models::{ChunkId, NodeIdentifier, StableId};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Content {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Slot {
    content: Content,
    parent: Option<ElementRef>,
    children: Vec<ElementRef>,
}

#[derive(Debug, Clone)]
pub struct MemorySurface {
    slots: Vec<Slot>,
    root: ElementRef,
    caret: Option<Caret>,
    editable: bool,
    records: Vec<ChangeRecord>,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySurface {
    /// Empty editable root (`div.main-content`)
    pub fn new() -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert("class".to_string(), "main-content".to_string());
        let root_slot = Slot {
            content: Content::Element {
                tag: "div".to_string(),
                attrs,
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            slots: vec![root_slot],
            root: ElementRef(0),
            caret: None,
            editable: true,
            records: Vec::new(),
        }
    }

    /// Build a book laid out as consecutive chunks of blocks.
    ///
    /// Each chunk is `(chunk_id, [(node_id, text)])`; blocks are `<p>`
    /// elements with fresh stable ids. The mutation log starts empty.
    pub fn with_chunks(book: &str, chunks: &[(u64, Vec<(&str, &str)>)]) -> Self {
        let mut surface = Self::new();
        surface.add_sentinels(book);
        for (chunk_id, blocks) in chunks {
            let container = surface.add_chunk(&ChunkId::new(*chunk_id));
            for (node_id, text) in blocks {
                surface.add_block(container, "p", node_id, text, &StableId::generate(book));
            }
        }
        surface.clear_records();
        surface
    }

    /// Append top and bottom sentinels for `book` under the root
    pub fn add_sentinels(&mut self, book: &str) {
        let top = self.create_element("div");
        self.set_attr(top, NODE_ID_ATTR, &format!("{}-top-sentinel", book));
        self.set_attr(top, "class", "sentinel");
        self.insert_before(self.root, top, None);

        let bottom = self.create_element("div");
        self.set_attr(bottom, NODE_ID_ATTR, &format!("{}-bottom-sentinel", book));
        self.set_attr(bottom, "class", "sentinel");
        self.insert_before(self.root, bottom, None);
    }

    /// Append a chunk container, before the bottom sentinel when there is one
    pub fn add_chunk(&mut self, chunk_id: &ChunkId) -> ElementRef {
        let container = self.create_element("div");
        self.set_attr(container, "class", CHUNK_CLASS);
        self.set_attr(container, CHUNK_ID_ATTR, &chunk_id.to_string());

        let bottom = self
            .children(self.root)
            .into_iter()
            .find(|c| {
                self.attr(*c, NODE_ID_ATTR)
                    .map(|id| id.ends_with("-bottom-sentinel"))
                    .unwrap_or(false)
            });
        self.insert_before(self.root, container, bottom);
        container
    }

    /// Append a text block to a chunk container
    pub fn add_block(
        &mut self,
        container: ElementRef,
        tag: &str,
        node_id: &str,
        text: &str,
        stable_id: &StableId,
    ) -> ElementRef {
        let block = self.create_element(tag);
        self.set_attr(block, NODE_ID_ATTR, node_id);
        self.set_attr(block, STABLE_ID_ATTR, stable_id.as_str());
        let text_node = self.create_text(text);
        self.insert_before(block, text_node, None);
        self.insert_before(container, block, None);
        block
    }

    pub fn clear_records(&mut self) {
        self.records.clear();
    }

    /// First text node under `node` (or `node` itself when it is text)
    pub fn first_text(&self, node: ElementRef) -> Option<ElementRef> {
        if self.is_text(node) {
            return Some(node);
        }
        self.descendants(node).into_iter().find(|n| self.is_text(*n))
    }

    /// Identifiers of every block in document order, for assertions
    pub fn block_ids(&self) -> Vec<NodeIdentifier> {
        super::all_blocks(self).into_iter().map(|(_, id)| id).collect()
    }

    fn slot(&self, node: ElementRef) -> Option<&Slot> {
        self.slots.get(node.0 as usize)
    }

    fn slot_mut(&mut self, node: ElementRef) -> Option<&mut Slot> {
        self.slots.get_mut(node.0 as usize)
    }

    fn alloc(&mut self, content: Content) -> ElementRef {
        let node = ElementRef(self.slots.len() as u64);
        self.slots.push(Slot {
            content,
            parent: None,
            children: Vec::new(),
        });
        node
    }

    /// Unlink without recording
    fn detach(&mut self, node: ElementRef) -> Option<ElementRef> {
        let parent = self.slot(node)?.parent?;
        if let Some(p) = self.slot_mut(parent) {
            p.children.retain(|c| *c != node);
        }
        if let Some(s) = self.slot_mut(node) {
            s.parent = None;
        }
        if let Some(caret) = self.caret {
            if self.contains(node, caret.node) {
                self.caret = None;
            }
        }
        Some(parent)
    }

    /// Build a detached subtree; nothing is attached so nothing is recorded
    fn build_detached(&mut self, node: MarkupNode) -> ElementRef {
        match node {
            MarkupNode::Text(text) => self.alloc(Content::Text(text)),
            MarkupNode::Element {
                tag,
                attrs,
                children,
            } => {
                let element = self.alloc(Content::Element {
                    tag,
                    attrs: attrs.into_iter().collect(),
                });
                for child in children {
                    let child = self.build_detached(child);
                    if let Some(s) = self.slot_mut(child) {
                        s.parent = Some(element);
                    }
                    if let Some(s) = self.slot_mut(element) {
                        s.children.push(child);
                    }
                }
                element
            }
        }
    }

    fn serialize_into(&self, node: ElementRef, out: &mut String) {
        let Some(slot) = self.slot(node) else {
            return;
        };
        match &slot.content {
            Content::Text(text) => out.push_str(&escape_text(text)),
            Content::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                if let Some(id) = attrs.get(NODE_ID_ATTR) {
                    out.push_str(&format!(" {}=\"{}\"", NODE_ID_ATTR, escape_attr(id)));
                }
                for (name, value) in attrs.iter().filter(|(n, _)| n.as_str() != NODE_ID_ATTR) {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
                }
                out.push('>');
                if is_void_element(tag) {
                    return;
                }
                for child in &slot.children {
                    self.serialize_into(*child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }
}

impl SelectionController for MemorySurface {
    fn caret(&self) -> Option<Caret> {
        self.caret
    }

    fn set_caret(&mut self, node: ElementRef, offset: usize) {
        self.caret = Some(Caret { node, offset });
    }
}

impl EditingSurface for MemorySurface {
    fn root(&self) -> ElementRef {
        self.root
    }

    fn tag(&self, node: ElementRef) -> Option<String> {
        match &self.slot(node)?.content {
            Content::Element { tag, .. } => Some(tag.clone()),
            Content::Text(_) => None,
        }
    }

    fn attr(&self, node: ElementRef, name: &str) -> Option<String> {
        match &self.slot(node)?.content {
            Content::Element { attrs, .. } => attrs.get(name).cloned(),
            Content::Text(_) => None,
        }
    }

    fn attr_names(&self, node: ElementRef) -> Vec<String> {
        match self.slot(node).map(|s| &s.content) {
            Some(Content::Element { attrs, .. }) => attrs.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn set_attr(&mut self, node: ElementRef, name: &str, value: &str) {
        if let Some(Slot {
            content: Content::Element { attrs, .. },
            ..
        }) = self.slot_mut(node)
        {
            attrs.insert(name.to_string(), value.to_string());
            self.records.push(ChangeRecord::Attributes {
                target: node,
                name: name.to_string(),
            });
        }
    }

    fn remove_attr(&mut self, node: ElementRef, name: &str) {
        if let Some(Slot {
            content: Content::Element { attrs, .. },
            ..
        }) = self.slot_mut(node)
        {
            if attrs.remove(name).is_some() {
                self.records.push(ChangeRecord::Attributes {
                    target: node,
                    name: name.to_string(),
                });
            }
        }
    }

    fn parent(&self, node: ElementRef) -> Option<ElementRef> {
        self.slot(node)?.parent
    }

    fn children(&self, node: ElementRef) -> Vec<ElementRef> {
        self.slot(node).map(|s| s.children.clone()).unwrap_or_default()
    }

    fn is_attached(&self, node: ElementRef) -> bool {
        self.contains(self.root, node)
    }

    fn create_element(&mut self, tag: &str) -> ElementRef {
        self.alloc(Content::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> ElementRef {
        self.alloc(Content::Text(text.to_string()))
    }

    fn create_from_markup(&mut self, html: &str) -> Option<ElementRef> {
        let block = parse_block_markup(html)?;
        Some(self.build_detached(block))
    }

    fn insert_before(&mut self, parent: ElementRef, node: ElementRef, reference: Option<ElementRef>) {
        if self.slot(parent).is_none() || self.slot(node).is_none() || self.contains(node, parent) {
            return;
        }
        if let Some(old_parent) = self.detach(node) {
            self.records.push(ChangeRecord::ChildList {
                target: old_parent,
                added: Vec::new(),
                removed: vec![node],
            });
        }

        let Some(parent_slot) = self.slot_mut(parent) else {
            return;
        };
        let index = reference
            .and_then(|r| parent_slot.children.iter().position(|c| *c == r))
            .unwrap_or(parent_slot.children.len());
        parent_slot.children.insert(index, node);
        if let Some(s) = self.slot_mut(node) {
            s.parent = Some(parent);
        }
        self.records.push(ChangeRecord::ChildList {
            target: parent,
            added: vec![node],
            removed: Vec::new(),
        });
    }

    fn remove(&mut self, node: ElementRef) {
        if let Some(parent) = self.detach(node) {
            self.records.push(ChangeRecord::ChildList {
                target: parent,
                added: Vec::new(),
                removed: vec![node],
            });
        }
    }

    fn text_content(&self, node: ElementRef) -> String {
        match self.slot(node).map(|s| &s.content) {
            Some(Content::Text(text)) => text.clone(),
            Some(Content::Element { .. }) => self
                .descendants(node)
                .into_iter()
                .filter_map(|n| match &self.slot(n)?.content {
                    Content::Text(t) => Some(t.clone()),
                    Content::Element { .. } => None,
                })
                .collect(),
            None => String::new(),
        }
    }

    fn set_text(&mut self, node: ElementRef, text: &str) {
        let is_text_node = match self.slot(node) {
            Some(slot) => matches!(slot.content, Content::Text(_)),
            None => return,
        };
        if is_text_node {
            if let Some(Slot {
                content: Content::Text(data),
                ..
            }) = self.slot_mut(node)
            {
                *data = text.to_string();
            }
            self.records.push(ChangeRecord::CharacterData { target: node });
        } else {
            for child in self.children(node) {
                self.remove(child);
            }
            let text_node = self.create_text(text);
            self.insert_before(node, text_node, None);
        }
    }

    fn serialize(&self, node: ElementRef) -> String {
        let mut out = String::new();
        self.serialize_into(node, &mut out);
        out
    }

    fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
    }

    fn is_editable(&self) -> bool {
        self.editable
    }

    fn take_records(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.records)
    }
}
