//! Change classification
//!
//! Turns a batch of raw change records into deduplicated dirty intents plus
//! the side effects the coordinator applies afterwards: chunk count deltas,
//! overflow candidates, heading-cache invalidation, structure repair and the
//! renumbering advisory.
//!
//! Classification may write to the surface: blocks that arrive without an
//! identifier (or with a duplicated one) get a fresh identifier and stable
//! id, and browser-generated styled inline wrappers are unwrapped.

use crate::db::OrderedIdentifier;
use crate::models::{ChunkId, DirtyIntent, IntentKind, NodeIdentifier, StableId};
use crate::surface::{
    all_blocks, blocks_in, chunk_container_of, chunk_id_of, enclosing_block, is_chunk_container,
    is_heading_tag, neighbor_identifiers, node_identifier, text_offset_within, ChangeRecord,
    EditingSurface, ElementRef, HYPERCITE_PREFIX, NODE_ID_ATTR, STABLE_ID_ATTR,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Generated elements that never carry content of their own
const DECORATIVE_CLASSES: &[&str] = &["open-icon", "zw-marker"];
/// Editor chrome living inside the editable root
const UI_CHROME_MARKERS: &[&str] = &["status-icon", "sync-indicator"];
/// Wrappers that are replaced by their plain text
const WRAPPER_TAGS: &[&str] = &["span", "font"];
/// Inline formatting tags that are rebuilt without their style attribute
const STYLED_INLINE_TAGS: &[&str] = &["i", "b", "em", "strong"];
const SUSPICIOUS_STYLE_PROPERTIES: &[&str] =
    &["font-size", "font-weight", "letter-spacing", "word-spacing"];
const ZERO_WIDTH_SPACE: &str = "\u{200b}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkDelta {
    pub added: usize,
    pub removed: usize,
}

/// Outcome of classifying one batch
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// One intent per identifier, in first-seen order
    pub intents: Vec<DirtyIntent>,
    pub chunk_deltas: BTreeMap<ChunkId, ChunkDelta>,
    /// Chunks that gained blocks and must be checked against the budget
    pub overflow_candidates: BTreeSet<ChunkId>,
    /// Chunk containers that appeared (lazy load, overflow)
    pub discovered_chunks: Vec<ChunkId>,
    /// Chunk containers that left the document
    pub removed_chunks: Vec<ChunkId>,
    /// `Some(heading)` when heading-keyed caches must be invalidated
    pub toc_invalidation: Option<bool>,
    /// The last addressable node was removed
    pub structure_repair: bool,
    /// An identifier was assigned between neighbors that are already deep
    pub needs_renumbering: bool,
    positions: HashMap<NodeIdentifier, usize>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
            && self.discovered_chunks.is_empty()
            && self.removed_chunks.is_empty()
            && !self.structure_repair
    }

    pub fn intent_for(&self, node_id: &NodeIdentifier) -> Option<&DirtyIntent> {
        self.positions.get(node_id).map(|i| &self.intents[*i])
    }

    fn record(&mut self, node_id: NodeIdentifier, kind: IntentKind, node_ref: ElementRef) {
        match self.positions.get(&node_id) {
            Some(&i) => {
                let existing = &mut self.intents[i];
                let merged = existing.kind.merge(kind);
                if merged == kind {
                    existing.node_ref = node_ref;
                }
                existing.kind = merged;
            }
            None => {
                self.positions.insert(node_id.clone(), self.intents.len());
                self.intents.push(DirtyIntent::new(node_id, kind, node_ref));
            }
        }
    }

    fn touch_toc(&mut self, heading: bool) {
        self.toc_invalidation = Some(self.toc_invalidation.unwrap_or(false) || heading);
    }

    fn delta(&mut self, chunk_id: ChunkId) -> &mut ChunkDelta {
        self.chunk_deltas.entry(chunk_id).or_default()
    }
}

#[derive(Debug, Clone, Copy)]
struct MigrationMark {
    removal: bool,
    addition: bool,
}

pub struct ChangeClassifier {
    book: String,
    ids: OrderedIdentifier,
    migrating: HashMap<NodeIdentifier, MigrationMark>,
}

impl ChangeClassifier {
    pub fn new(book: impl Into<String>, ids: OrderedIdentifier) -> Self {
        Self {
            book: book.into(),
            ids,
            migrating: HashMap::new(),
        }
    }

    /// Tag a node as being relocated by overflow resolution. Its next
    /// removal and next addition are consumed without producing intents.
    pub fn mark_migrating(&mut self, node_id: NodeIdentifier) {
        self.migrating.insert(
            node_id,
            MigrationMark {
                removal: true,
                addition: true,
            },
        );
    }

    pub fn is_migrating(&self, node_id: &NodeIdentifier) -> bool {
        self.migrating.contains_key(node_id)
    }

    pub fn clear_migrations(&mut self) {
        self.migrating.clear();
    }

    fn consume(&mut self, node_id: &NodeIdentifier, removal: bool) -> bool {
        let Some(mark) = self.migrating.get_mut(node_id) else {
            return false;
        };
        let slot = if removal {
            &mut mark.removal
        } else {
            &mut mark.addition
        };
        if !*slot {
            return false;
        }
        *slot = false;
        if !mark.removal && !mark.addition {
            self.migrating.remove(node_id);
        }
        true
    }

    /// Classify a filtered batch, in the order the records were reported
    pub fn classify<S: EditingSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        records: &[ChangeRecord],
    ) -> Classification {
        let mut out = Classification::default();

        for record in records {
            match record {
                ChangeRecord::ChildList {
                    target,
                    added,
                    removed,
                } => {
                    for node in removed {
                        self.classify_removed(surface, *target, *node, &mut out);
                    }
                    for node in added {
                        self.classify_added(surface, *target, *node, &mut out);
                    }
                }
                ChangeRecord::CharacterData { target } => {
                    mark_update(surface, *target, &mut out);
                }
                ChangeRecord::Attributes { target, name } => {
                    if name == "style" && is_suspicious_inline(surface, *target) {
                        if let Some(block) = unwrap_styled_inline(surface, *target) {
                            mark_update(surface, block, &mut out);
                        }
                    }
                }
            }
        }

        let deleted_any = out.intents.iter().any(|i| i.kind == IntentKind::Delete);
        if deleted_any && all_blocks(surface).is_empty() {
            // The store may still hold unloaded nodes; repair decides
            tracing::warn!(
                "No addressable node of '{}' left on the surface; converting to structure repair",
                self.book
            );
            out.structure_repair = true;
        }

        out
    }

    fn classify_removed<S: EditingSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        target: ElementRef,
        node: ElementRef,
        out: &mut Classification,
    ) {
        if surface.is_text(node) || is_hypercite(surface, node) {
            mark_update(surface, target, out);
            return;
        }

        if is_chunk_container(surface, node) {
            if surface.is_attached(node) {
                return;
            }
            let Some(chunk_id) = chunk_id_of(surface, node) else {
                return;
            };
            let blocks = blocks_in(surface, node);
            tracing::debug!(
                "Chunk {} removed with {} node(s); queueing deletions",
                chunk_id,
                blocks.len()
            );
            for (block, id) in blocks {
                if !self.consume(&id, true) {
                    out.record(id, IntentKind::Delete, block);
                }
            }
            out.removed_chunks.push(chunk_id);
            return;
        }

        match node_identifier(surface, node) {
            Some(id) => {
                if self.consume(&id, true) {
                    tracing::trace!("Skipping removal of migrating node {}", id);
                    return;
                }
                if surface.is_attached(node) {
                    // Moved within the batch; the addition side handles it
                    return;
                }
                out.record(id, IntentKind::Delete, node);
                if let Some(chunk_id) =
                    chunk_container_of(surface, target).and_then(|c| chunk_id_of(surface, c))
                {
                    out.delta(chunk_id).removed += 1;
                }
                mark_update(surface, target, out);
            }
            None => mark_update(surface, target, out),
        }
    }

    fn classify_added<S: EditingSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        target: ElementRef,
        node: ElementRef,
        out: &mut Classification,
    ) {
        if !surface.is_attached(node) {
            return;
        }
        if surface.is_text(node) {
            mark_update(surface, node, out);
            return;
        }
        if is_decorative(surface, node) {
            return;
        }
        if is_hypercite(surface, node) {
            mark_update(surface, target, out);
            return;
        }

        if is_chunk_container(surface, node) {
            if let Some(chunk_id) = chunk_id_of(surface, node) {
                for (_, id) in blocks_in(surface, node) {
                    self.consume(&id, false);
                }
                out.discovered_chunks.push(chunk_id);
            }
            return;
        }

        if is_suspicious_inline(surface, node) {
            if let Some(block) = unwrap_styled_inline(surface, node) {
                mark_update(surface, block, out);
            }
            return;
        }

        if is_chunk_container(surface, target) {
            self.classify_added_block(surface, target, node, out);
        } else {
            mark_update(surface, node, out);
        }
    }

    fn classify_added_block<S: EditingSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        container: ElementRef,
        node: ElementRef,
        out: &mut Classification,
    ) {
        let existing = node_identifier(surface, node);
        if let Some(id) = &existing {
            if self.consume(id, false) {
                tracing::trace!("Skipping addition of migrating node {}", id);
                return;
            }
        }

        let duplicate = existing
            .as_ref()
            .map(|id| {
                all_blocks(surface)
                    .iter()
                    .any(|(other, other_id)| *other != node && other_id == id)
            })
            .unwrap_or(false);

        let id = match existing {
            Some(id) if !duplicate => {
                if surface.attr(node, STABLE_ID_ATTR).is_none() {
                    let stable = StableId::generate(&self.book);
                    surface.set_attr(node, STABLE_ID_ATTR, stable.as_str());
                }
                id
            }
            _ => {
                if duplicate {
                    tracing::warn!(
                        "Duplicate identifier {:?} on added node; regenerating",
                        surface.attr(node, NODE_ID_ATTR)
                    );
                }
                match self.assign_identifier(surface, node, out) {
                    Some(id) => id,
                    None => return,
                }
            }
        };

        if let Some(chunk_id) = chunk_id_of(surface, container) {
            out.delta(chunk_id.clone()).added += 1;
            out.overflow_candidates.insert(chunk_id);
        }
        let heading = surface.tag(node).map(|t| is_heading_tag(&t)).unwrap_or(false);
        out.record(id, IntentKind::Add, node);
        out.touch_toc(heading);
    }

    /// Give `node` an identifier between its document-order neighbors and a
    /// fresh stable id
    fn assign_identifier<S: EditingSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        node: ElementRef,
        out: &mut Classification,
    ) -> Option<NodeIdentifier> {
        let (before, after) = neighbor_identifiers(surface, node)?;

        let live: HashSet<NodeIdentifier> = all_blocks(surface)
            .into_iter()
            .filter(|(el, _)| *el != node)
            .map(|(_, id)| id)
            .collect();

        match self.ids.generate_between(before.as_ref(), after.as_ref(), &live) {
            Ok(generated) => {
                if generated.needs_renumbering {
                    out.needs_renumbering = true;
                }
                let stable = StableId::generate(&self.book);
                surface.set_attr(node, NODE_ID_ATTR, &generated.id.to_string());
                surface.set_attr(node, STABLE_ID_ATTR, stable.as_str());
                tracing::debug!(
                    "Assigned identifier {} (between {:?} and {:?})",
                    generated.id,
                    before.as_ref().map(|b| b.to_string()),
                    after.as_ref().map(|a| a.to_string())
                );
                Some(generated.id)
            }
            Err(e) => {
                tracing::error!("Could not assign an identifier to an added node: {}", e);
                out.needs_renumbering = true;
                None
            }
        }
    }
}

/// Drop records that never affect durable state: highlight churn, editor
/// chrome and decorative elements.
pub fn filter_records<S: EditingSurface + ?Sized>(
    surface: &S,
    records: Vec<ChangeRecord>,
) -> Vec<ChangeRecord> {
    records
        .into_iter()
        .filter(|record| {
            if record_is_chrome(surface, record) {
                return false;
            }
            if let ChangeRecord::ChildList { added, removed, .. } = record {
                let nodes: Vec<ElementRef> = added.iter().chain(removed).copied().collect();
                if nodes.is_empty() {
                    return false;
                }
                let highlight_churn = nodes.iter().any(|n| is_mark(surface, *n))
                    && nodes
                        .iter()
                        .all(|n| is_mark(surface, *n) || surface.is_text(*n));
                if highlight_churn {
                    return false;
                }
                if nodes.iter().all(|n| is_decorative(surface, *n)) {
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Whether every record in the batch only touches editor chrome
pub fn is_chrome_only<S: EditingSurface + ?Sized>(surface: &S, records: &[ChangeRecord]) -> bool {
    !records.is_empty() && records.iter().all(|r| record_is_chrome(surface, r))
}

fn record_is_chrome<S: EditingSurface + ?Sized>(surface: &S, record: &ChangeRecord) -> bool {
    if is_ui_chrome(surface, record.target()) {
        return true;
    }
    match record {
        ChangeRecord::ChildList { added, removed, .. } => {
            let mut nodes = added.iter().chain(removed).peekable();
            nodes.peek().is_some() && nodes.all(|n| is_ui_chrome(surface, *n))
        }
        _ => false,
    }
}

fn is_ui_chrome<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        if n == surface.root() {
            return false;
        }
        let id = surface.attr(n, NODE_ID_ATTR).unwrap_or_default();
        if UI_CHROME_MARKERS.contains(&id.as_str()) || has_class(surface, n, UI_CHROME_MARKERS) {
            return true;
        }
        current = surface.parent(n);
    }
    false
}

fn has_class<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef, classes: &[&str]) -> bool {
    surface
        .attr(node, "class")
        .map(|c| c.split_whitespace().any(|token| classes.contains(&token)))
        .unwrap_or(false)
}

fn is_mark<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef) -> bool {
    surface.tag(node).as_deref() == Some("mark")
}

fn is_hypercite<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef) -> bool {
    surface
        .attr(node, NODE_ID_ATTR)
        .map(|id| id.starts_with(HYPERCITE_PREFIX))
        .unwrap_or(false)
}

fn is_decorative<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef) -> bool {
    if surface.is_text(node) {
        return false;
    }
    has_class(surface, node, DECORATIVE_CLASSES)
        || (surface.tag(node).as_deref() == Some("span")
            && surface.text_content(node) == ZERO_WIDTH_SPACE)
}

/// Browser-injected inline styling on a wrapper or formatting element
fn is_suspicious_inline<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef) -> bool {
    let Some(tag) = surface.tag(node) else {
        return false;
    };
    let Some(style) = surface.attr(node, "style") else {
        return false;
    };
    let inside_block = surface
        .parent(node)
        .and_then(|p| enclosing_block(surface, p))
        .is_some();
    if !inside_block {
        return false;
    }
    if WRAPPER_TAGS.contains(&tag.as_str()) {
        return true;
    }
    STYLED_INLINE_TAGS.contains(&tag.as_str())
        && SUSPICIOUS_STYLE_PROPERTIES
            .iter()
            .any(|prop| style.contains(prop))
}

/// Replace a styled inline element with a plain equivalent, keeping the
/// caret at the same text offset. Returns the enclosing block.
fn unwrap_styled_inline<S: EditingSurface + ?Sized>(
    surface: &mut S,
    node: ElementRef,
) -> Option<ElementRef> {
    let parent = surface.parent(node)?;
    let (block, _) = enclosing_block(surface, parent)?;
    let tag = surface.tag(node)?;
    let text = surface.text_content(node);
    let caret_offset = surface
        .caret()
        .filter(|c| surface.contains(node, c.node))
        .map(|c| text_offset_within(surface, node, c));

    let (replacement, text_node) = if WRAPPER_TAGS.contains(&tag.as_str()) {
        let t = surface.create_text(&text);
        (t, t)
    } else {
        let clean = surface.create_element(&tag);
        for name in surface.attr_names(node) {
            if name == "style" {
                continue;
            }
            if let Some(value) = surface.attr(node, &name) {
                surface.set_attr(clean, &name, &value);
            }
        }
        let t = surface.create_text(&text);
        surface.insert_before(clean, t, None);
        (clean, t)
    };

    surface.insert_before(parent, replacement, Some(node));
    surface.remove(node);
    if let Some(offset) = caret_offset {
        surface.set_caret(text_node, offset.min(text.chars().count()));
    }
    tracing::debug!("Replaced styled <{}> with a plain equivalent", tag);
    Some(block)
}

fn mark_update<S: EditingSurface + ?Sized>(surface: &S, node: ElementRef, out: &mut Classification) {
    if !surface.is_attached(node) {
        return;
    }
    if let Some((block, id)) = enclosing_block(surface, node) {
        let heading = surface.tag(block).map(|t| is_heading_tag(&t)).unwrap_or(false);
        out.record(id, IntentKind::Update, block);
        out.touch_toc(heading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{find_chunk, MemorySurface, SelectionController};

    fn surface() -> MemorySurface {
        MemorySurface::with_chunks(
            "book",
            &[
                (0, vec![("1", "one"), ("2", "two")]),
                (1, vec![("100", "hundred")]),
            ],
        )
    }

    fn classifier() -> ChangeClassifier {
        ChangeClassifier::new("book", OrderedIdentifier::default())
    }

    fn block(surface: &MemorySurface, id: &str) -> ElementRef {
        surface.find_by_id(id).unwrap()
    }

    fn classify(surface: &mut MemorySurface, classifier: &mut ChangeClassifier) -> Classification {
        let records = surface.take_records();
        let records = filter_records(surface, records);
        classifier.classify(surface, &records)
    }

    fn id(s: &str) -> NodeIdentifier {
        NodeIdentifier::parse(s).unwrap()
    }

    #[test]
    fn test_text_change_marks_block_update() {
        let mut s = surface();
        let text = s.first_text(block(&s, "2")).unwrap();
        s.set_text(text, "two!");

        let out = classify(&mut s, &mut classifier());
        assert_eq!(out.intents.len(), 1);
        assert_eq!(out.intents[0].node_id, id("2"));
        assert_eq!(out.intents[0].kind, IntentKind::Update);
        assert_eq!(out.toc_invalidation, Some(false));
    }

    #[test]
    fn test_new_block_gets_identifier_between_neighbors() {
        let mut s = surface();
        let container = find_chunk(&s, &ChunkId::new(0)).unwrap();
        let p = s.create_element("p");
        let two = block(&s, "2");
        s.insert_before(container, p, Some(two));

        let out = classify(&mut s, &mut classifier());
        assert_eq!(s.attr(p, NODE_ID_ATTR).as_deref(), Some("1.1"));
        assert!(s.attr(p, STABLE_ID_ATTR).unwrap().starts_with("book_"));
        let intent = out.intent_for(&id("1.1")).unwrap();
        assert_eq!(intent.kind, IntentKind::Add);
        assert_eq!(intent.node_ref, p);
        assert_eq!(out.chunk_deltas[&ChunkId::new(0)].added, 1);
        assert!(out.overflow_candidates.contains(&ChunkId::new(0)));
        assert!(!out.needs_renumbering);
    }

    #[test]
    fn test_block_appended_to_last_chunk_uses_gap() {
        let mut s = surface();
        let container = find_chunk(&s, &ChunkId::new(1)).unwrap();
        let p = s.create_element("p");
        s.insert_before(container, p, None);

        classify(&mut s, &mut classifier());
        assert_eq!(s.attr(p, NODE_ID_ATTR).as_deref(), Some("200"));
    }

    #[test]
    fn test_duplicate_identifier_is_regenerated() {
        let mut s = surface();
        let container = find_chunk(&s, &ChunkId::new(0)).unwrap();
        let original = block(&s, "1");
        let stable = s.attr(original, STABLE_ID_ATTR).unwrap();
        // Browsers copy attributes onto the second half of a split block
        let copy = s.create_element("p");
        s.set_attr(copy, NODE_ID_ATTR, "1");
        s.set_attr(copy, STABLE_ID_ATTR, &stable);
        s.insert_before(container, copy, Some(block(&s, "2")));

        let out = classify(&mut s, &mut classifier());
        assert_eq!(s.attr(copy, NODE_ID_ATTR).as_deref(), Some("1.1"));
        assert_ne!(s.attr(copy, STABLE_ID_ATTR).unwrap(), stable);
        assert_eq!(out.intent_for(&id("1.1")).unwrap().kind, IntentKind::Add);
        assert!(out.intent_for(&id("1")).is_none());
    }

    #[test]
    fn test_removal_produces_delete() {
        let mut s = surface();
        let two = block(&s, "2");
        s.remove(two);

        let out = classify(&mut s, &mut classifier());
        let intent = out.intent_for(&id("2")).unwrap();
        assert_eq!(intent.kind, IntentKind::Delete);
        assert_eq!(intent.node_ref, two);
        assert_eq!(out.chunk_deltas[&ChunkId::new(0)].removed, 1);
        assert!(!out.structure_repair);
    }

    #[test]
    fn test_migrating_removal_is_consumed_once() {
        let mut s = surface();
        let mut c = classifier();
        c.mark_migrating(id("2"));

        let destination = find_chunk(&s, &ChunkId::new(1)).unwrap();
        let two = block(&s, "2");
        s.remove(two);
        s.insert_before(destination, two, None);
        let out = classify(&mut s, &mut c);
        assert!(out.intents.is_empty());
        assert!(!c.is_migrating(&id("2")));

        // A genuine deletion afterwards is not swallowed
        s.remove(two);
        let out = classify(&mut s, &mut c);
        assert_eq!(out.intent_for(&id("2")).unwrap().kind, IntentKind::Delete);
    }

    #[test]
    fn test_whole_chunk_removal_deletes_members() {
        let mut s = surface();
        let chunk = find_chunk(&s, &ChunkId::new(0)).unwrap();
        s.remove(chunk);

        let out = classify(&mut s, &mut classifier());
        assert_eq!(out.removed_chunks, vec![ChunkId::new(0)]);
        let deleted: Vec<String> = out
            .intents
            .iter()
            .filter(|i| i.kind == IntentKind::Delete)
            .map(|i| i.node_id.to_string())
            .collect();
        assert_eq!(deleted, vec!["1", "2"]);
    }

    #[test]
    fn test_child_removal_marks_parent_update() {
        let mut s = surface();
        let one = block(&s, "1");
        let br = s.create_element("br");
        s.insert_before(one, br, None);
        s.clear_records();
        s.remove(br);

        let out = classify(&mut s, &mut classifier());
        assert_eq!(out.intent_for(&id("1")).unwrap().kind, IntentKind::Update);
    }

    #[test]
    fn test_styled_span_is_unwrapped_keeping_caret() {
        let mut s = surface();
        let one = block(&s, "1");
        let span = s.create_element("span");
        s.set_attr(span, "style", "font-size: 18px;");
        let inner = s.create_text("hello");
        s.insert_before(span, inner, None);
        s.insert_before(one, span, None);
        s.set_caret(inner, 3);

        let out = classify(&mut s, &mut classifier());
        assert!(!s.is_attached(span));
        assert_eq!(s.text_content(one), "onehello");
        assert_eq!(out.intent_for(&id("1")).unwrap().kind, IntentKind::Update);

        let caret = s.caret().unwrap();
        assert!(s.is_text(caret.node));
        assert_eq!(s.text_content(caret.node), "hello");
        assert_eq!(caret.offset, 3);
    }

    #[test]
    fn test_suspicious_bold_replaced_with_clean_element() {
        let mut s = surface();
        let one = block(&s, "1");
        let b = s.create_element("b");
        s.set_attr(b, "style", "font-weight: 700;");
        s.set_attr(b, "class", "keep");
        let inner = s.create_text("bold");
        s.insert_before(b, inner, None);
        s.insert_before(one, b, None);

        classify(&mut s, &mut classifier());
        assert!(!s.is_attached(b));
        let children = s.children(one);
        let clean = children[1];
        assert_eq!(s.tag(clean).as_deref(), Some("b"));
        assert_eq!(s.attr(clean, "style"), None);
        assert_eq!(s.attr(clean, "class").as_deref(), Some("keep"));
        assert_eq!(s.text_content(clean), "bold");
    }

    #[test]
    fn test_plain_bold_is_left_alone() {
        let mut s = surface();
        let one = block(&s, "1");
        let b = s.create_element("b");
        s.insert_before(one, b, None);

        let out = classify(&mut s, &mut classifier());
        assert!(s.is_attached(b));
        assert_eq!(out.intent_for(&id("1")).unwrap().kind, IntentKind::Update);
    }

    #[test]
    fn test_decorative_and_hypercite_elements() {
        let mut s = surface();
        let one = block(&s, "1");
        let icon = s.create_element("sup");
        s.set_attr(icon, "class", "open-icon");
        s.insert_before(one, icon, None);
        let out = classify(&mut s, &mut classifier());
        assert!(out.intents.is_empty());

        let cite = s.create_element("a");
        s.set_attr(cite, NODE_ID_ATTR, "hypercite_abc");
        s.insert_before(one, cite, None);
        let out = classify(&mut s, &mut classifier());
        assert_eq!(out.intents.len(), 1);
        assert_eq!(out.intents[0].node_id, id("1"));
        assert_eq!(s.attr(cite, NODE_ID_ATTR).as_deref(), Some("hypercite_abc"));
    }

    #[test]
    fn test_removing_last_node_requests_structure_repair() {
        let mut s = MemorySurface::with_chunks("book", &[(0, vec![("1", "only")])]);
        let only = block(&s, "1");
        s.remove(only);

        let out = classify(&mut s, &mut classifier());
        assert!(out.structure_repair);
        assert_eq!(out.intent_for(&id("1")).unwrap().kind, IntentKind::Delete);
    }

    #[test]
    fn test_heading_update_flags_toc() {
        let mut s = surface();
        let container = find_chunk(&s, &ChunkId::new(1)).unwrap();
        let h = s.create_element("h2");
        s.insert_before(container, h, None);

        let out = classify(&mut s, &mut classifier());
        assert_eq!(out.toc_invalidation, Some(true));
    }

    #[test]
    fn test_filter_drops_highlight_churn_and_chrome() {
        let mut s = surface();
        let one = block(&s, "1");
        let mark = s.create_element("mark");
        s.insert_before(one, mark, None);
        let status = s.create_element("span");
        s.set_attr(status, "class", "status-icon");
        let root = s.root();
        s.insert_before(root, status, None);

        let records = s.take_records();
        assert_eq!(records.len(), 3);
        assert!(!is_chrome_only(&s, &records));
        assert!(filter_records(&s, records).is_empty());
    }

    #[test]
    fn test_chrome_only_batch() {
        let mut s = surface();
        let status = s.create_element("span");
        s.set_attr(status, "class", "status-icon");
        let root = s.root();
        s.insert_before(root, status, None);
        s.clear_records();
        s.set_attr(status, "class", "status-icon saving");

        let records = s.take_records();
        assert!(is_chrome_only(&s, &records));
    }
}
