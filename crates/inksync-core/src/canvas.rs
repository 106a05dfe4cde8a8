//! Canvas document and the local edit path.
//!
//! [`Canvas`] is the single entry point for document mutation. Local edits go
//! through its methods, remote operations go through [`crate::applier`], and
//! both bump versions and schedule renders the same way.

use crate::element::{Element, ElementId, ElementPatch};
use crate::ops::OperationKind;
use crate::version::next_version;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A canvas document: elements keyed by id plus their stacking order.
///
/// Serialized as an ordered element list and rebuilt through
/// [`Document::from_elements`], so ids stay unique after a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DocumentRepr", into = "DocumentRepr")]
pub struct Document {
    /// Unique document identifier.
    pub id: String,
    /// Document name.
    pub name: String,
    /// All elements, keyed by ID.
    elements: HashMap<ElementId, Element>,
    /// Z-order of elements (back to front).
    z_order: Vec<ElementId>,
}

/// Wire form of a [`Document`]: elements back to front.
#[derive(Serialize, Deserialize)]
struct DocumentRepr {
    id: String,
    name: String,
    elements: Vec<Element>,
}

impl From<DocumentRepr> for Document {
    fn from(repr: DocumentRepr) -> Self {
        Document::from_elements(repr.id, repr.name, repr.elements)
    }
}

impl From<Document> for DocumentRepr {
    fn from(doc: Document) -> Self {
        Self {
            elements: doc.to_elements(),
            id: doc.id,
            name: doc.name,
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "Untitled".to_string(),
            elements: HashMap::new(),
            z_order: Vec::new(),
        }
    }

    /// Build a document from elements listed back to front.
    ///
    /// Duplicate ids keep the copy with the highest version, at the position
    /// of its first occurrence.
    pub fn from_elements(id: impl Into<String>, name: impl Into<String>, elements: Vec<Element>) -> Self {
        let mut doc = Self {
            id: id.into(),
            name: name.into(),
            elements: HashMap::with_capacity(elements.len()),
            z_order: Vec::with_capacity(elements.len()),
        };
        for element in elements {
            match doc.elements.get_mut(&element.id) {
                Some(existing) => {
                    if element.version > existing.version {
                        *existing = element;
                    }
                }
                None => {
                    doc.z_order.push(element.id);
                    doc.elements.insert(element.id, element);
                }
            }
        }
        doc
    }

    /// Elements back to front, cloned for serialization.
    pub fn to_elements(&self) -> Vec<Element> {
        self.elements_ordered().cloned().collect()
    }

    /// Add an element on top. Returns false if the id is already present.
    pub fn add_element(&mut self, element: Element) -> bool {
        if self.elements.contains_key(&element.id) {
            return false;
        }
        self.z_order.push(element.id);
        self.elements.insert(element.id, element);
        true
    }

    /// Remove an element. Children of a removed frame are detached from it.
    pub fn remove_element(&mut self, id: ElementId) -> Option<Element> {
        let removed = self.elements.remove(&id)?;
        self.z_order.retain(|&element_id| element_id != id);
        if removed.is_frame() {
            for child in self.elements.values_mut() {
                if child.parent_id == Some(id) {
                    child.parent_id = None;
                }
            }
        }
        Some(removed)
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(&id)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    /// Elements in z-order (back to front).
    pub fn elements_ordered(&self) -> impl Iterator<Item = &Element> {
        self.z_order.iter().filter_map(|id| self.elements.get(id))
    }

    /// Element ids in z-order.
    pub fn z_order(&self) -> &[ElementId] {
        &self.z_order
    }

    /// Move the named ids to the back of the stack (start of `z_order`), in
    /// the given order.
    ///
    /// Unknown ids and repeats are skipped. Elements not named keep their
    /// relative order above the named ones. Returns true if the order changed.
    pub fn reorder_subset(&mut self, ids: &[ElementId]) -> bool {
        let mut named = Vec::with_capacity(ids.len());
        let mut seen = HashSet::with_capacity(ids.len());
        for &id in ids {
            if self.elements.contains_key(&id) && seen.insert(id) {
                named.push(id);
            }
        }
        let rest = self.z_order.iter().copied().filter(|id| !seen.contains(id));
        let new_order: Vec<ElementId> = named.iter().copied().chain(rest).collect();
        if new_order == self.z_order {
            return false;
        }
        self.z_order = new_order;
        true
    }

    /// The frame an element belongs to, for rendering.
    ///
    /// A `parent_id` that does not resolve to a frame in this document reads
    /// as None. The stored link is left alone: the frame may still be on its
    /// way from a peer, and clearing it without a version bump would leave
    /// replicas that disagree at the same version.
    pub fn resolved_parent(&self, id: ElementId) -> Option<ElementId> {
        let parent = self.elements.get(&id)?.parent_id?;
        if parent == id {
            return None;
        }
        self.elements
            .get(&parent)
            .filter(|el| el.is_frame())
            .map(|el| el.id)
    }

    /// Number of elements whose `parent_id` does not currently resolve.
    pub fn dangling_parent_count(&self) -> usize {
        self.elements
            .values()
            .filter(|el| el.parent_id.is_some() && self.resolved_parent(el.id).is_none())
            .count()
    }

    /// Number of frame elements.
    pub fn frame_count(&self) -> usize {
        self.elements.values().filter(|el| el.is_frame()).count()
    }

    /// Clear all elements from the document.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.z_order.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Serialize the document to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a document from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Coalesces render requests so the host repaints at most once per frame.
#[derive(Debug, Default)]
pub struct RenderScheduler {
    pending: bool,
}

impl RenderScheduler {
    /// Ask for a repaint on the next frame.
    pub fn request(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Consume the pending request. Returns true if a render is due.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

/// Host-side canvas state that the sync engine is allowed to touch.
#[derive(Debug, Default)]
pub struct Canvas {
    /// The document being edited.
    pub document: Document,
    /// Currently selected element IDs.
    pub selection: HashSet<ElementId>,
    /// Render hook.
    pub render: RenderScheduler,
}

impl Canvas {
    /// Create a canvas with an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a canvas for an existing document.
    pub fn with_document(document: Document) -> Self {
        Self {
            document,
            ..Self::default()
        }
    }

    /// Called by the host once per frame. Returns true if the canvas should
    /// repaint. Parent links are resolved with [`Document::resolved_parent`]
    /// while drawing.
    pub fn begin_frame(&mut self) -> bool {
        if !self.render.is_pending() {
            return false;
        }
        let dangling = self.document.dangling_parent_count();
        if dangling > 0 {
            log::trace!("{} elements wait for their frame", dangling);
        }
        self.render.take()
    }

    // --- Local edit path ---

    /// Add a new element locally. Returns the operation to broadcast, or None
    /// if an element with the same id already exists.
    pub fn add_element(&mut self, mut element: Element) -> Option<OperationKind> {
        if self.document.contains(element.id) {
            return None;
        }
        element.version = next_version(element.version);
        self.document.add_element(element.clone());
        self.render.request();
        Some(OperationKind::Add { element })
    }

    /// Update an element locally.
    pub fn update_element(&mut self, id: ElementId, changes: ElementPatch) -> Option<OperationKind> {
        let element = self.document.get_mut(id)?;
        let version = next_version(element.version);
        element.apply_patch(&changes);
        element.version = version;
        self.render.request();
        Some(OperationKind::Update {
            element_id: id,
            changes,
            version,
        })
    }

    /// Delete an element locally.
    pub fn delete_element(&mut self, id: ElementId) -> Option<OperationKind> {
        self.remove(id)?;
        Some(OperationKind::Delete { element_id: id })
    }

    /// Delete every selected element. Returns one operation per deletion.
    pub fn delete_selected(&mut self) -> Vec<OperationKind> {
        let selected: Vec<ElementId> = self.selection.iter().copied().collect();
        selected
            .into_iter()
            .filter_map(|id| self.delete_element(id))
            .collect()
    }

    /// Reorder locally, moving `ids` to the back of the stack (start of
    /// `z_order`) in that order.
    pub fn reorder(&mut self, ids: Vec<ElementId>) -> Option<OperationKind> {
        if !self.document.reorder_subset(&ids) {
            return None;
        }
        self.render.request();
        Some(OperationKind::Reorder { element_ids: ids })
    }

    // --- Selection ---

    pub fn select(&mut self, id: ElementId) {
        if self.document.contains(id) {
            self.selection.insert(id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn is_selected(&self, id: ElementId) -> bool {
        self.selection.contains(&id)
    }

    /// Replace the whole document, e.g. after a full reload from storage.
    pub fn replace_document(&mut self, document: Document) {
        self.selection.retain(|id| document.contains(*id));
        self.document = document;
        self.render.request();
    }

    /// Remove an element and its selection entry. Shared by the local path
    /// and the applier.
    pub(crate) fn remove(&mut self, id: ElementId) -> Option<Element> {
        let removed = self.document.remove_element(id)?;
        self.selection.remove(&id);
        self.render.request();
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;

    fn rect() -> Element {
        Element::rectangle(Point::new(0.0, 0.0), 10.0, 10.0)
    }

    fn doc_with(n: usize) -> (Document, Vec<ElementId>) {
        let mut doc = Document::new();
        let mut ids = Vec::new();
        for _ in 0..n {
            let el = rect();
            ids.push(el.id);
            doc.add_element(el);
        }
        (doc, ids)
    }

    #[test]
    fn test_document_creation() {
        let doc = Document::new();
        assert!(doc.is_empty());
        assert_eq!(doc.name, "Untitled");
    }

    #[test]
    fn test_add_element_rejects_duplicate_id() {
        let mut doc = Document::new();
        let el = rect();
        assert!(doc.add_element(el.clone()));
        assert!(!doc.add_element(el));
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.z_order().len(), 1);
    }

    #[test]
    fn test_reorder_subset_partial() {
        let (mut doc, ids) = doc_with(5);
        let (a, b, c, d, e) = (ids[0], ids[1], ids[2], ids[3], ids[4]);

        assert!(doc.reorder_subset(&[c, a]));
        assert_eq!(doc.z_order(), &[c, a, b, d, e]);
    }

    #[test]
    fn test_reorder_subset_skips_unknown_and_repeats() {
        let (mut doc, ids) = doc_with(3);
        let ghost = Uuid::new_v4();

        assert!(doc.reorder_subset(&[ids[2], ghost, ids[2]]));
        assert_eq!(doc.z_order(), &[ids[2], ids[0], ids[1]]);
        assert!(!doc.reorder_subset(&[ids[2]]));
    }

    #[test]
    fn test_remove_frame_detaches_children() {
        let mut doc = Document::new();
        let frame = Element::frame("Frame 1", Point::ZERO, 100.0, 100.0);
        let mut child = rect();
        child.parent_id = Some(frame.id);
        let (frame_id, child_id) = (frame.id, child.id);
        doc.add_element(frame);
        doc.add_element(child);

        doc.remove_element(frame_id);
        assert_eq!(doc.get(child_id).unwrap().parent_id, None);
    }

    #[test]
    fn test_resolved_parent() {
        let mut doc = Document::new();
        let not_a_frame = rect();
        let mut orphan = rect();
        orphan.parent_id = Some(Uuid::new_v4());
        let mut bad_parent = rect();
        bad_parent.parent_id = Some(not_a_frame.id);
        let frame = Element::frame("F", Point::ZERO, 1.0, 1.0);
        let mut ok = rect();
        ok.parent_id = Some(frame.id);
        let (orphan_id, bad_id, ok_id, frame_id) = (orphan.id, bad_parent.id, ok.id, frame.id);

        doc.add_element(not_a_frame);
        doc.add_element(orphan);
        doc.add_element(bad_parent);
        doc.add_element(frame);
        doc.add_element(ok);

        assert_eq!(doc.resolved_parent(ok_id), Some(frame_id));
        assert_eq!(doc.resolved_parent(orphan_id), None);
        assert_eq!(doc.resolved_parent(bad_id), None);
        assert_eq!(doc.dangling_parent_count(), 2);
        // Stored links are untouched
        assert!(doc.get(orphan_id).unwrap().parent_id.is_some());
        assert_eq!(doc.frame_count(), 1);
    }

    #[test]
    fn test_child_before_frame_keeps_link_across_frames() {
        let frame = Element::frame("F", Point::ZERO, 100.0, 100.0);
        let mut child = rect();
        child.parent_id = Some(frame.id);
        child.version = 3;

        let mut in_order = Canvas::new();
        in_order.document.add_element(frame.clone());
        in_order.document.add_element(child.clone());

        let mut reordered = Canvas::new();
        reordered.document.add_element(child.clone());
        reordered.render.request();
        assert!(reordered.begin_frame());
        assert_eq!(reordered.document.resolved_parent(child.id), None);
        reordered.document.add_element(frame.clone());

        assert_eq!(reordered.document.get(child.id), in_order.document.get(child.id));
        assert_eq!(reordered.document.resolved_parent(child.id), Some(frame.id));
    }

    #[test]
    fn test_from_elements_dedups_by_version() {
        let mut old = rect();
        old.version = 1;
        let mut newer = old.clone();
        newer.version = 5;
        newer.width = 99.0;
        let other = rect();

        let doc = Document::from_elements("p", "Project", vec![old.clone(), other.clone(), newer]);
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.z_order(), &[old.id, other.id]);
        assert_eq!(doc.get(old.id).unwrap().width, 99.0);
    }

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let (doc, ids) = doc_with(3);
        let back = Document::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(back.z_order(), ids.as_slice());
        assert_eq!(back, doc);
    }

    #[test]
    fn test_from_json_dedups_elements() {
        let mut el = rect();
        el.version = 2;
        let json = serde_json::json!({
            "id": "d1",
            "name": "Dup",
            "elements": [el.clone(), el.clone()],
        });
        let doc = Document::from_json(&json.to_string()).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.z_order(), &[el.id]);
    }

    #[test]
    fn test_local_update_bumps_version() {
        let mut canvas = Canvas::new();
        let el = rect();
        let id = el.id;
        canvas.add_element(el).unwrap();
        let before = canvas.document.get(id).unwrap().version;
        assert!(canvas.render.take());

        let op = canvas
            .update_element(id, ElementPatch::moved_to(Point::new(5.0, 5.0)))
            .unwrap();
        let after = canvas.document.get(id).unwrap();
        assert!(after.version > before);
        assert_eq!(after.position, Point::new(5.0, 5.0));
        match op {
            OperationKind::Update { version, .. } => assert_eq!(version, after.version),
            other => panic!("unexpected op {other:?}"),
        }
        assert!(canvas.render.is_pending());
    }

    #[test]
    fn test_local_delete_clears_selection() {
        let mut canvas = Canvas::new();
        let el = rect();
        let id = el.id;
        canvas.add_element(el);
        canvas.select(id);

        let ops = canvas.delete_selected();
        assert_eq!(ops.len(), 1);
        assert!(!canvas.is_selected(id));
        assert!(canvas.document.is_empty());
    }

    #[test]
    fn test_render_requests_coalesce() {
        let mut canvas = Canvas::new();
        canvas.add_element(rect());
        canvas.add_element(rect());
        assert!(canvas.begin_frame());
        assert!(!canvas.begin_frame());
    }

    #[test]
    fn test_replace_document_prunes_selection() {
        let mut canvas = Canvas::new();
        let el = rect();
        let id = el.id;
        canvas.add_element(el);
        canvas.select(id);

        canvas.replace_document(Document::new());
        assert!(canvas.selection.is_empty());
        assert!(canvas.render.is_pending());
    }
}
