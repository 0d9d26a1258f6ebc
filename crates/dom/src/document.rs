use crate::error::DomError;
use crate::node::{NodeKind, NodeRecord, NodeRef, ReadyState, SheetRef, StyleSheet, Viewport};
use crate::observer::{MutationRecord, ObserverId, ObserverRegistry};
use core_types::FrameKey;
use url::Url;

const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1024,
    height: 768,
    scroll_left: 0.0,
    scroll_top: 0.0,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    DomContentLoaded,
    Load,
}

/// Host notifications that are not tree mutations.
///
/// A browser delivers these as events or patched API calls (`load` listeners,
/// `attachShadow`, `adoptedStyleSheets` setters). They are queued in call order and
/// drained all at once by the embedder.
#[derive(Debug, Default)]
pub struct Notifications {
    pub lifecycle: Vec<(NodeRef, Lifecycle)>,
    /// Iframe elements whose content document finished loading.
    pub frame_loads: Vec<NodeRef>,
    /// `(host, shadow_root)` pairs.
    pub shadow_attached: Vec<(NodeRef, NodeRef)>,
    /// Link elements whose stylesheet finished loading.
    pub sheet_loads: Vec<NodeRef>,
    /// Documents or shadow roots whose adopted stylesheet list changed.
    pub adoptions: Vec<NodeRef>,
}

impl Notifications {
    pub fn is_empty(&self) -> bool {
        self.lifecycle.is_empty()
            && self.frame_loads.is_empty()
            && self.shadow_attached.is_empty()
            && self.sheet_loads.is_empty()
            && self.adoptions.is_empty()
    }
}

/// Arena-backed live document model.
///
/// All documents (top-level, iframe content documents) and shadow roots of one host
/// live in the same arena, so a `NodeRef` is unique across frames.
pub struct Dom {
    nodes: Vec<NodeRecord>,
    sheets: Vec<StyleSheet>,
    observers: ObserverRegistry,
    notes: Notifications,
}

impl Dom {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            sheets: Vec::new(),
            observers: ObserverRegistry::default(),
            notes: Notifications::default(),
        }
    }

    fn push(&mut self, kind: NodeKind) -> NodeRef {
        let node = NodeRef(self.nodes.len() as u32);
        self.nodes.push(NodeRecord::new(kind));
        node
    }

    fn record(&self, node: NodeRef) -> Result<&NodeRecord, DomError> {
        self.nodes
            .get(node.0 as usize)
            .ok_or(DomError::UnknownNode(node))
    }

    fn record_mut(&mut self, node: NodeRef) -> Result<&mut NodeRecord, DomError> {
        self.nodes
            .get_mut(node.0 as usize)
            .ok_or(DomError::UnknownNode(node))
    }

    // Construction.

    pub fn create_document(&mut self, url: Url) -> NodeRef {
        self.create_document_with_state(url, ReadyState::Complete)
    }

    pub fn create_document_with_state(&mut self, url: Url, ready_state: ReadyState) -> NodeRef {
        self.push(NodeKind::Document {
            url,
            ready_state,
            viewport: DEFAULT_VIEWPORT,
            adopted_sheets: Vec::new(),
        })
    }

    pub fn create_doctype(&mut self, name: &str) -> NodeRef {
        self.push(NodeKind::DocumentType {
            name: name.to_string(),
            public_id: String::new(),
            system_id: String::new(),
        })
    }

    pub fn create_element(&mut self, name: &str) -> NodeRef {
        self.push(element_kind(name.to_ascii_lowercase(), false))
    }

    pub fn create_svg_element(&mut self, name: &str) -> NodeRef {
        self.push(element_kind(name.to_string(), true))
    }

    pub fn create_text(&mut self, text: &str) -> NodeRef {
        self.push(NodeKind::Text {
            text: text.to_string(),
        })
    }

    pub fn create_comment(&mut self, text: &str) -> NodeRef {
        self.push(NodeKind::Comment {
            text: text.to_string(),
        })
    }

    pub fn create_style_sheet(&mut self, rules: Vec<String>) -> SheetRef {
        let sheet = SheetRef(self.sheets.len() as u32);
        self.sheets.push(StyleSheet { rules });
        sheet
    }

    // Tree mutation.

    pub fn append_child(&mut self, parent: NodeRef, child: NodeRef) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `before` (or at the end). A child that already has a
    /// parent is detached first, which queues its own removal record.
    pub fn insert_before(
        &mut self,
        parent: NodeRef,
        child: NodeRef,
        before: Option<NodeRef>,
    ) -> Result<(), DomError> {
        if !self.record(parent)?.kind.allows_children() {
            return Err(DomError::InvalidParent(parent));
        }
        match self.record(child)?.kind {
            NodeKind::Document { .. } | NodeKind::ShadowRoot { .. } => {
                return Err(DomError::InvalidParent(child));
            }
            _ => {}
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::CycleDetected { parent, child });
        }
        let mut before = before;
        if before == Some(child) {
            before = self.next_sibling(child);
        }
        if let Some(before) = before {
            if self.record(before)?.parent != Some(parent) {
                return Err(DomError::InvalidSibling { parent, before });
            }
        }

        self.detach(child)?;

        let siblings = &self.record(parent)?.children;
        let index = match before {
            Some(before) => siblings
                .iter()
                .position(|k| *k == before)
                .ok_or(DomError::InvalidSibling { parent, before })?,
            None => siblings.len(),
        };
        let previous_sibling = index.checked_sub(1).map(|i| siblings[i]);
        self.record_mut(parent)?.children.insert(index, child);
        self.record_mut(child)?.parent = Some(parent);
        self.queue_record(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
            previous_sibling,
            next_sibling: before,
        });
        Ok(())
    }

    /// Detach `node` from its parent. Detaching a parentless node is a no-op.
    pub fn remove(&mut self, node: NodeRef) -> Result<(), DomError> {
        self.record(node)?;
        self.detach(node)
    }

    fn detach(&mut self, node: NodeRef) -> Result<(), DomError> {
        let Some(parent) = self.record(node)?.parent else {
            return Ok(());
        };
        let siblings = &self.record(parent)?.children;
        let Some(index) = siblings.iter().position(|k| *k == node) else {
            return Err(DomError::InvalidParent(parent));
        };
        let previous_sibling = index.checked_sub(1).map(|i| siblings[i]);
        let next_sibling = siblings.get(index + 1).copied();
        self.record_mut(parent)?.children.remove(index);
        self.record_mut(node)?.parent = None;
        self.queue_record(MutationRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![node],
            previous_sibling,
            next_sibling,
        });
        Ok(())
    }

    pub fn set_attribute(&mut self, node: NodeRef, name: &str, value: &str) -> Result<(), DomError> {
        let NodeKind::Element { attributes, .. } = &mut self.record_mut(node)?.kind else {
            return Err(DomError::WrongNodeKind(node));
        };
        let old_value = match attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value.to_string())),
            None => {
                attributes.push((name.to_string(), value.to_string()));
                None
            }
        };
        self.queue_record(MutationRecord::Attributes {
            target: node,
            name: name.to_string(),
            old_value,
        });
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeRef, name: &str) -> Result<(), DomError> {
        let NodeKind::Element { attributes, .. } = &mut self.record_mut(node)?.kind else {
            return Err(DomError::WrongNodeKind(node));
        };
        let Some(pos) = attributes.iter().position(|(k, _)| k == name) else {
            return Ok(());
        };
        let (_, old_value) = attributes.remove(pos);
        self.queue_record(MutationRecord::Attributes {
            target: node,
            name: name.to_string(),
            old_value: Some(old_value),
        });
        Ok(())
    }

    pub fn set_text(&mut self, node: NodeRef, value: &str) -> Result<(), DomError> {
        let old_value = match &mut self.record_mut(node)?.kind {
            NodeKind::Text { text } | NodeKind::Comment { text } => {
                std::mem::replace(text, value.to_string())
            }
            _ => return Err(DomError::WrongNodeKind(node)),
        };
        self.queue_record(MutationRecord::CharacterData {
            target: node,
            old_value,
        });
        Ok(())
    }

    pub fn attach_shadow(&mut self, host: NodeRef) -> Result<NodeRef, DomError> {
        match &self.record(host)?.kind {
            NodeKind::Element {
                shadow_root: Some(_),
                ..
            } => return Err(DomError::ShadowRootExists(host)),
            NodeKind::Element { .. } => {}
            _ => return Err(DomError::WrongNodeKind(host)),
        }
        let root = self.push(NodeKind::ShadowRoot {
            host,
            adopted_sheets: Vec::new(),
        });
        if let NodeKind::Element { shadow_root, .. } = &mut self.record_mut(host)?.kind {
            *shadow_root = Some(root);
        }
        self.notes.shadow_attached.push((host, root));
        Ok(root)
    }

    /// Finish loading `document` inside the iframe element `frame`.
    pub fn load_frame(&mut self, frame: NodeRef, document: NodeRef) -> Result<(), DomError> {
        if !matches!(self.record(document)?.kind, NodeKind::Document { .. }) {
            return Err(DomError::WrongNodeKind(document));
        }
        match &mut self.record_mut(frame)?.kind {
            NodeKind::Element {
                name,
                content_document,
                ..
            } if name.as_str() == "iframe" => *content_document = Some(document),
            _ => return Err(DomError::WrongNodeKind(frame)),
        }
        self.notes.frame_loads.push(frame);
        Ok(())
    }

    pub fn set_frame_key(&mut self, element: NodeRef, key: FrameKey) -> Result<(), DomError> {
        match &mut self.record_mut(element)?.kind {
            NodeKind::Element { name, frame, .. } if name.as_str() == "iframe" => {
                *frame = Some(key);
                Ok(())
            }
            _ => Err(DomError::WrongNodeKind(element)),
        }
    }

    pub fn load_stylesheet(&mut self, link: NodeRef, sheet: SheetRef) -> Result<(), DomError> {
        if self.sheets.get(sheet.0 as usize).is_none() {
            return Err(DomError::UnknownSheet(sheet));
        }
        match &mut self.record_mut(link)?.kind {
            NodeKind::Element {
                sheet: link_sheet, ..
            } => *link_sheet = Some(sheet),
            _ => return Err(DomError::WrongNodeKind(link)),
        }
        self.notes.sheet_loads.push(link);
        Ok(())
    }

    pub fn adopt_style_sheets(&mut self, root: NodeRef, sheets: Vec<SheetRef>) -> Result<(), DomError> {
        if let Some(missing) = sheets.iter().find(|s| self.sheets.get(s.0 as usize).is_none()) {
            return Err(DomError::UnknownSheet(*missing));
        }
        match &mut self.record_mut(root)?.kind {
            NodeKind::Document { adopted_sheets, .. }
            | NodeKind::ShadowRoot { adopted_sheets, .. } => *adopted_sheets = sheets,
            _ => return Err(DomError::WrongNodeKind(root)),
        }
        self.notes.adoptions.push(root);
        Ok(())
    }

    /// Advance a document's ready state, queueing the lifecycle events a browser
    /// fires on the way.
    pub fn set_ready_state(&mut self, document: NodeRef, state: ReadyState) -> Result<(), DomError> {
        let NodeKind::Document { ready_state, .. } = &mut self.record_mut(document)?.kind else {
            return Err(DomError::WrongNodeKind(document));
        };
        let previous = std::mem::replace(ready_state, state);
        if previous == ReadyState::Loading && state != ReadyState::Loading {
            self.notes
                .lifecycle
                .push((document, Lifecycle::DomContentLoaded));
        }
        if previous != ReadyState::Complete && state == ReadyState::Complete {
            self.notes.lifecycle.push((document, Lifecycle::Load));
        }
        Ok(())
    }

    pub fn set_viewport(&mut self, document: NodeRef, width: u32, height: u32) -> Result<(), DomError> {
        let NodeKind::Document { viewport, .. } = &mut self.record_mut(document)?.kind else {
            return Err(DomError::WrongNodeKind(document));
        };
        viewport.width = width;
        viewport.height = height;
        Ok(())
    }

    pub fn scroll_to(&mut self, document: NodeRef, left: f64, top: f64) -> Result<(), DomError> {
        let NodeKind::Document { viewport, .. } = &mut self.record_mut(document)?.kind else {
            return Err(DomError::WrongNodeKind(document));
        };
        viewport.scroll_left = left;
        viewport.scroll_top = top;
        Ok(())
    }

    // Observation.

    pub fn observe(&mut self, root: NodeRef) -> Result<ObserverId, DomError> {
        self.record(root)?;
        Ok(self.observers.register(root))
    }

    /// Returns `false` if `id` was not (or no longer) registered.
    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        self.observers.disconnect(id)
    }

    pub fn take_records(&mut self, id: ObserverId) -> Vec<MutationRecord> {
        self.observers.take(id)
    }

    pub fn has_pending_records(&self) -> bool {
        self.observers.has_pending()
    }

    pub fn take_notifications(&mut self) -> Notifications {
        std::mem::take(&mut self.notes)
    }

    fn queue_record(&mut self, record: MutationRecord) {
        if self.observers.is_empty() {
            return;
        }
        let scope = self.inclusive_ancestors(record.target());
        self.observers.queue(&scope, record);
    }

    // Reads.

    pub fn contains(&self, node: NodeRef) -> bool {
        (node.0 as usize) < self.nodes.len()
    }

    pub fn kind(&self, node: NodeRef) -> Option<&NodeKind> {
        self.nodes.get(node.0 as usize).map(|rec| &rec.kind)
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.nodes.get(node.0 as usize).and_then(|rec| rec.parent)
    }

    pub fn children(&self, node: NodeRef) -> &[NodeRef] {
        self.nodes
            .get(node.0 as usize)
            .map(|rec| rec.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn next_sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|k| *k == node)?;
        siblings.get(index + 1).copied()
    }

    pub fn attribute(&self, node: NodeRef, name: &str) -> Option<&str> {
        match self.kind(node)? {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn tag_name(&self, node: NodeRef) -> Option<&str> {
        self.kind(node).and_then(NodeKind::tag_name)
    }

    pub fn text(&self, node: NodeRef) -> Option<&str> {
        match self.kind(node)? {
            NodeKind::Text { text } | NodeKind::Comment { text } => Some(text),
            _ => None,
        }
    }

    pub fn shadow_root(&self, node: NodeRef) -> Option<NodeRef> {
        match self.kind(node)? {
            NodeKind::Element { shadow_root, .. } => *shadow_root,
            _ => None,
        }
    }

    /// Host element when `node` is a shadow root.
    pub fn shadow_host(&self, node: NodeRef) -> Option<NodeRef> {
        match self.kind(node)? {
            NodeKind::ShadowRoot { host, .. } => Some(*host),
            _ => None,
        }
    }

    pub fn content_document(&self, frame: NodeRef) -> Option<NodeRef> {
        match self.kind(frame)? {
            NodeKind::Element {
                content_document, ..
            } => *content_document,
            _ => None,
        }
    }

    pub fn frame_key(&self, frame: NodeRef) -> Option<FrameKey> {
        match self.kind(frame)? {
            NodeKind::Element { frame, .. } => *frame,
            _ => None,
        }
    }

    /// Iframe element embedding the frame identified by `key`.
    pub fn frame_element(&self, key: FrameKey) -> Option<NodeRef> {
        self.nodes
            .iter()
            .position(|rec| matches!(rec.kind, NodeKind::Element { frame: Some(k), .. } if k == key))
            .map(|index| NodeRef(index as u32))
    }

    pub fn link_sheet(&self, link: NodeRef) -> Option<SheetRef> {
        match self.kind(link)? {
            NodeKind::Element { sheet, .. } => *sheet,
            _ => None,
        }
    }

    pub fn style_sheet(&self, sheet: SheetRef) -> Option<&StyleSheet> {
        self.sheets.get(sheet.0 as usize)
    }

    pub fn adopted_style_sheets(&self, root: NodeRef) -> &[SheetRef] {
        match self.kind(root) {
            Some(NodeKind::Document { adopted_sheets, .. })
            | Some(NodeKind::ShadowRoot { adopted_sheets, .. }) => adopted_sheets,
            _ => &[],
        }
    }

    pub fn url(&self, document: NodeRef) -> Option<&Url> {
        match self.kind(document)? {
            NodeKind::Document { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn ready_state(&self, document: NodeRef) -> Option<ReadyState> {
        match self.kind(document)? {
            NodeKind::Document { ready_state, .. } => Some(*ready_state),
            _ => None,
        }
    }

    pub fn viewport(&self, document: NodeRef) -> Option<Viewport> {
        match self.kind(document)? {
            NodeKind::Document { viewport, .. } => Some(*viewport),
            _ => None,
        }
    }

    /// Topmost ancestor within `node`'s tree (a document, a shadow root, or the root
    /// of a detached subtree).
    pub fn tree_root(&self, node: NodeRef) -> NodeRef {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// Whether `node` is reachable from a document, looking through shadow hosts.
    pub fn is_connected(&self, node: NodeRef) -> bool {
        let root = self.tree_root(node);
        match self.kind(root) {
            Some(NodeKind::Document { .. }) => true,
            Some(NodeKind::ShadowRoot { host, .. }) => self.is_connected(*host),
            _ => false,
        }
    }

    pub fn owner_document(&self, node: NodeRef) -> Option<NodeRef> {
        let root = self.tree_root(node);
        match self.kind(root)? {
            NodeKind::Document { .. } => Some(root),
            NodeKind::ShadowRoot { host, .. } => self.owner_document(*host),
            _ => None,
        }
    }

    pub fn is_inclusive_ancestor(&self, ancestor: NodeRef, node: NodeRef) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    fn inclusive_ancestors(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut scope = vec![node];
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            scope.push(parent);
            current = parent;
        }
        scope
    }
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

fn element_kind(name: String, svg: bool) -> NodeKind {
    NodeKind::Element {
        name,
        attributes: Vec::new(),
        svg,
        shadow_root: None,
        content_document: None,
        frame: None,
        sheet: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> (Dom, NodeRef, NodeRef) {
        let mut dom = Dom::new();
        let doc = dom.create_document(Url::parse("https://example.com/").expect("url"));
        let html = dom.create_element("html");
        let body = dom.create_element("body");
        dom.append_child(doc, html).expect("append html");
        dom.append_child(html, body).expect("append body");
        (dom, doc, body)
    }

    #[test]
    fn observer_sees_subtree_records_only() {
        let (mut dom, doc, body) = page();
        let observer = dom.observe(doc).expect("observe");
        let div = dom.create_element("DIV");
        dom.append_child(body, div).expect("append");
        dom.set_attribute(div, "class", "a").expect("attr");

        let detached = dom.create_element("p");
        dom.set_attribute(detached, "id", "x").expect("attr");

        let records = dom.take_records(observer);
        assert_eq!(records.len(), 2);
        assert!(matches!(
            &records[0],
            MutationRecord::ChildList { target, added, .. } if *target == body && added == &vec![div]
        ));
        assert_eq!(dom.tag_name(div), Some("div"));
        assert!(dom.take_records(observer).is_empty());
    }

    #[test]
    fn reparenting_queues_removal_then_addition() {
        let (mut dom, doc, body) = page();
        let a = dom.create_element("div");
        let b = dom.create_element("div");
        let span = dom.create_element("span");
        dom.append_child(body, a).expect("a");
        dom.append_child(body, b).expect("b");
        dom.append_child(a, span).expect("span");
        let observer = dom.observe(doc).expect("observe");

        dom.append_child(b, span).expect("move");
        let records = dom.take_records(observer);
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], MutationRecord::ChildList { target, removed, .. } if *target == a && removed == &vec![span]));
        assert!(matches!(&records[1], MutationRecord::ChildList { target, added, .. } if *target == b && added == &vec![span]));
    }

    #[test]
    fn shadow_root_is_its_own_scope() {
        let (mut dom, doc, body) = page();
        let host = dom.create_element("x-card");
        dom.append_child(body, host).expect("host");
        let root = dom.attach_shadow(host).expect("shadow");
        let doc_observer = dom.observe(doc).expect("observe doc");
        let shadow_observer = dom.observe(root).expect("observe shadow");

        let inner = dom.create_text("hi");
        dom.append_child(root, inner).expect("inner");

        assert!(dom.take_records(doc_observer).is_empty());
        assert_eq!(dom.take_records(shadow_observer).len(), 1);
        assert!(dom.is_connected(inner));
        assert_eq!(dom.owner_document(inner), Some(doc));
        let notes = dom.take_notifications();
        assert_eq!(notes.shadow_attached, vec![(host, root)]);
    }

    #[test]
    fn cycles_are_rejected() {
        let (mut dom, _doc, body) = page();
        let div = dom.create_element("div");
        dom.append_child(body, div).expect("append");
        let err = dom.append_child(div, body).expect_err("cycle");
        assert_eq!(err, DomError::CycleDetected { parent: div, child: body });
        assert_eq!(
            dom.append_child(div, div).expect_err("self"),
            DomError::CycleDetected { parent: div, child: div }
        );
    }

    #[test]
    fn attribute_records_carry_old_value() {
        let (mut dom, doc, body) = page();
        let observer = dom.observe(doc).expect("observe");
        dom.set_attribute(body, "class", "a").expect("set");
        dom.set_attribute(body, "class", "b").expect("set");
        dom.remove_attribute(body, "class").expect("remove");
        dom.remove_attribute(body, "class").expect("remove absent");
        let old_values: Vec<_> = dom
            .take_records(observer)
            .into_iter()
            .map(|record| match record {
                MutationRecord::Attributes { old_value, .. } => old_value,
                other => panic!("unexpected record {other:?}"),
            })
            .collect();
        assert_eq!(old_values, vec![None, Some("a".into()), Some("b".into())]);
    }

    #[test]
    fn ready_state_queues_lifecycle_events() {
        let mut dom = Dom::new();
        let doc = dom.create_document_with_state(
            Url::parse("https://example.com/").expect("url"),
            ReadyState::Loading,
        );
        dom.set_ready_state(doc, ReadyState::Complete).expect("ready");
        let notes = dom.take_notifications();
        assert_eq!(
            notes.lifecycle,
            vec![(doc, Lifecycle::DomContentLoaded), (doc, Lifecycle::Load)]
        );
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (mut dom, doc, body) = page();
        let observer = dom.observe(doc).expect("observe");
        assert!(dom.disconnect(observer));
        assert!(!dom.disconnect(observer));
        dom.set_attribute(body, "a", "b").expect("attr");
        assert!(!dom.has_pending_records());
    }
}
