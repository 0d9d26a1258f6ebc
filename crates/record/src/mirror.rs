//! Node and stylesheet id assignment.
//!
//! Ids are handed out from a monotonic counter and never reused: `reset` forgets
//! every entry but keeps counting, so an id seen in an earlier stream can never be
//! confused with a new node. The node mirror also keeps a small side table of the
//! last shape recorded for each id, which is what the mutation buffer compares
//! against to drop attribute and text changes that did not change anything.

use core_types::{NodeId, RawId, StyleSheetId};
use dom::{Dom, NodeRef, SheetRef};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Bidirectional key ↔ id map over a monotonic counter.
#[derive(Debug)]
pub struct IdMap<K, I> {
    next: u32,
    by_id: HashMap<I, K>,
    by_key: HashMap<K, I>,
}

impl<K: Copy + Eq + Hash, I: RawId> IdMap<K, I> {
    pub fn new() -> Self {
        Self {
            next: 1,
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        }
    }

    /// Id of `key`, allocating one on first sight.
    pub fn allocate(&mut self, key: K) -> I {
        if let Some(id) = self.by_key.get(&key) {
            return *id;
        }
        let id = self.reserve();
        self.by_id.insert(id, key);
        self.by_key.insert(key, id);
        id
    }

    /// A fresh id with no key behind it.
    pub fn reserve(&mut self) -> I {
        let id = I::from_raw(self.next);
        self.next += 1;
        id
    }

    pub fn get_id(&self, key: K) -> Option<I> {
        self.by_key.get(&key).copied()
    }

    pub fn resolve(&self, id: I) -> Option<K> {
        self.by_id.get(&id).copied()
    }

    pub fn has(&self, key: K) -> bool {
        self.by_key.contains_key(&key)
    }

    pub fn has_id(&self, id: I) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn remove(&mut self, id: I) -> Option<K> {
        let key = self.by_id.remove(&id)?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn reset(&mut self) {
        self.by_id.clear();
        self.by_key.clear();
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl<K: Copy + Eq + Hash, I: RawId> Default for IdMap<K, I> {
    fn default() -> Self {
        Self::new()
    }
}

pub type StyleSheetMirror = IdMap<SheetRef, StyleSheetId>;

/// Last recorded shape of a mirrored node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeMeta {
    pub tag: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
}

impl NodeMeta {
    pub fn capture(dom: &Dom, node: NodeRef) -> Self {
        match dom.kind(node) {
            Some(dom::NodeKind::Element {
                name, attributes, ..
            }) => NodeMeta {
                tag: Some(name.clone()),
                attributes: attributes.iter().cloned().collect(),
                text: None,
            },
            Some(dom::NodeKind::Text { text }) | Some(dom::NodeKind::Comment { text }) => {
                NodeMeta {
                    tag: None,
                    attributes: BTreeMap::new(),
                    text: Some(text.clone()),
                }
            }
            _ => NodeMeta::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Mirror {
    ids: IdMap<NodeRef, NodeId>,
    meta: HashMap<NodeId, NodeMeta>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, node: NodeRef) -> NodeId {
        self.ids.allocate(node)
    }

    pub fn reserve(&mut self) -> NodeId {
        self.ids.reserve()
    }

    pub fn get_id(&self, node: NodeRef) -> Option<NodeId> {
        self.ids.get_id(node)
    }

    pub fn resolve(&self, id: NodeId) -> Option<NodeRef> {
        self.ids.resolve(id)
    }

    pub fn has(&self, node: NodeRef) -> bool {
        self.ids.has(node)
    }

    pub fn has_id(&self, id: NodeId) -> bool {
        self.ids.has_id(id)
    }

    pub fn meta(&self, id: NodeId) -> Option<&NodeMeta> {
        self.meta.get(&id)
    }

    pub fn set_meta(&mut self, id: NodeId, meta: NodeMeta) {
        if self.ids.has_id(id) {
            self.meta.insert(id, meta);
        }
    }

    /// Record an attribute value in the side table. `None` removes it.
    pub fn note_attribute(&mut self, id: NodeId, name: &str, value: Option<&str>) {
        let Some(meta) = self.meta.get_mut(&id) else {
            return;
        };
        match value {
            Some(value) => {
                meta.attributes.insert(name.to_string(), value.to_string());
            }
            None => {
                meta.attributes.remove(name);
            }
        }
    }

    pub fn note_text(&mut self, id: NodeId, value: &str) {
        if let Some(meta) = self.meta.get_mut(&id) {
            meta.text = Some(value.to_string());
        }
    }

    pub fn remove(&mut self, id: NodeId) -> Option<NodeRef> {
        self.meta.remove(&id);
        self.ids.remove(id)
    }

    /// Drop `node` and every still-mirrored descendant that is not connected to a
    /// document. Shadow trees hang off their host and go with it. Returns how many
    /// descendants were released besides `node` itself.
    pub fn remove_subtree(&mut self, dom: &Dom, node: NodeRef) -> usize {
        if let Some(id) = self.get_id(node) {
            self.remove(id);
        }
        let mut released = 0;
        let mut stack = child_scope(dom, node);
        while let Some(current) = stack.pop() {
            if dom.is_connected(current) {
                continue;
            }
            if let Some(id) = self.get_id(current) {
                self.remove(id);
                released += 1;
            }
            stack.extend(child_scope(dom, current));
        }
        released
    }

    pub fn reset(&mut self) {
        self.ids.reset();
        self.meta.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn child_scope(dom: &Dom, node: NodeRef) -> Vec<NodeRef> {
    let mut scope = dom.children(node).to_vec();
    if let Some(root) = dom.shadow_root(node) {
        scope.extend_from_slice(dom.children(root));
    }
    scope
}
