//! Node serialization shared by full snapshots and mutation adds.
//!
//! `serialize_node` describes one node without its children and is what the mutation
//! buffer uses for adds. `TreeSnapshotter` is the default whole-document collaborator;
//! embedders with their own serializer (masking, inlined images, ...) implement
//! [`Snapshotter`] instead.

use crate::events::{SerializedKind, SerializedNode};
use crate::mirror::{Mirror, NodeMeta};
use core_types::NodeId;
use dom::{Dom, NodeKind, NodeRef};
use std::collections::BTreeMap;

/// Attribute that carries an inlined stylesheet on `<link>` elements.
pub const CSS_TEXT_ATTRIBUTE: &str = "_cssText";

/// Discovery callbacks fired while nodes are serialized.
pub trait SerializeHooks {
    /// An iframe element was serialized. Its content document is not inlined.
    fn on_iframe(&mut self, _iframe: NodeRef) {}
    /// A stylesheet link whose sheet has not loaded yet.
    fn on_stylesheet(&mut self, _link: NodeRef) {}
    fn on_shadow_root(&mut self, _host: NodeRef, _root: NodeRef) {}
}

pub struct NoHooks;

impl SerializeHooks for NoHooks {}

/// Whether a snapshot covers the top document or one nested in an iframe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentScope {
    Top,
    Nested,
}

pub trait Snapshotter {
    /// Serialize the document at `root`, assigning ids through `mirror`. `None` when
    /// the root cannot be serialized.
    fn snapshot(
        &mut self,
        dom: &Dom,
        root: NodeRef,
        scope: DocumentScope,
        mirror: &mut Mirror,
        hooks: &mut dyn SerializeHooks,
    ) -> Option<SerializedNode>;
}

#[derive(Debug, Default)]
pub struct TreeSnapshotter;

impl Snapshotter for TreeSnapshotter {
    fn snapshot(
        &mut self,
        dom: &Dom,
        root: NodeRef,
        scope: DocumentScope,
        mirror: &mut Mirror,
        hooks: &mut dyn SerializeHooks,
    ) -> Option<SerializedNode> {
        if !matches!(dom.kind(root), Some(NodeKind::Document { .. })) {
            log::debug!(target: "record.snapshot", "snapshot root {root:?} is not a document");
            return None;
        }
        let root_id = match scope {
            DocumentScope::Top => None,
            DocumentScope::Nested => Some(mirror.allocate(root)),
        };
        serialize_tree(dom, root, mirror, root_id, hooks)
    }
}

fn serialize_tree(
    dom: &Dom,
    node: NodeRef,
    mirror: &mut Mirror,
    root_id: Option<NodeId>,
    hooks: &mut dyn SerializeHooks,
) -> Option<SerializedNode> {
    let mut serialized = serialize_node(dom, node, mirror, root_id, hooks)?;
    let mut children: Vec<NodeRef> = dom.children(node).to_vec();
    if let Some(shadow) = dom.shadow_root(node) {
        children.extend_from_slice(dom.children(shadow));
    }
    if let Some(child_nodes) = serialized.kind.child_nodes_mut() {
        for child in children {
            if let Some(child) = serialize_tree(dom, child, mirror, root_id, hooks) {
                child_nodes.push(child);
            }
        }
    }
    Some(serialized)
}

/// Serialize `node` without children, allocating (or re-using) its id and refreshing
/// its side table entry. Shadow roots themselves are never serialized: their children
/// appear under the host with `isShadow` set.
pub fn serialize_node(
    dom: &Dom,
    node: NodeRef,
    mirror: &mut Mirror,
    root_id: Option<NodeId>,
    hooks: &mut dyn SerializeHooks,
) -> Option<SerializedNode> {
    let kind = match dom.kind(node)? {
        NodeKind::Document { .. } => SerializedKind::Document {
            child_nodes: Vec::new(),
        },
        NodeKind::DocumentType {
            name,
            public_id,
            system_id,
        } => SerializedKind::DocumentType {
            name: name.clone(),
            public_id: public_id.clone(),
            system_id: system_id.clone(),
        },
        NodeKind::Element {
            name,
            attributes,
            svg,
            shadow_root,
            sheet,
            ..
        } => {
            let mut attrs: BTreeMap<String, String> = attributes.iter().cloned().collect();
            if is_stylesheet_link(dom, node) {
                match sheet.and_then(|s| dom.style_sheet(s)) {
                    Some(loaded) => {
                        attrs.insert(CSS_TEXT_ATTRIBUTE.to_string(), loaded.css_text());
                    }
                    None => hooks.on_stylesheet(node),
                }
            }
            if name.as_str() == "iframe" {
                hooks.on_iframe(node);
            }
            if let Some(root) = shadow_root {
                hooks.on_shadow_root(node, *root);
            }
            SerializedKind::Element {
                tag_name: name.clone(),
                attributes: attrs,
                child_nodes: Vec::new(),
                is_svg: *svg,
                is_shadow_host: shadow_root.is_some(),
            }
        }
        NodeKind::Text { text } => SerializedKind::Text {
            text_content: text.clone(),
        },
        NodeKind::Comment { text } => SerializedKind::Comment {
            text_content: text.clone(),
        },
        NodeKind::ShadowRoot { .. } => return None,
    };
    let id = mirror.allocate(node);
    mirror.set_meta(id, NodeMeta::capture(dom, node));
    let is_shadow = dom
        .parent(node)
        .is_some_and(|parent| dom.shadow_host(parent).is_some());
    let root_id = match kind {
        SerializedKind::Document { .. } => None,
        _ => root_id,
    };
    Some(SerializedNode {
        id,
        kind,
        root_id,
        is_shadow,
    })
}

pub fn is_stylesheet_link(dom: &Dom, node: NodeRef) -> bool {
    dom.tag_name(node) == Some("link")
        && dom
            .attribute(node, "rel")
            .is_some_and(|rel| rel.to_ascii_lowercase().split_whitespace().any(|t| t == "stylesheet"))
}
