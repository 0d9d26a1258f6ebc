//! Iframe documents: same-origin attachment and the parent side of the
//! cross-origin relay.

use crate::bridges::StylesheetManager;
use crate::events::{
    AddedNode, Event, EventData, IncrementalData, MutationData, SerializedKind, SerializedNode,
};
use crate::mirror::Mirror;
use crate::snapshot::{DocumentScope, SerializeHooks, Snapshotter};
use bus::PostedMessage;
use core_types::{FrameKey, NodeId, RawId, StyleSheetId};
use dom::{Dom, NodeRef};
use std::collections::HashMap;
use url::Url;

/// Remote → local id translation for one cross-origin frame.
#[derive(Debug)]
pub struct CrossOriginIdMap<I> {
    map: HashMap<I, I>,
}

impl<I: RawId> CrossOriginIdMap<I> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn get_or_insert_with(&mut self, remote: I, reserve: impl FnOnce() -> I) -> I {
        *self.map.entry(remote).or_insert_with(reserve)
    }

    pub fn get(&self, remote: I) -> Option<I> {
        self.map.get(&remote).copied()
    }

    pub fn reset(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<I: RawId> Default for CrossOriginIdMap<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct RemoteFrame {
    nodes: CrossOriginIdMap<NodeId>,
    styles: CrossOriginIdMap<StyleSheetId>,
    /// Local id of the frame's document, known once its full snapshot arrived.
    root: Option<NodeId>,
}

#[derive(Debug)]
pub struct IframeManager {
    iframes: Vec<NodeRef>,
    /// Content document attached under each iframe.
    documents: HashMap<NodeRef, NodeRef>,
    remote: HashMap<FrameKey, RemoteFrame>,
    record_cross_origin: bool,
}

impl IframeManager {
    pub fn new(record_cross_origin: bool) -> Self {
        Self {
            iframes: Vec::new(),
            documents: HashMap::new(),
            remote: HashMap::new(),
            record_cross_origin,
        }
    }

    pub fn add_iframe(&mut self, iframe: NodeRef) {
        if !self.iframes.contains(&iframe) {
            self.iframes.push(iframe);
        }
    }

    pub fn is_tracked(&self, iframe: NodeRef) -> bool {
        self.iframes.contains(&iframe)
    }

    pub fn document_of(&self, iframe: NodeRef) -> Option<NodeRef> {
        self.documents.get(&iframe).copied()
    }

    /// Forget every iframe whose id left the mirror, along with its relay state.
    /// Returns the content documents that were attached under them.
    pub fn prune(&mut self, dom: &Dom, mirror: &Mirror) -> Vec<NodeRef> {
        let mut released = Vec::new();
        let mut kept = Vec::with_capacity(self.iframes.len());
        for iframe in std::mem::take(&mut self.iframes) {
            if mirror.has(iframe) {
                kept.push(iframe);
                continue;
            }
            log::debug!(target: "record.iframe", "forgetting released iframe {iframe:?}");
            released.extend(self.documents.remove(&iframe));
            if let Some(key) = dom.frame_key(iframe) {
                self.remote.remove(&key);
            }
        }
        self.iframes = kept;
        released
    }

    /// Serialize the loaded content document of `iframe` as an attach mutation.
    /// Returns the document together with the payload so the caller can observe it.
    pub fn attach(
        &mut self,
        dom: &Dom,
        mirror: &mut Mirror,
        snapshotter: &mut dyn Snapshotter,
        iframe: NodeRef,
        hooks: &mut dyn SerializeHooks,
    ) -> Option<(NodeRef, MutationData)> {
        if !self.is_tracked(iframe) {
            return None;
        }
        let document = dom.content_document(iframe)?;
        if !same_origin(dom, iframe, document) {
            log::debug!(target: "record.iframe", "{document:?} is cross-origin; its own recorder relays it");
            return None;
        }
        let parent_id = mirror.get_id(iframe)?;
        let Some(node) = snapshotter.snapshot(dom, document, DocumentScope::Nested, mirror, hooks)
        else {
            log::warn!(target: "record.iframe", "failed to serialize iframe document {document:?}");
            return None;
        };
        log::debug!(target: "record.iframe", "attaching {document:?} under {parent_id:?}");
        self.documents.insert(iframe, document);
        Some((document, attach_mutation(parent_id, node)))
    }

    /// Translate a message posted by a cross-origin child recorder into a local event.
    /// Returns the event data and the child's checkout flag.
    pub fn relay(
        &mut self,
        dom: &Dom,
        mirror: &mut Mirror,
        styles: &mut StylesheetManager,
        message: PostedMessage<Event>,
    ) -> Option<(EventData, bool)> {
        if !self.record_cross_origin || !message.data.is_recorder_message() {
            return None;
        }
        let iframe = dom.frame_element(message.source)?;
        if !self.is_tracked(iframe) {
            log::trace!(target: "record.iframe", "message from untracked frame {:?}", message.source);
            return None;
        }
        if !origin_matches(dom, iframe, &message.data.origin) {
            log::warn!(
                target: "record.iframe",
                "dropping message claiming origin {} from {iframe:?}",
                message.data.origin
            );
            return None;
        }
        let is_checkout = message.data.is_checkout.unwrap_or(false);
        let frame = self.remote.entry(message.source).or_default();
        let data = match message.data.event.data {
            EventData::FullSnapshot(snapshot) => {
                frame.nodes.reset();
                frame.styles.reset();
                let parent_id = mirror.get_id(iframe)?;
                let mut node = snapshot.node;
                let root_id = frame.nodes.get_or_insert_with(node.id, || mirror.reserve());
                frame.root = Some(root_id);
                node.walk_mut(&mut |n| {
                    n.id = frame.nodes.get_or_insert_with(n.id, || mirror.reserve());
                    n.root_id = match n.kind {
                        SerializedKind::Document { .. } => None,
                        _ => Some(root_id),
                    };
                });
                EventData::Incremental(IncrementalData::Mutation(attach_mutation(parent_id, node)))
            }
            EventData::Meta(_) | EventData::Load | EventData::DomContentLoaded => return None,
            EventData::Plugin(plugin) => EventData::Plugin(plugin),
            EventData::Custom(mut custom) => {
                remap_json_ids(&mut custom.payload, &mut |id| {
                    frame.nodes.get_or_insert_with(id, || mirror.reserve())
                });
                EventData::Custom(custom)
            }
            EventData::Incremental(mut data) => {
                let RemoteFrame {
                    nodes,
                    styles: style_map,
                    root,
                } = frame;
                let keep = remap_incremental(
                    &mut data,
                    &mut |id| nodes.get_or_insert_with(id, || mirror.reserve()),
                    &mut |id| style_map.get_or_insert_with(id, || styles.reserve_style_id()),
                );
                if !keep {
                    return None;
                }
                // The child records its document as a top document and never stamps it.
                if let (IncrementalData::Mutation(m), Some(root)) = (&mut data, *root) {
                    for add in &mut m.adds {
                        stamp_root_id(&mut add.node, root);
                    }
                }
                EventData::Incremental(data)
            }
        };
        Some((data, is_checkout))
    }
}

fn attach_mutation(parent_id: NodeId, node: SerializedNode) -> MutationData {
    MutationData {
        adds: vec![AddedNode {
            parent_id,
            next_id: None,
            node,
        }],
        is_attach_iframe: true,
        ..MutationData::default()
    }
}

/// Whether the embedding document could read `document` directly.
fn same_origin(dom: &Dom, iframe: NodeRef, document: NodeRef) -> bool {
    let outer = dom.owner_document(iframe).and_then(|d| dom.url(d));
    match (outer, dom.url(document)) {
        (Some(outer), Some(inner)) => outer.origin() == inner.origin(),
        _ => false,
    }
}

fn origin_matches(dom: &Dom, iframe: NodeRef, claimed: &str) -> bool {
    match dom.attribute(iframe, "src").and_then(|src| Url::parse(src).ok()) {
        Some(url) => url.origin().ascii_serialization() == claimed,
        None => true,
    }
}

fn remap_node_tree(node: &mut SerializedNode, ids: &mut dyn FnMut(NodeId) -> NodeId) {
    node.walk_mut(&mut |n| {
        n.id = ids(n.id);
        n.root_id = n.root_id.map(&mut *ids);
    });
}

fn stamp_root_id(node: &mut SerializedNode, root: NodeId) {
    node.walk_mut(&mut |n| {
        if n.root_id.is_none() && !matches!(n.kind, SerializedKind::Document { .. }) {
            n.root_id = Some(root);
        }
    });
}

/// Re-address every id in `data`. Returns `false` for events the parent drops.
fn remap_incremental(
    data: &mut IncrementalData,
    ids: &mut dyn FnMut(NodeId) -> NodeId,
    style_ids: &mut dyn FnMut(StyleSheetId) -> StyleSheetId,
) -> bool {
    match data {
        IncrementalData::Mutation(m) => {
            for add in &mut m.adds {
                add.parent_id = ids(add.parent_id);
                add.next_id = add.next_id.map(&mut *ids);
                remap_node_tree(&mut add.node, ids);
            }
            for removal in &mut m.removes {
                removal.parent_id = ids(removal.parent_id);
                removal.id = ids(removal.id);
            }
            for text in &mut m.texts {
                text.id = ids(text.id);
            }
            for attribute in &mut m.attributes {
                attribute.id = ids(attribute.id);
            }
        }
        IncrementalData::ViewportResize(_) => return false,
        IncrementalData::PointerMove(p) => {
            for position in &mut p.positions {
                position.id = ids(position.id);
            }
        }
        IncrementalData::MouseInteraction(d) => d.id = ids(d.id),
        IncrementalData::Scroll(d) => d.id = ids(d.id),
        IncrementalData::Input(d) => d.id = ids(d.id),
        IncrementalData::CanvasMutation(d) => d.id = ids(d.id),
        IncrementalData::MediaInteraction(d) => d.id = ids(d.id),
        IncrementalData::StyleSheetRule(d) => {
            d.id = d.id.map(&mut *ids);
            d.style_id = d.style_id.map(&mut *style_ids);
        }
        IncrementalData::StyleDeclaration(d) => {
            d.id = d.id.map(&mut *ids);
            d.style_id = d.style_id.map(&mut *style_ids);
        }
        IncrementalData::Selection(d) => {
            for range in &mut d.ranges {
                range.start = ids(range.start);
                range.end = ids(range.end);
            }
        }
        IncrementalData::AdoptedStyleSheet(d) => {
            d.id = ids(d.id);
            for style_id in &mut d.style_ids {
                *style_id = style_ids(*style_id);
            }
            for style in &mut d.styles {
                style.style_id = style_ids(style.style_id);
            }
        }
        IncrementalData::Font(_) | IncrementalData::CustomElement(_) => {}
    }
    true
}

const ID_KEYS: [&str; 4] = ["id", "parentId", "previousId", "nextId"];

fn remap_json_ids(value: &mut serde_json::Value, ids: &mut dyn FnMut(NodeId) -> NodeId) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let remote = entry.as_u64().and_then(|raw| u32::try_from(raw).ok());
                match remote {
                    Some(raw) if ID_KEYS.contains(&key.as_str()) => {
                        *entry = serde_json::Value::from(ids(NodeId(raw)).0);
                    }
                    _ => remap_json_ids(entry, ids),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                remap_json_ids(item, ids);
            }
        }
        _ => {}
    }
}
