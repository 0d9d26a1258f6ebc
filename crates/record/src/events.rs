//! Event model of the recorded stream.
//!
//! The JSON shape matches the established replay format: numeric `type` on events,
//! numeric `source` on incremental data, camelCase field names, ids as plain numbers.
//! Only serialization is provided; the recorder never reads events back except for
//! the parent-side frame relay, which receives them typed.

use core_types::{
    CanvasContext, MediaInteractionKind, MouseInteractionKind, NodeId, PointerStream,
    StyleSheetId, Timestamp,
};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    DomContentLoaded = 0,
    Load = 1,
    FullSnapshot = 2,
    IncrementalSnapshot = 3,
    Meta = 4,
    Custom = 5,
    Plugin = 6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum IncrementalSource {
    Mutation = 0,
    MouseMove = 1,
    MouseInteraction = 2,
    Scroll = 3,
    ViewportResize = 4,
    Input = 5,
    TouchMove = 6,
    MediaInteraction = 7,
    StyleSheetRule = 8,
    CanvasMutation = 9,
    Font = 10,
    Drag = 12,
    StyleDeclaration = 13,
    Selection = 14,
    AdoptedStyleSheet = 15,
    CustomElement = 16,
}

/// An event as handed to the sink: payload plus the time it entered the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub data: EventData,
    pub timestamp: Timestamp,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.data.event_type()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("type", &(self.event_type() as u8))?;
        map.serialize_entry("data", &self.data)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.end()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventData {
    DomContentLoaded,
    Load,
    FullSnapshot(FullSnapshotData),
    Incremental(IncrementalData),
    Meta(MetaData),
    Custom(CustomData),
    Plugin(PluginData),
}

impl EventData {
    pub fn event_type(&self) -> EventType {
        match self {
            EventData::DomContentLoaded => EventType::DomContentLoaded,
            EventData::Load => EventType::Load,
            EventData::FullSnapshot(_) => EventType::FullSnapshot,
            EventData::Incremental(_) => EventType::IncrementalSnapshot,
            EventData::Meta(_) => EventType::Meta,
            EventData::Custom(_) => EventType::Custom,
            EventData::Plugin(_) => EventType::Plugin,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, EventData::Incremental(IncrementalData::Mutation(_)))
    }

    /// Iframe attachments are covered by the snapshot that discovered the iframe and
    /// never count toward a checkout.
    pub fn is_attach_iframe(&self) -> bool {
        matches!(
            self,
            EventData::Incremental(IncrementalData::Mutation(m)) if m.is_attach_iframe
        )
    }
}

impl Serialize for EventData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EventData::DomContentLoaded | EventData::Load => {
                serializer.serialize_map(Some(0))?.end()
            }
            EventData::FullSnapshot(data) => data.serialize(serializer),
            EventData::Incremental(data) => data.serialize(serializer),
            EventData::Meta(data) => data.serialize(serializer),
            EventData::Custom(data) => data.serialize(serializer),
            EventData::Plugin(data) => data.serialize(serializer),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetaData {
    pub href: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ScrollOffset {
    pub left: f64,
    pub top: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSnapshotData {
    pub node: SerializedNode,
    pub initial_offset: ScrollOffset,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CustomData {
    pub tag: String,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PluginData {
    pub plugin: String,
    pub payload: serde_json::Value,
}

// Serialized nodes.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SerializedNodeType {
    Document = 0,
    DocumentType = 1,
    Element = 2,
    Text = 3,
    Comment = 5,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SerializedNode {
    pub id: NodeId,
    pub kind: SerializedKind,
    /// Id of the document the node belongs to when it lives in an iframe.
    pub root_id: Option<NodeId>,
    /// Set on direct children of a shadow root.
    pub is_shadow: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SerializedKind {
    Document {
        child_nodes: Vec<SerializedNode>,
    },
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag_name: String,
        attributes: BTreeMap<String, String>,
        child_nodes: Vec<SerializedNode>,
        is_svg: bool,
        is_shadow_host: bool,
    },
    Text {
        text_content: String,
    },
    Comment {
        text_content: String,
    },
}

impl SerializedKind {
    pub fn node_type(&self) -> SerializedNodeType {
        match self {
            SerializedKind::Document { .. } => SerializedNodeType::Document,
            SerializedKind::DocumentType { .. } => SerializedNodeType::DocumentType,
            SerializedKind::Element { .. } => SerializedNodeType::Element,
            SerializedKind::Text { .. } => SerializedNodeType::Text,
            SerializedKind::Comment { .. } => SerializedNodeType::Comment,
        }
    }

    pub fn child_nodes(&self) -> &[SerializedNode] {
        match self {
            SerializedKind::Document { child_nodes } | SerializedKind::Element { child_nodes, .. } => {
                child_nodes
            }
            _ => &[],
        }
    }

    pub fn child_nodes_mut(&mut self) -> Option<&mut Vec<SerializedNode>> {
        match self {
            SerializedKind::Document { child_nodes } | SerializedKind::Element { child_nodes, .. } => {
                Some(child_nodes)
            }
            _ => None,
        }
    }
}

impl SerializedNode {
    /// Visit this node and every descendant, parents first.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut SerializedNode)) {
        f(self);
        if let Some(children) = self.kind.child_nodes_mut() {
            for child in children {
                child.walk_mut(f);
            }
        }
    }

    pub fn count(&self) -> usize {
        1 + self
            .kind
            .child_nodes()
            .iter()
            .map(SerializedNode::count)
            .sum::<usize>()
    }
}

impl Serialize for SerializedNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &(self.kind.node_type() as u8))?;
        match &self.kind {
            SerializedKind::Document { child_nodes } => {
                map.serialize_entry("childNodes", child_nodes)?;
            }
            SerializedKind::DocumentType {
                name,
                public_id,
                system_id,
            } => {
                map.serialize_entry("name", name)?;
                map.serialize_entry("publicId", public_id)?;
                map.serialize_entry("systemId", system_id)?;
            }
            SerializedKind::Element {
                tag_name,
                attributes,
                child_nodes,
                is_svg,
                is_shadow_host,
            } => {
                map.serialize_entry("tagName", tag_name)?;
                map.serialize_entry("attributes", attributes)?;
                map.serialize_entry("childNodes", child_nodes)?;
                if *is_svg {
                    map.serialize_entry("isSVG", &true)?;
                }
                if *is_shadow_host {
                    map.serialize_entry("isShadowHost", &true)?;
                }
            }
            SerializedKind::Text { text_content } | SerializedKind::Comment { text_content } => {
                map.serialize_entry("textContent", text_content)?;
            }
        }
        map.serialize_entry("id", &self.id)?;
        if let Some(root_id) = self.root_id {
            map.serialize_entry("rootId", &root_id)?;
        }
        if self.is_shadow {
            map.serialize_entry("isShadow", &true)?;
        }
        map.end()
    }
}

// Incremental data.

#[derive(Clone, Debug, PartialEq)]
pub enum IncrementalData {
    Mutation(MutationData),
    PointerMove(PointerMoveData),
    MouseInteraction(MouseInteractionData),
    Scroll(ScrollData),
    ViewportResize(ViewportResizeData),
    Input(InputData),
    MediaInteraction(MediaInteractionData),
    StyleSheetRule(StyleSheetRuleData),
    CanvasMutation(CanvasMutationData),
    Font(FontData),
    StyleDeclaration(StyleDeclarationData),
    Selection(SelectionData),
    AdoptedStyleSheet(AdoptedStyleSheetData),
    CustomElement(CustomElementData),
}

impl IncrementalData {
    pub fn source(&self) -> IncrementalSource {
        match self {
            IncrementalData::Mutation(_) => IncrementalSource::Mutation,
            IncrementalData::PointerMove(data) => match data.stream {
                PointerStream::Mouse => IncrementalSource::MouseMove,
                PointerStream::Touch => IncrementalSource::TouchMove,
                PointerStream::Drag => IncrementalSource::Drag,
            },
            IncrementalData::MouseInteraction(_) => IncrementalSource::MouseInteraction,
            IncrementalData::Scroll(_) => IncrementalSource::Scroll,
            IncrementalData::ViewportResize(_) => IncrementalSource::ViewportResize,
            IncrementalData::Input(_) => IncrementalSource::Input,
            IncrementalData::MediaInteraction(_) => IncrementalSource::MediaInteraction,
            IncrementalData::StyleSheetRule(_) => IncrementalSource::StyleSheetRule,
            IncrementalData::CanvasMutation(_) => IncrementalSource::CanvasMutation,
            IncrementalData::Font(_) => IncrementalSource::Font,
            IncrementalData::StyleDeclaration(_) => IncrementalSource::StyleDeclaration,
            IncrementalData::Selection(_) => IncrementalSource::Selection,
            IncrementalData::AdoptedStyleSheet(_) => IncrementalSource::AdoptedStyleSheet,
            IncrementalData::CustomElement(_) => IncrementalSource::CustomElement,
        }
    }
}

#[derive(Serialize)]
struct Sourced<'a, T: Serialize> {
    source: u8,
    #[serde(flatten)]
    payload: &'a T,
}

impl Serialize for IncrementalData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let source = self.source() as u8;
        match self {
            IncrementalData::Mutation(p) => Sourced { source, payload: p }.serialize(serializer),
            IncrementalData::PointerMove(p) => Sourced { source, payload: p }.serialize(serializer),
            IncrementalData::MouseInteraction(p) => {
                Sourced { source, payload: p }.serialize(serializer)
            }
            IncrementalData::Scroll(p) => Sourced { source, payload: p }.serialize(serializer),
            IncrementalData::ViewportResize(p) => {
                Sourced { source, payload: p }.serialize(serializer)
            }
            IncrementalData::Input(p) => Sourced { source, payload: p }.serialize(serializer),
            IncrementalData::MediaInteraction(p) => {
                Sourced { source, payload: p }.serialize(serializer)
            }
            IncrementalData::StyleSheetRule(p) => {
                Sourced { source, payload: p }.serialize(serializer)
            }
            IncrementalData::CanvasMutation(p) => {
                Sourced { source, payload: p }.serialize(serializer)
            }
            IncrementalData::Font(p) => Sourced { source, payload: p }.serialize(serializer),
            IncrementalData::StyleDeclaration(p) => {
                Sourced { source, payload: p }.serialize(serializer)
            }
            IncrementalData::Selection(p) => Sourced { source, payload: p }.serialize(serializer),
            IncrementalData::AdoptedStyleSheet(p) => {
                Sourced { source, payload: p }.serialize(serializer)
            }
            IncrementalData::CustomElement(p) => {
                Sourced { source, payload: p }.serialize(serializer)
            }
        }
    }
}

/// Canonical diff produced by one mutation buffer flush.
///
/// Within one payload: every add's parent either resolved before the flush or is
/// added earlier in `adds`; removes follow adds; attribute and text changes only
/// reference nodes not described by an add.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationData {
    pub adds: Vec<AddedNode>,
    pub removes: Vec<RemovedNode>,
    pub texts: Vec<TextChange>,
    pub attributes: Vec<AttributeChange>,
    #[serde(skip_serializing_if = "is_false")]
    pub is_attach_iframe: bool,
    /// Adds that re-used an existing id (moves).
    #[serde(skip)]
    pub moved: usize,
    /// Mirror entries released without their own removal record (descendants of
    /// removed nodes).
    #[serde(skip)]
    pub released: usize,
}

impl MutationData {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.removes.is_empty()
            && self.texts.is_empty()
            && self.attributes.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedNode {
    pub parent_id: NodeId,
    pub next_id: Option<NodeId>,
    pub node: SerializedNode,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedNode {
    pub parent_id: NodeId,
    pub id: NodeId,
    #[serde(skip_serializing_if = "is_false")]
    pub is_shadow: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextChange {
    pub id: NodeId,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttributeChange {
    pub id: NodeId,
    /// `None` marks a removed attribute.
    pub attributes: BTreeMap<String, Option<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
    pub id: NodeId,
    pub time_offset: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PointerMoveData {
    #[serde(skip)]
    pub stream: PointerStream,
    pub positions: Vec<PointerPosition>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MouseInteractionData {
    #[serde(rename = "type")]
    pub kind: MouseInteractionKind,
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScrollData {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ViewportResizeData {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputData {
    pub id: NodeId,
    pub text: String,
    pub is_checked: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInteractionData {
    #[serde(rename = "type")]
    pub kind: MediaInteractionKind,
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleAdd {
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleRemove {
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSheetRuleData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_id: Option<StyleSheetId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub adds: Vec<RuleAdd>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removes: Vec<RuleRemove>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeclarationSet {
    pub property: String,
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeclarationRemove {
    pub property: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDeclarationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_id: Option<StyleSheetId>,
    pub index: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<DeclarationSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<DeclarationRemove>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CanvasCommand {
    pub property: String,
    pub args: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "is_false")]
    pub setter: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CanvasMutationData {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub context: CanvasContext,
    pub commands: Vec<CanvasCommand>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FontData {
    pub family: String,
    pub font_source: String,
    pub buffer: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRangeData {
    pub start: NodeId,
    pub start_offset: u32,
    pub end: NodeId,
    pub end_offset: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectionData {
    pub ranges: Vec<SelectionRangeData>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoptedStyle {
    pub style_id: StyleSheetId,
    pub rules: Vec<RuleAdd>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoptedStyleSheetData {
    pub id: NodeId,
    pub style_ids: Vec<StyleSheetId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub styles: Vec<AdoptedStyle>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CustomElementDefine {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CustomElementData {
    pub define: CustomElementDefine,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element(id: u32, tag: &str) -> SerializedNode {
        SerializedNode {
            id: NodeId(id),
            kind: SerializedKind::Element {
                tag_name: tag.to_string(),
                attributes: BTreeMap::new(),
                child_nodes: Vec::new(),
                is_svg: false,
                is_shadow_host: false,
            },
            root_id: None,
            is_shadow: false,
        }
    }

    #[test]
    fn mutation_event_wire_shape() {
        let event = Event {
            data: EventData::Incremental(IncrementalData::Mutation(MutationData {
                adds: vec![AddedNode {
                    parent_id: NodeId(4),
                    next_id: None,
                    node: element(9, "div"),
                }],
                attributes: vec![AttributeChange {
                    id: NodeId(4),
                    attributes: BTreeMap::from([("class".to_string(), None)]),
                }],
                ..MutationData::default()
            })),
            timestamp: 1_000,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": 3,
                "data": {
                    "source": 0,
                    "adds": [{
                        "parentId": 4,
                        "nextId": null,
                        "node": {"type": 2, "tagName": "div", "attributes": {}, "childNodes": [], "id": 9}
                    }],
                    "removes": [],
                    "texts": [],
                    "attributes": [{"id": 4, "attributes": {"class": null}}]
                },
                "timestamp": 1000
            })
        );
    }

    #[test]
    fn pointer_stream_selects_source() {
        let data = IncrementalData::PointerMove(PointerMoveData {
            stream: PointerStream::Touch,
            positions: Vec::new(),
        });
        assert_eq!(data.source(), IncrementalSource::TouchMove);
        let value = serde_json::to_value(&data).expect("serialize");
        assert_eq!(value, json!({"source": 6, "positions": []}));
    }

    #[test]
    fn lifecycle_events_have_empty_data() {
        let event = Event {
            data: EventData::Load,
            timestamp: 5,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value, json!({"type": 1, "data": {}, "timestamp": 5}));
    }
}
