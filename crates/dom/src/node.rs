use core_types::FrameKey;
use url::Url;

/// Handle to a node in the host arena.
///
/// Handles are never recycled: a detached node keeps its slot (and its detached
/// subtree) so it can be re-inserted later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(pub u32);

/// Handle to a stylesheet object (constructed, or the sheet behind a `<link>`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetRef(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scroll_left: f64,
    pub scroll_top: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleSheet {
    pub rules: Vec<String>,
}

impl StyleSheet {
    pub fn css_text(&self) -> String {
        self.rules.join("")
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Document {
        url: Url,
        ready_state: ReadyState,
        viewport: Viewport,
        adopted_sheets: Vec<SheetRef>,
    },
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        name: String,
        attributes: Vec<(String, String)>,
        svg: bool,
        shadow_root: Option<NodeRef>,
        /// Loaded content document when this element is an iframe.
        content_document: Option<NodeRef>,
        frame: Option<FrameKey>,
        /// Loaded sheet when this element is a stylesheet link.
        sheet: Option<SheetRef>,
    },
    Text {
        text: String,
    },
    Comment {
        text: String,
    },
    ShadowRoot {
        host: NodeRef,
        adopted_sheets: Vec<SheetRef>,
    },
}

impl NodeKind {
    pub fn allows_children(&self) -> bool {
        matches!(
            self,
            NodeKind::Document { .. } | NodeKind::Element { .. } | NodeKind::ShadowRoot { .. }
        )
    }

    pub fn tag_name(&self) -> Option<&str> {
        match self {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }
}

pub(crate) struct NodeRecord {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeRef>,
    pub(crate) children: Vec<NodeRef>,
}

impl NodeRecord {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
        }
    }
}
