//! Managers for roots and resources discovered after recording started.
//!
//! Serialization reports what it finds through [`Discoveries`]; the recorder then
//! hands each discovery to the manager that owns it.

mod canvas;
mod iframe;
mod shadow;
mod stylesheet;

pub use canvas::CanvasManager;
pub use iframe::{CrossOriginIdMap, IframeManager};
pub use shadow::ShadowDomManager;
pub use stylesheet::StylesheetManager;

use crate::snapshot::SerializeHooks;
use dom::NodeRef;

/// Sub-roots and resources met while serializing.
#[derive(Debug, Default)]
pub struct Discoveries {
    pub iframes: Vec<NodeRef>,
    pub links: Vec<NodeRef>,
    pub shadow_roots: Vec<(NodeRef, NodeRef)>,
}

impl Discoveries {
    pub fn is_empty(&self) -> bool {
        self.iframes.is_empty() && self.links.is_empty() && self.shadow_roots.is_empty()
    }
}

impl SerializeHooks for Discoveries {
    fn on_iframe(&mut self, iframe: NodeRef) {
        self.iframes.push(iframe);
    }

    fn on_stylesheet(&mut self, link: NodeRef) {
        self.links.push(link);
    }

    fn on_shadow_root(&mut self, host: NodeRef, root: NodeRef) {
        self.shadow_roots.push((host, root));
    }
}
