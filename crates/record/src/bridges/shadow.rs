use crate::observer::{ObservationLayer, ScopeKind};
use core_types::NodeId;
use dom::{Dom, DomError, NodeRef};

/// Keeps one observation per known shadow root.
#[derive(Debug, Default)]
pub struct ShadowDomManager {
    roots: Vec<NodeRef>,
}

impl ShadowDomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe `root` unless it already is. Returns whether a new observation started.
    pub fn add_shadow_root(
        &mut self,
        dom: &mut Dom,
        layer: &mut ObservationLayer,
        root: NodeRef,
        root_id: Option<NodeId>,
    ) -> Result<bool, DomError> {
        if self.roots.contains(&root) {
            return Ok(false);
        }
        let started = layer.observe_root(dom, root, ScopeKind::Shadow, root_id)?;
        self.roots.push(root);
        Ok(started)
    }

    pub fn is_tracked(&self, root: NodeRef) -> bool {
        self.roots.contains(&root)
    }

    /// Drop every shadow observation; a full snapshot rediscovers the live ones.
    pub fn reset(&mut self, dom: &mut Dom, layer: &mut ObservationLayer) {
        layer.release_scopes(dom, ScopeKind::Shadow);
        self.roots.clear();
    }
}
