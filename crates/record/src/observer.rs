//! Observation layer: native observers, their mutation buffers, and producers.
//!
//! Every observed tree (the top document, loaded iframe documents, shadow roots) gets
//! one [`Observation`]: a native observer registration plus the buffer its batches are
//! fed to. Producers cover everything that is not a tree mutation; they hand shaped
//! payloads straight to the pipeline through [`Emit`].

use crate::error::RecordError;
use crate::events::{
    CustomElementData, CustomElementDefine, DeclarationRemove, DeclarationSet, FontData,
    IncrementalData, InputData, MediaInteractionData, MouseInteractionData, MutationData,
    PointerMoveData, PointerPosition, RuleAdd, RuleRemove, ScrollData, SelectionData,
    SelectionRangeData, StyleDeclarationData, StyleSheetRuleData, ViewportResizeData,
};
use crate::mirror::Mirror;
use crate::mutation::MutationBuffer;
use crate::snapshot::SerializeHooks;
use bus::HostEvent;
use core_types::NodeId;
use dom::{Dom, DomError, MutationRecord, NodeRef, ObserverId};
use std::sync::mpsc::Receiver;

/// Single capability handed to producers.
pub trait Emit {
    fn emit(&mut self, data: IncrementalData);
}

impl Emit for Vec<IncrementalData> {
    fn emit(&mut self, data: IncrementalData) {
        self.push(data);
    }
}

/// Source of non-mutation incremental events.
pub trait Producer {
    fn name(&self) -> &'static str;

    /// A document started being observed.
    fn observe(&mut self, _dom: &Dom, _document: NodeRef) {}

    fn unobserve(&mut self, _document: NodeRef) {}

    /// Emit everything gathered since the last drain.
    fn drain(&mut self, dom: &Dom, mirror: &Mirror, out: &mut dyn Emit);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Document,
    Frame,
    Shadow,
}

/// One observed tree.
#[derive(Debug)]
pub struct Observation {
    root: NodeRef,
    kind: ScopeKind,
    observer: Option<ObserverId>,
    buffer: MutationBuffer,
}

impl Observation {
    pub fn attach(
        dom: &mut Dom,
        root: NodeRef,
        kind: ScopeKind,
        root_id: Option<NodeId>,
        max_deferred_flushes: u32,
    ) -> Result<Self, DomError> {
        let observer = dom.observe(root)?;
        Ok(Self {
            root,
            kind,
            observer: Some(observer),
            buffer: MutationBuffer::new(root, root_id, max_deferred_flushes),
        })
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn buffer(&self) -> &MutationBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut MutationBuffer {
        &mut self.buffer
    }

    /// Move the native batch queued so far into the buffer, grouping intact.
    pub fn deliver(&mut self, dom: &mut Dom, mirror: &Mirror) {
        let Some(observer) = self.observer else {
            return;
        };
        let records = dom.take_records(observer);
        if !records.is_empty() {
            self.buffer.ingest(dom, mirror, records);
        }
    }

    /// Undo the registration. Only the first call does anything.
    pub fn detach(&mut self, dom: &mut Dom) -> bool {
        match self.observer.take() {
            Some(observer) => {
                dom.disconnect(observer);
                true
            }
            None => false,
        }
    }
}

pub struct ObservationLayer {
    observations: Vec<Observation>,
    producers: Vec<Box<dyn Producer>>,
    documents: Vec<NodeRef>,
    max_deferred_flushes: u32,
    frozen: bool,
}

impl ObservationLayer {
    pub fn new(producers: Vec<Box<dyn Producer>>, max_deferred_flushes: u32) -> Self {
        Self {
            observations: Vec::new(),
            producers,
            documents: Vec::new(),
            max_deferred_flushes,
            frozen: false,
        }
    }

    pub fn is_observing(&self, root: NodeRef) -> bool {
        self.observations.iter().any(|o| o.root == root)
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Start observing `root`. Returns `Ok(false)` when it already is.
    pub fn observe_root(
        &mut self,
        dom: &mut Dom,
        root: NodeRef,
        kind: ScopeKind,
        root_id: Option<NodeId>,
    ) -> Result<bool, DomError> {
        if self.is_observing(root) {
            return Ok(false);
        }
        let mut observation =
            Observation::attach(dom, root, kind, root_id, self.max_deferred_flushes)?;
        if self.frozen {
            observation.buffer.freeze();
        }
        log::debug!(target: "record.observer", "observing {root:?} as {kind:?}");
        self.observations.push(observation);
        if kind != ScopeKind::Shadow {
            self.documents.push(root);
            for producer in &mut self.producers {
                producer.observe(dom, root);
            }
        }
        Ok(true)
    }

    /// Stop observing every root matching `kind`, dropping whatever they had pending.
    pub fn release_scopes(&mut self, dom: &mut Dom, kind: ScopeKind) {
        let mut kept = Vec::with_capacity(self.observations.len());
        for mut observation in std::mem::take(&mut self.observations) {
            if observation.kind == kind {
                observation.detach(dom);
                self.forget_document(observation.root);
            } else {
                kept.push(observation);
            }
        }
        self.observations = kept;
    }

    /// Stop observing `root` alone. Returns whether it was observed.
    pub fn release_root(&mut self, dom: &mut Dom, root: NodeRef) -> bool {
        let Some(pos) = self.observations.iter().position(|o| o.root == root) else {
            return false;
        };
        let mut observation = self.observations.remove(pos);
        observation.detach(dom);
        self.forget_document(root);
        log::debug!(target: "record.observer", "released {root:?}");
        true
    }

    fn forget_document(&mut self, root: NodeRef) {
        if let Some(pos) = self.documents.iter().position(|d| *d == root) {
            self.documents.remove(pos);
            for producer in &mut self.producers {
                producer.unobserve(root);
            }
        }
    }

    /// Queue the current children of `root` as additions. For roots whose content was
    /// built before their observer existed (a shadow root attached between turns).
    pub fn seed(&mut self, dom: &Dom, mirror: &Mirror, root: NodeRef) {
        let added = dom.children(root).to_vec();
        if added.is_empty() {
            return;
        }
        let Some(observation) = self.observations.iter_mut().find(|o| o.root == root) else {
            return;
        };
        observation.buffer.ingest(
            dom,
            mirror,
            vec![MutationRecord::ChildList {
                target: root,
                added,
                removed: Vec::new(),
                previous_sibling: None,
                next_sibling: None,
            }],
        );
    }

    pub fn deliver_all(&mut self, dom: &mut Dom, mirror: &Mirror) {
        for observation in &mut self.observations {
            observation.deliver(dom, mirror);
        }
    }

    /// Flush every buffer in observation order.
    pub fn flush_all(
        &mut self,
        dom: &Dom,
        mirror: &mut Mirror,
        hooks: &mut dyn SerializeHooks,
    ) -> Vec<MutationData> {
        let mut payloads = Vec::new();
        for observation in &mut self.observations {
            if let Some(data) = observation.buffer.flush(dom, mirror, hooks) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Freeze every buffer, including ones for roots observed later.
    pub fn freeze_all(&mut self) {
        self.frozen = true;
        for observation in &mut self.observations {
            observation.buffer.freeze();
        }
    }

    pub fn unfreeze_all(&mut self) {
        self.frozen = false;
        for observation in &mut self.observations {
            observation.buffer.unfreeze();
        }
    }

    pub fn any_frozen(&self) -> bool {
        self.frozen || self.observations.iter().any(|o| o.buffer.is_frozen())
    }

    pub fn lock_all(&mut self) {
        for observation in &mut self.observations {
            observation.buffer.lock();
        }
    }

    pub fn unlock_all(&mut self) {
        for observation in &mut self.observations {
            observation.buffer.unlock();
        }
    }

    pub fn rebase_all(&mut self) {
        for observation in &mut self.observations {
            observation.buffer.rebase();
        }
    }

    pub fn take_resync_request(&mut self) -> bool {
        let mut requested = false;
        for observation in &mut self.observations {
            requested |= observation.buffer.take_resync_request();
        }
        requested
    }

    pub fn take_anomalies(&mut self) -> Vec<RecordError> {
        let mut out = Vec::new();
        for observation in &mut self.observations {
            out.extend(observation.buffer.take_anomalies());
        }
        out
    }

    pub fn drain_producers(&mut self, dom: &Dom, mirror: &Mirror, out: &mut dyn Emit) {
        for producer in &mut self.producers {
            producer.drain(dom, mirror, out);
        }
    }

    /// Detach every observer. Safe to call more than once.
    pub fn dispose(&mut self, dom: &mut Dom) -> usize {
        let mut detached = 0;
        for mut observation in self.observations.drain(..) {
            if observation.detach(dom) {
                detached += 1;
            }
        }
        for document in std::mem::take(&mut self.documents) {
            for producer in &mut self.producers {
                producer.unobserve(document);
            }
        }
        detached
    }
}

/// Pass-through producer over host-observed interaction events.
pub struct HostEventProducer {
    rx: Receiver<HostEvent>,
    documents: Vec<NodeRef>,
}

impl HostEventProducer {
    pub fn new(rx: Receiver<HostEvent>) -> Self {
        Self {
            rx,
            documents: Vec::new(),
        }
    }

    fn node_id(&self, dom: &Dom, mirror: &Mirror, node: NodeRef) -> Option<NodeId> {
        let owner = dom.owner_document(node)?;
        if !self.documents.contains(&owner) {
            return None;
        }
        mirror.get_id(node)
    }

    fn translate(&self, dom: &Dom, mirror: &Mirror, event: HostEvent) -> Option<IncrementalData> {
        let data = match event {
            HostEvent::PointerMove {
                stream,
                target,
                x,
                y,
                time_offset,
            } => IncrementalData::PointerMove(PointerMoveData {
                stream,
                positions: vec![PointerPosition {
                    x,
                    y,
                    id: self.node_id(dom, mirror, target)?,
                    time_offset,
                }],
            }),
            HostEvent::MouseInteraction { target, kind, x, y } => {
                IncrementalData::MouseInteraction(MouseInteractionData {
                    kind,
                    id: self.node_id(dom, mirror, target)?,
                    x,
                    y,
                })
            }
            HostEvent::Scroll { target, x, y } => IncrementalData::Scroll(ScrollData {
                id: self.node_id(dom, mirror, target)?,
                x,
                y,
            }),
            HostEvent::ViewportResize { width, height } => {
                IncrementalData::ViewportResize(ViewportResizeData { width, height })
            }
            HostEvent::Input {
                target,
                text,
                is_checked,
            } => IncrementalData::Input(InputData {
                id: self.node_id(dom, mirror, target)?,
                text,
                is_checked,
            }),
            HostEvent::MediaInteraction {
                target,
                kind,
                current_time,
                volume,
                muted,
                playback_rate,
            } => IncrementalData::MediaInteraction(MediaInteractionData {
                kind,
                id: self.node_id(dom, mirror, target)?,
                current_time,
                volume,
                muted,
                playback_rate,
            }),
            HostEvent::Selection { ranges } => {
                let mut out = Vec::with_capacity(ranges.len());
                for range in ranges {
                    out.push(SelectionRangeData {
                        start: self.node_id(dom, mirror, range.start)?,
                        start_offset: range.start_offset,
                        end: self.node_id(dom, mirror, range.end)?,
                        end_offset: range.end_offset,
                    });
                }
                IncrementalData::Selection(SelectionData { ranges: out })
            }
            HostEvent::Font {
                family,
                source,
                buffer,
            } => IncrementalData::Font(FontData {
                family,
                font_source: source,
                buffer,
            }),
            HostEvent::CustomElement { name } => IncrementalData::CustomElement(CustomElementData {
                define: CustomElementDefine { name },
            }),
            HostEvent::StyleSheetRule {
                owner,
                adds,
                removes,
            } => IncrementalData::StyleSheetRule(StyleSheetRuleData {
                id: Some(self.node_id(dom, mirror, owner)?),
                style_id: None,
                adds: adds
                    .into_iter()
                    .map(|(rule, index)| RuleAdd { rule, index })
                    .collect(),
                removes: removes.into_iter().map(|index| RuleRemove { index }).collect(),
            }),
            HostEvent::StyleDeclaration {
                owner,
                index,
                property,
                value,
                priority,
            } => {
                let id = Some(self.node_id(dom, mirror, owner)?);
                let (set, remove) = match value {
                    Some(value) => (
                        Some(DeclarationSet {
                            property,
                            value: Some(value),
                            priority,
                        }),
                        None,
                    ),
                    None => (None, Some(DeclarationRemove { property })),
                };
                IncrementalData::StyleDeclaration(StyleDeclarationData {
                    id,
                    style_id: None,
                    index,
                    set,
                    remove,
                })
            }
        };
        Some(data)
    }
}

impl Producer for HostEventProducer {
    fn name(&self) -> &'static str {
        "host-events"
    }

    fn observe(&mut self, _dom: &Dom, document: NodeRef) {
        if !self.documents.contains(&document) {
            self.documents.push(document);
        }
    }

    fn unobserve(&mut self, document: NodeRef) {
        self.documents.retain(|d| *d != document);
    }

    fn drain(&mut self, dom: &Dom, mirror: &Mirror, out: &mut dyn Emit) {
        let events: Vec<HostEvent> = self.rx.try_iter().collect();
        for event in events {
            match self.translate(dom, mirror, event) {
                Some(data) => out.emit(data),
                None => log::trace!(target: "record.observer", "dropping host event for untracked node"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DocumentScope, NoHooks, Snapshotter, TreeSnapshotter};
    use bus::host_channels;
    use core_types::MouseInteractionKind;
    use url::Url;

    fn page() -> (Dom, NodeRef, NodeRef, Mirror) {
        let mut dom = Dom::new();
        let doc = dom.create_document(Url::parse("https://example.com/").expect("url"));
        let body = dom.create_element("body");
        dom.append_child(doc, body).expect("body");
        let mut mirror = Mirror::new();
        TreeSnapshotter
            .snapshot(&dom, doc, DocumentScope::Top, &mut mirror, &mut NoHooks)
            .expect("snapshot");
        (dom, doc, body, mirror)
    }

    #[test]
    fn dispose_detaches_exactly_once() {
        let (mut dom, doc, body, mirror) = page();
        let mut layer = ObservationLayer::new(Vec::new(), 3);
        assert!(layer.observe_root(&mut dom, doc, ScopeKind::Document, None).expect("observe"));
        assert!(!layer.observe_root(&mut dom, doc, ScopeKind::Document, None).expect("again"));
        assert_eq!(layer.dispose(&mut dom), 1);
        assert_eq!(layer.dispose(&mut dom), 0);

        dom.set_attribute(body, "class", "x").expect("attr");
        assert!(!dom.has_pending_records());
        layer.deliver_all(&mut dom, &mirror);
        assert!(layer.observations().is_empty());
    }

    #[test]
    fn release_scopes_drops_only_matching_kind() {
        let (mut dom, doc, body, _mirror) = page();
        let root = dom.attach_shadow(body).expect("shadow");
        let mut layer = ObservationLayer::new(Vec::new(), 3);
        layer.observe_root(&mut dom, doc, ScopeKind::Document, None).expect("doc");
        layer.observe_root(&mut dom, root, ScopeKind::Shadow, None).expect("shadow");
        layer.release_scopes(&mut dom, ScopeKind::Shadow);
        assert!(layer.is_observing(doc));
        assert!(!layer.is_observing(root));
    }

    #[test]
    fn release_root_forgets_one_document() {
        let (mut dom, doc, _body, _mirror) = page();
        let inner = dom.create_document(Url::parse("https://example.com/inner").expect("url"));
        let mut layer = ObservationLayer::new(Vec::new(), 3);
        layer.observe_root(&mut dom, doc, ScopeKind::Document, None).expect("doc");
        layer.observe_root(&mut dom, inner, ScopeKind::Frame, None).expect("frame");
        assert!(layer.release_root(&mut dom, inner));
        assert!(!layer.release_root(&mut dom, inner));
        assert!(layer.is_observing(doc));
        assert_eq!(layer.observations().len(), 1);

        let div = dom.create_element("div");
        dom.append_child(inner, div).expect("add");
        assert!(!dom.has_pending_records());
    }

    #[test]
    fn host_events_resolve_ids_and_drop_untracked() {
        let (mut dom, doc, body, mirror) = page();
        let (host, recorder) = host_channels();
        let mut layer = ObservationLayer::new(vec![Box::new(HostEventProducer::new(recorder.events_rx))], 3);
        layer.observe_root(&mut dom, doc, ScopeKind::Document, None).expect("observe");

        let stray = dom.create_element("div");
        host.events_tx
            .send(HostEvent::MouseInteraction {
                target: body,
                kind: MouseInteractionKind::Click,
                x: Some(1.0),
                y: Some(2.0),
            })
            .expect("send");
        host.events_tx
            .send(HostEvent::Scroll { target: stray, x: 0.0, y: 10.0 })
            .expect("send");
        host.events_tx
            .send(HostEvent::ViewportResize { width: 800, height: 600 })
            .expect("send");

        let mut out: Vec<IncrementalData> = Vec::new();
        layer.drain_producers(&dom, &mirror, &mut out);
        assert_eq!(out.len(), 2);
        match &out[0] {
            IncrementalData::MouseInteraction(data) => {
                assert_eq!(Some(data.id), mirror.get_id(body));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(out[1], IncrementalData::ViewportResize(_)));
    }
}
