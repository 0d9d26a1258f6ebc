//! Recording session: owns every piece of recorder state and drives it from host turns.

use crate::bridges::{
    CanvasManager, Discoveries, IframeManager, ShadowDomManager, StylesheetManager,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{ErrorHandler, RecordError};
use crate::events::{
    CustomData, Event, EventData, FullSnapshotData, IncrementalData, MetaData, MutationData,
    PluginData, ScrollOffset,
};
use crate::frame::{self, EmitMode, FrameEnv};
use crate::mirror::Mirror;
use crate::mutation::BufferState;
use crate::observer::{HostEventProducer, ObservationLayer, Producer, ScopeKind};
use crate::options::{RecordAfter, RecordOptions};
use crate::pipeline::{CheckpointCounters, EventProcessor, EventSink, PackFn, Pipeline};
use crate::snapshot::{DocumentScope, Snapshotter, TreeSnapshotter};
use bus::{PostedMessage, RecorderBus};
use core_types::NodeId;
use dom::{Dom, DomError, Lifecycle, NodeRef, ReadyState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderStatus {
    /// Started before the document was ready; waiting for `record_after`.
    Waiting,
    Recording,
    Stopped,
}

/// Collaborators handed to [`Recorder::start`].
pub struct RecorderParts {
    sink: Option<Box<dyn EventSink>>,
    plugins: Vec<Box<dyn EventProcessor>>,
    pack: Option<PackFn>,
    snapshotter: Box<dyn Snapshotter>,
    producers: Vec<Box<dyn Producer>>,
    frame: FrameEnv,
    clock: Box<dyn Clock>,
    bus: Option<RecorderBus>,
    error_handler: Option<Box<dyn ErrorHandler>>,
}

impl Default for RecorderParts {
    fn default() -> Self {
        Self {
            sink: None,
            plugins: Vec::new(),
            pack: None,
            snapshotter: Box::new(TreeSnapshotter),
            producers: Vec::new(),
            frame: FrameEnv::Top,
            clock: Box::new(SystemClock),
            bus: None,
            error_handler: None,
        }
    }
}

impl RecorderParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn plugin(mut self, plugin: impl EventProcessor + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn pack(mut self, pack: impl FnMut(&Event) -> String + 'static) -> Self {
        self.pack = Some(Box::new(pack));
        self
    }

    pub fn snapshotter(mut self, snapshotter: impl Snapshotter + 'static) -> Self {
        self.snapshotter = Box::new(snapshotter);
        self
    }

    pub fn producer(mut self, producer: impl Producer + 'static) -> Self {
        self.producers.push(Box::new(producer));
        self
    }

    pub fn frame(mut self, frame: FrameEnv) -> Self {
        self.frame = frame;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Host channels for interaction events and canvas calls.
    pub fn bus(mut self, bus: RecorderBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Called with every anomaly the session skipped over.
    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Some(Box::new(handler));
        self
    }
}

pub struct Recorder {
    document: NodeRef,
    options: RecordOptions,
    status: RecorderStatus,
    /// Lifecycle events are only reported when recording started early.
    lifecycle_listening: bool,
    mirror: Mirror,
    layer: ObservationLayer,
    iframes: IframeManager,
    shadows: ShadowDomManager,
    stylesheets: StylesheetManager,
    snapshotter: Box<dyn Snapshotter>,
    pipeline: Pipeline,
    error_handler: Option<Box<dyn ErrorHandler>>,
    /// Whether a full snapshot ever succeeded.
    has_baseline: bool,
    in_batch: bool,
    checkout_pending: bool,
    snapshotting: bool,
}

impl Recorder {
    /// Start recording `document`.
    ///
    /// A document that is already interactive is snapshotted and observed right away;
    /// otherwise the session waits for the lifecycle event named by `record_after`.
    /// A same-origin child frame is left to its parent's recorder and the returned
    /// session is already stopped.
    pub fn start(
        dom: &mut Dom,
        document: NodeRef,
        options: RecordOptions,
        parts: RecorderParts,
    ) -> Result<Self, RecordError> {
        options.validate()?;
        let url = dom
            .url(document)
            .cloned()
            .ok_or(RecordError::Dom(DomError::WrongNodeKind(document)))?;
        let mode = frame::probe(parts.frame, &url, options.record_cross_origin_iframes);
        if mode.is_emitting() && parts.sink.is_none() {
            return Err(RecordError::MissingSink);
        }
        let silent = matches!(mode, EmitMode::Silent);

        let mut producers = parts.producers;
        if let Some(bus) = parts.bus {
            producers.push(Box::new(HostEventProducer::new(bus.events_rx)));
            producers.push(Box::new(CanvasManager::new(bus.canvas_rx, options.record_canvas)));
        }
        let pipeline = Pipeline::new(
            mode,
            parts.sink,
            parts.clock,
            options.checkout_every_nth,
            options.checkout_every_nms,
        )
        .with_plugins(parts.plugins)
        .with_pack(parts.pack);

        let stale = dom.take_notifications();
        if !stale.is_empty() {
            log::debug!(target: "record.recorder", "discarding notifications queued before start");
        }

        let mut recorder = Self {
            document,
            layer: ObservationLayer::new(producers, options.max_deferred_flushes),
            iframes: IframeManager::new(options.record_cross_origin_iframes),
            options,
            status: RecorderStatus::Waiting,
            lifecycle_listening: false,
            mirror: Mirror::new(),
            shadows: ShadowDomManager::new(),
            stylesheets: StylesheetManager::new(),
            snapshotter: parts.snapshotter,
            pipeline,
            error_handler: parts.error_handler,
            has_baseline: false,
            in_batch: false,
            checkout_pending: false,
            snapshotting: false,
        };
        if silent {
            recorder.status = RecorderStatus::Stopped;
            return Ok(recorder);
        }
        match dom.ready_state(document) {
            Some(ReadyState::Interactive | ReadyState::Complete) => recorder.init(dom),
            _ => {
                log::debug!(
                    target: "record.recorder",
                    "document still loading; recording after {:?}",
                    recorder.options.record_after
                );
                recorder.lifecycle_listening = true;
            }
        }
        Ok(recorder)
    }

    pub fn status(&self) -> RecorderStatus {
        self.status
    }

    pub fn options(&self) -> &RecordOptions {
        &self.options
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn counters(&self) -> CheckpointCounters {
        self.pipeline.counters()
    }

    /// State of every mutation buffer, in observation order.
    pub fn buffer_states(&self) -> Vec<BufferState> {
        self.layer
            .observations()
            .iter()
            .map(|o| o.buffer().state())
            .collect()
    }

    pub fn is_observing(&self, root: NodeRef) -> bool {
        self.layer.is_observing(root)
    }

    /// One host turn: notifications, then each native batch, then producers.
    pub fn pump(&mut self, dom: &mut Dom) -> Result<(), RecordError> {
        if self.status == RecorderStatus::Stopped {
            return Err(RecordError::NotRecording("pump"));
        }
        let notes = dom.take_notifications();
        for (document, lifecycle) in notes.lifecycle {
            if document != self.document || !self.lifecycle_listening {
                continue;
            }
            let (data, trigger) = match lifecycle {
                Lifecycle::DomContentLoaded => {
                    (EventData::DomContentLoaded, RecordAfter::DomContentLoaded)
                }
                Lifecycle::Load => (EventData::Load, RecordAfter::Load),
            };
            self.emit(dom, data, false);
            if self.status == RecorderStatus::Waiting && self.options.record_after == trigger {
                self.init(dom);
            }
        }
        if self.status != RecorderStatus::Recording {
            return Ok(());
        }
        if self.options.record_dom && !self.has_baseline {
            // Without a baseline nothing incremental can be addressed; retry every turn.
            self.full_snapshot(dom, true);
        }

        for iframe in notes.frame_loads {
            if self.iframes.is_tracked(iframe) {
                self.attach_iframe(dom, iframe);
            }
        }
        for (host, root) in notes.shadow_attached {
            // Hosts not serialized yet report their shadow root when they are.
            if !self.mirror.has(host) || self.shadows.is_tracked(root) {
                continue;
            }
            self.add_shadow_root(dom, host, root, true);
        }
        for link in notes.sheet_loads {
            if let Some(data) = self.stylesheets.attach_link_element(dom, &self.mirror, link) {
                self.emit(dom, mutation(data), false);
            }
        }
        for root in notes.adoptions {
            self.adopt_sheets(dom, root);
        }

        self.layer.deliver_all(dom, &self.mirror);
        self.flush_mutations(dom);

        let mut produced: Vec<IncrementalData> = Vec::new();
        self.layer.drain_producers(dom, &self.mirror, &mut produced);
        for data in produced {
            self.emit(dom, EventData::Incremental(data), false);
        }
        Ok(())
    }

    /// Hold back mutation payloads. Changes keep accumulating and are coalesced into
    /// one payload per buffer on unfreeze.
    pub fn freeze(&mut self) -> Result<(), RecordError> {
        self.ensure_recording("freeze")?;
        self.layer.freeze_all();
        Ok(())
    }

    pub fn unfreeze(&mut self, dom: &mut Dom) -> Result<(), RecordError> {
        self.ensure_recording("unfreeze")?;
        self.layer.unfreeze_all();
        self.layer.deliver_all(dom, &self.mirror);
        self.flush_mutations(dom);
        Ok(())
    }

    pub fn take_full_snapshot(&mut self, dom: &mut Dom, is_checkout: bool) -> Result<(), RecordError> {
        self.ensure_recording("take_full_snapshot")?;
        self.full_snapshot(dom, is_checkout);
        Ok(())
    }

    pub fn add_custom_event(
        &mut self,
        dom: &mut Dom,
        tag: &str,
        payload: serde_json::Value,
    ) -> Result<(), RecordError> {
        self.ensure_recording("add_custom_event")?;
        let data = EventData::Custom(CustomData {
            tag: tag.to_string(),
            payload,
        });
        self.emit(dom, data, false);
        Ok(())
    }

    pub fn add_plugin_event(
        &mut self,
        dom: &mut Dom,
        plugin: &str,
        payload: serde_json::Value,
    ) -> Result<(), RecordError> {
        self.ensure_recording("add_plugin_event")?;
        let data = EventData::Plugin(PluginData {
            plugin: plugin.to_string(),
            payload,
        });
        self.emit(dom, data, false);
        Ok(())
    }

    /// Parent side of the cross-origin relay. Returns whether the message produced a
    /// local event.
    pub fn handle_frame_message(
        &mut self,
        dom: &mut Dom,
        message: PostedMessage<Event>,
    ) -> Result<bool, RecordError> {
        self.ensure_recording("handle_frame_message")?;
        let Some((data, is_checkout)) =
            self.iframes
                .relay(dom, &mut self.mirror, &mut self.stylesheets, message)
        else {
            return Ok(false);
        };
        self.emit(dom, data, is_checkout);
        Ok(true)
    }

    /// Detach every observer and drop whatever was pending. Later calls do nothing.
    pub fn stop(&mut self, dom: &mut Dom) {
        if self.status == RecorderStatus::Stopped {
            return;
        }
        let detached = self.layer.dispose(dom);
        self.status = RecorderStatus::Stopped;
        log::debug!(target: "record.recorder", "stopped; detached {detached} observers");
    }

    fn ensure_recording(&self, op: &'static str) -> Result<(), RecordError> {
        match self.status {
            RecorderStatus::Recording => Ok(()),
            _ => Err(RecordError::NotRecording(op)),
        }
    }

    fn init(&mut self, dom: &mut Dom) {
        self.status = RecorderStatus::Recording;
        self.full_snapshot(dom, false);
    }

    fn full_snapshot(&mut self, dom: &mut Dom, is_checkout: bool) {
        if !self.options.record_dom {
            return;
        }
        if self.snapshotting {
            log::debug!(target: "record.snapshot", "snapshot already in progress");
            return;
        }
        self.snapshotting = true;
        let viewport = dom.viewport(self.document).unwrap_or_default();
        let href = dom.url(self.document).map(|u| u.to_string()).unwrap_or_default();
        self.emit(
            dom,
            EventData::Meta(MetaData {
                href,
                width: viewport.width,
                height: viewport.height,
            }),
            is_checkout,
        );

        self.layer.deliver_all(dom, &self.mirror);
        self.stylesheets.reset();
        self.shadows.reset(dom, &mut self.layer);
        self.layer.lock_all();
        let mut found = Discoveries::default();
        let snapshot = self.snapshotter.snapshot(
            dom,
            self.document,
            DocumentScope::Top,
            &mut self.mirror,
            &mut found,
        );
        let Some(node) = snapshot else {
            log::warn!(target: "record.snapshot", "failed to serialize {:?}; skipping full snapshot", self.document);
            self.layer.unlock_all();
            self.snapshotting = false;
            self.observe_document(dom);
            self.report(RecordError::SnapshotFailed(self.document));
            return;
        };
        self.layer.rebase_all();
        self.has_baseline = true;
        self.observe_document(dom);
        log::debug!(
            target: "record.snapshot",
            "full snapshot of {} nodes (checkout: {is_checkout})",
            node.count()
        );
        self.emit(
            dom,
            EventData::FullSnapshot(FullSnapshotData {
                node,
                initial_offset: ScrollOffset {
                    left: viewport.scroll_left,
                    top: viewport.scroll_top,
                },
            }),
            is_checkout,
        );
        self.handle_discoveries(dom, found);
        self.layer.unlock_all();
        self.snapshotting = false;

        self.flush_mutations(dom);
        self.adopt_sheets(dom, self.document);
    }

    /// Flush every buffer and emit the payloads as one batch. Checkouts that come due
    /// inside the batch run once it is complete.
    fn flush_mutations(&mut self, dom: &mut Dom) {
        let mut found = Discoveries::default();
        let payloads = self.layer.flush_all(dom, &mut self.mirror, &mut found);
        self.in_batch = true;
        for data in payloads {
            self.emit(dom, mutation(data), false);
        }
        self.in_batch = false;
        if !found.is_empty() {
            self.handle_discoveries(dom, found);
        }
        for error in self.layer.take_anomalies() {
            self.report(error);
        }
        for document in self.iframes.prune(dom, &self.mirror) {
            self.layer.release_root(dom, document);
        }
        let resync = self.layer.take_resync_request();
        if std::mem::take(&mut self.checkout_pending) || resync {
            self.full_snapshot(dom, true);
        }
    }

    fn handle_discoveries(&mut self, dom: &mut Dom, found: Discoveries) {
        for (host, root) in found.shadow_roots {
            self.add_shadow_root(dom, host, root, false);
        }
        for link in found.links {
            self.stylesheets.track_link(link);
        }
        for iframe in found.iframes {
            self.iframes.add_iframe(iframe);
            if dom.content_document(iframe).is_some() {
                self.attach_iframe(dom, iframe);
            }
        }
    }

    fn add_shadow_root(&mut self, dom: &mut Dom, host: NodeRef, root: NodeRef, seed: bool) {
        let root_id = self.root_id_for(dom, host);
        match self
            .shadows
            .add_shadow_root(dom, &mut self.layer, root, root_id)
        {
            Ok(true) => {
                if seed {
                    self.layer.seed(dom, &self.mirror, root);
                }
                self.adopt_sheets(dom, root);
            }
            Ok(false) => {}
            Err(source) => {
                log::warn!(target: "record.observer", "cannot observe shadow root of {host:?}: {source}");
                self.report(RecordError::ObserveFailed { root, source });
            }
        }
    }

    fn attach_iframe(&mut self, dom: &mut Dom, iframe: NodeRef) {
        let previous = self.iframes.document_of(iframe);
        let mut found = Discoveries::default();
        let Some((document, data)) = self.iframes.attach(
            dom,
            &mut self.mirror,
            self.snapshotter.as_mut(),
            iframe,
            &mut found,
        ) else {
            return;
        };
        if let Some(old) = previous.filter(|old| *old != document) {
            self.layer.release_root(dom, old);
        }
        let root_id = self.mirror.get_id(document);
        if let Err(source) = self
            .layer
            .observe_root(dom, document, ScopeKind::Frame, root_id)
        {
            log::warn!(target: "record.iframe", "cannot observe {document:?}: {source}");
            self.report(RecordError::ObserveFailed {
                root: document,
                source,
            });
        }
        self.emit(dom, mutation(data), false);
        self.handle_discoveries(dom, found);
        self.adopt_sheets(dom, document);
    }

    fn adopt_sheets(&mut self, dom: &mut Dom, root: NodeRef) {
        if let Some(data) = self.stylesheets.adopt_style_sheets(dom, &self.mirror, root) {
            self.emit(dom, EventData::Incremental(IncrementalData::AdoptedStyleSheet(data)), false);
        }
    }

    fn observe_document(&mut self, dom: &mut Dom) {
        if let Err(source) =
            self.layer
                .observe_root(dom, self.document, ScopeKind::Document, None)
        {
            log::warn!(target: "record.observer", "cannot observe {:?}: {source}", self.document);
            self.report(RecordError::ObserveFailed {
                root: self.document,
                source,
            });
        }
    }

    fn report(&mut self, error: RecordError) {
        if let Some(handler) = self.error_handler.as_mut() {
            handler.handle(&error);
        }
    }

    /// Id stamped as `rootId` on nodes living inside an iframe document.
    fn root_id_for(&self, dom: &Dom, node: NodeRef) -> Option<NodeId> {
        let owner = dom.owner_document(node)?;
        if owner == self.document {
            None
        } else {
            self.mirror.get_id(owner)
        }
    }

    fn emit(&mut self, dom: &mut Dom, data: EventData, is_checkout: bool) {
        let releases_freeze = !matches!(data, EventData::FullSnapshot(_)) && !data.is_mutation();
        if releases_freeze && self.layer.any_frozen() {
            self.layer.unfreeze_all();
            self.layer.deliver_all(dom, &self.mirror);
            self.flush_mutations(dom);
        }
        if self.pipeline.dispatch(data, is_checkout) {
            if self.snapshotting {
                return;
            }
            if self.in_batch {
                self.checkout_pending = true;
            } else {
                self.full_snapshot(dom, true);
            }
        }
    }
}

fn mutation(data: MutationData) -> EventData {
    EventData::Incremental(IncrementalData::Mutation(data))
}
