use crate::events::{CanvasCommand, CanvasMutationData, IncrementalData};
use crate::mirror::Mirror;
use crate::observer::{Emit, Producer};
use bus::CanvasCall;
use core_types::CanvasContext;
use dom::{Dom, NodeRef};
use std::sync::mpsc::Receiver;

/// Batches canvas drawing calls into one `CanvasMutation` per canvas and context.
pub struct CanvasManager {
    rx: Receiver<CanvasCall>,
    enabled: bool,
    documents: Vec<NodeRef>,
}

impl CanvasManager {
    pub fn new(rx: Receiver<CanvasCall>, enabled: bool) -> Self {
        Self {
            rx,
            enabled,
            documents: Vec::new(),
        }
    }

    fn observed(&self, dom: &Dom, canvas: NodeRef) -> bool {
        dom.owner_document(canvas)
            .is_some_and(|doc| self.documents.contains(&doc))
    }
}

impl Producer for CanvasManager {
    fn name(&self) -> &'static str {
        "canvas"
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
        let calls: Vec<CanvasCall> = self.rx.try_iter().collect();
        if !self.enabled || calls.is_empty() {
            return;
        }
        let mut batches: Vec<(NodeRef, CanvasContext, Vec<CanvasCommand>)> = Vec::new();
        for call in calls {
            if !self.observed(dom, call.canvas) || !mirror.has(call.canvas) {
                continue;
            }
            let command = CanvasCommand {
                property: call.property,
                args: call.args,
                setter: call.setter,
            };
            match batches
                .iter_mut()
                .find(|(canvas, context, _)| *canvas == call.canvas && *context == call.context)
            {
                Some((_, _, commands)) => commands.push(command),
                None => batches.push((call.canvas, call.context, vec![command])),
            }
        }
        for (canvas, context, commands) in batches {
            let Some(id) = mirror.get_id(canvas) else {
                continue;
            };
            out.emit(IncrementalData::CanvasMutation(CanvasMutationData {
                id,
                context,
                commands,
            }));
        }
    }
}
