//! Channels between the host page and the recorder.
//!
//! Hosts push already-observed interaction events (`HostEvent`) and canvas calls
//! (`CanvasCall`) through a `HostBus`; child frames post `FrameMessage`s to their parent
//! window. Everything is a plain `std::sync::mpsc` channel drained on the recorder's
//! turn, so senders never block and nothing is delivered re-entrantly.

use core_types::{CanvasContext, FrameKey, MediaInteractionKind, MouseInteractionKind, PointerStream};
use dom::NodeRef;
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};

/// Tag carried by every cross-frame recorder message.
pub const FRAME_MESSAGE_KIND: &str = "rrweb";

#[derive(Clone, Debug)]
pub struct SelectionRange {
    pub start: NodeRef,
    pub start_offset: u32,
    pub end: NodeRef,
    pub end_offset: u32,
}

#[derive(Clone, Debug)]
pub enum HostEvent {
    PointerMove {
        stream: PointerStream,
        target: NodeRef,
        x: f64,
        y: f64,
        time_offset: i64,
    },
    MouseInteraction {
        target: NodeRef,
        kind: MouseInteractionKind,
        x: Option<f64>,
        y: Option<f64>,
    },
    Scroll {
        target: NodeRef,
        x: f64,
        y: f64,
    },
    ViewportResize {
        width: u32,
        height: u32,
    },
    Input {
        target: NodeRef,
        text: String,
        is_checked: bool,
    },
    MediaInteraction {
        target: NodeRef,
        kind: MediaInteractionKind,
        current_time: Option<f64>,
        volume: Option<f64>,
        muted: Option<bool>,
        playback_rate: Option<f64>,
    },
    Selection {
        ranges: Vec<SelectionRange>,
    },
    Font {
        family: String,
        source: String,
        buffer: bool,
    },
    CustomElement {
        name: String,
    },
    StyleSheetRule {
        owner: NodeRef,
        adds: Vec<(String, Option<u32>)>,
        removes: Vec<u32>,
    },
    StyleDeclaration {
        owner: NodeRef,
        index: Vec<u32>,
        property: String,
        value: Option<String>,
        priority: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct CanvasCall {
    pub canvas: NodeRef,
    pub context: CanvasContext,
    pub property: String,
    pub args: Vec<serde_json::Value>,
    pub setter: bool,
}

/// Host side of the producer channels.
pub struct HostBus {
    pub events_tx: Sender<HostEvent>,
    pub canvas_tx: Sender<CanvasCall>,
}

/// Recorder side of the producer channels.
pub struct RecorderBus {
    pub events_rx: Receiver<HostEvent>,
    pub canvas_rx: Receiver<CanvasCall>,
}

pub fn host_channels() -> (HostBus, RecorderBus) {
    let (events_tx, events_rx) = mpsc::channel();
    let (canvas_tx, canvas_rx) = mpsc::channel();
    (
        HostBus {
            events_tx,
            canvas_tx,
        },
        RecorderBus {
            events_rx,
            canvas_rx,
        },
    )
}

/// Payload a child frame posts to its parent window.
#[derive(Clone, Debug, Serialize)]
pub struct FrameMessage<E> {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: E,
    pub origin: String,
    #[serde(rename = "isCheckout", skip_serializing_if = "Option::is_none")]
    pub is_checkout: Option<bool>,
}

impl<E> FrameMessage<E> {
    pub fn new(event: E, origin: String, is_checkout: Option<bool>) -> Self {
        Self {
            kind: FRAME_MESSAGE_KIND.to_string(),
            event,
            origin,
            is_checkout,
        }
    }

    pub fn is_recorder_message(&self) -> bool {
        self.kind == FRAME_MESSAGE_KIND
    }
}

/// A message as received by the parent window.
#[derive(Clone, Debug)]
pub struct PostedMessage<E> {
    pub source: FrameKey,
    pub target_origin: String,
    pub data: FrameMessage<E>,
}

/// A child frame's handle on its parent window.
pub struct FramePort<E> {
    source: FrameKey,
    tx: Sender<PostedMessage<E>>,
}

impl<E> FramePort<E> {
    pub fn source(&self) -> FrameKey {
        self.source
    }

    /// Post to the parent. Returns `false` if the parent window is gone.
    pub fn post(&self, data: FrameMessage<E>, target_origin: &str) -> bool {
        self.tx
            .send(PostedMessage {
                source: self.source,
                target_origin: target_origin.to_string(),
                data,
            })
            .is_ok()
    }
}

/// Parent window inbox shared by all of its child frames.
pub struct ParentWindow<E> {
    tx: Sender<PostedMessage<E>>,
    rx: Receiver<PostedMessage<E>>,
}

impl<E> ParentWindow<E> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn port_for(&self, source: FrameKey) -> FramePort<E> {
        FramePort {
            source,
            tx: self.tx.clone(),
        }
    }

    pub fn drain(&self) -> Vec<PostedMessage<E>> {
        self.rx.try_iter().collect()
    }
}

impl<E> Default for ParentWindow<E> {
    fn default() -> Self {
        Self::new()
    }
}
