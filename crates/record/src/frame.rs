//! Where a recorder sits in the frame tree, and what that means for its events.

use crate::events::Event;
use bus::FramePort;
use url::{Origin, Url};

/// Recording frame environment as supplied by the embedder.
pub enum FrameEnv {
    Top,
    Child(ParentFrame),
}

/// A child frame's view of its parent window.
pub struct ParentFrame {
    parent_origin: Origin,
    port: FramePort<Event>,
}

/// Reading the parent document failed because the origins differ.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrossOriginAccess {
    pub parent: String,
    pub own: String,
}

impl std::fmt::Display for CrossOriginAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} may not read the document of {}", self.own, self.parent)
    }
}

impl std::error::Error for CrossOriginAccess {}

impl ParentFrame {
    pub fn new(parent_url: &Url, port: FramePort<Event>) -> Self {
        Self {
            parent_origin: parent_url.origin(),
            port,
        }
    }

    /// Stand-in for touching `window.parent.document`: succeeds only for a
    /// same-origin parent.
    pub fn access_document(&self, own: &Url) -> Result<(), CrossOriginAccess> {
        let own_origin = own.origin();
        if own_origin == self.parent_origin && own_origin.is_tuple() {
            Ok(())
        } else {
            Err(CrossOriginAccess {
                parent: self.parent_origin.ascii_serialization(),
                own: own_origin.ascii_serialization(),
            })
        }
    }
}

/// What the pipeline does with a finished event.
pub enum EmitMode {
    /// Hand events to the local sink.
    Emitting,
    /// Post every event to a cross-origin parent.
    Relay {
        port: FramePort<Event>,
        origin: String,
    },
    /// Same-origin child frame: the parent's recorder already observes this document.
    Silent,
}

impl EmitMode {
    pub fn is_emitting(&self) -> bool {
        matches!(self, EmitMode::Emitting)
    }
}

/// Decide the emit mode once, at recorder start.
pub fn probe(env: FrameEnv, own_url: &Url, record_cross_origin_iframes: bool) -> EmitMode {
    let parent = match env {
        FrameEnv::Top => return EmitMode::Emitting,
        FrameEnv::Child(_) if !record_cross_origin_iframes => return EmitMode::Emitting,
        FrameEnv::Child(parent) => parent,
    };
    match parent.access_document(own_url) {
        Ok(()) => {
            log::debug!(target: "record.frame", "same-origin parent; events stay with the parent recorder");
            EmitMode::Silent
        }
        Err(err) => {
            log::debug!(target: "record.frame", "relaying to parent: {err}");
            EmitMode::Relay {
                port: parent.port,
                origin: own_url.origin().ascii_serialization(),
            }
        }
    }
}
