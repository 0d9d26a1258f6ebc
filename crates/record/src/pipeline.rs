//! Checkpoint and emission pipeline.
//!
//! Every event passes through [`Pipeline::dispatch`]: it is stamped, run through the
//! plugin processors, optionally packed, and handed to the sink (or posted to the
//! parent frame). Afterwards the checkpoint counters are updated and the caller is
//! told whether a checkout snapshot is due.

use crate::clock::Clock;
use crate::events::{Event, EventData, EventType};
use crate::frame::EmitMode;
use bus::FrameMessage;
use core_types::Timestamp;
use serde::Serialize;

/// Version tag carried by packed events.
pub const PACK_VERSION: &str = "v1";

/// What reaches the sink.
#[derive(Clone, Debug, PartialEq)]
pub enum Emitted {
    Event(Event),
    Packed(String),
}

pub trait EventSink {
    fn emit(&mut self, event: Emitted, is_checkout: bool);
}

impl<F: FnMut(Emitted, bool)> EventSink for F {
    fn emit(&mut self, event: Emitted, is_checkout: bool) {
        self(event, is_checkout)
    }
}

/// Ordered event transform, applied before packing.
pub trait EventProcessor {
    fn process(&mut self, event: Event) -> Event;
}

pub type PackFn = Box<dyn FnMut(&Event) -> String>;

#[derive(Serialize)]
struct Packed<'a> {
    v: &'static str,
    #[serde(flatten)]
    event: &'a Event,
}

/// Default packer: the event's JSON with a `"v"` version marker.
pub fn pack_json(event: &Event) -> String {
    match serde_json::to_string(&Packed {
        v: PACK_VERSION,
        event,
    }) {
        Ok(packed) => packed,
        Err(err) => {
            log::warn!(target: "record.pipeline", "failed to pack event: {err}");
            String::new()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckpointCounters {
    pub incremental_since_full: u32,
    pub last_full_timestamp: Timestamp,
}

pub struct Pipeline {
    mode: EmitMode,
    sink: Option<Box<dyn EventSink>>,
    plugins: Vec<Box<dyn EventProcessor>>,
    pack: Option<PackFn>,
    clock: Box<dyn Clock>,
    counters: CheckpointCounters,
    checkout_every_nth: Option<u32>,
    checkout_every_nms: Option<u64>,
}

impl Pipeline {
    pub fn new(
        mode: EmitMode,
        sink: Option<Box<dyn EventSink>>,
        clock: Box<dyn Clock>,
        checkout_every_nth: Option<u32>,
        checkout_every_nms: Option<u64>,
    ) -> Self {
        Self {
            mode,
            sink,
            plugins: Vec::new(),
            pack: None,
            clock,
            counters: CheckpointCounters::default(),
            checkout_every_nth,
            checkout_every_nms,
        }
    }

    pub fn with_plugins(mut self, plugins: Vec<Box<dyn EventProcessor>>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_pack(mut self, pack: Option<PackFn>) -> Self {
        self.pack = pack;
        self
    }

    pub fn counters(&self) -> CheckpointCounters {
        self.counters
    }

    /// Stamp and deliver one event. Returns `true` when a checkout snapshot is due.
    pub fn dispatch(&mut self, data: EventData, is_checkout: bool) -> bool {
        let mut event = Event {
            data,
            timestamp: self.clock.now(),
        };
        let event_type = event.event_type();
        let counts = event_type == EventType::IncrementalSnapshot && !event.data.is_attach_iframe();
        let timestamp = event.timestamp;

        match &mut self.mode {
            EmitMode::Emitting => {
                for plugin in &mut self.plugins {
                    event = plugin.process(event);
                }
                let emitted = match &mut self.pack {
                    Some(pack) => Emitted::Packed(pack(&event)),
                    None => Emitted::Event(event),
                };
                match &mut self.sink {
                    Some(sink) => sink.emit(emitted, is_checkout),
                    None => log::warn!(target: "record.pipeline", "no sink; dropping {event_type:?}"),
                }
            }
            EmitMode::Relay { port, origin } => {
                for plugin in &mut self.plugins {
                    event = plugin.process(event);
                }
                let message = FrameMessage::new(event, origin.clone(), Some(is_checkout));
                if !port.post(message, "*") {
                    log::warn!(target: "record.pipeline", "parent window is gone; dropping {event_type:?}");
                }
            }
            EmitMode::Silent => {}
        }
        log::trace!(target: "record.pipeline", "emitted {event_type:?} at {timestamp}");

        if event_type == EventType::FullSnapshot {
            self.counters = CheckpointCounters {
                incremental_since_full: 0,
                last_full_timestamp: timestamp,
            };
            return false;
        }
        if !counts {
            return false;
        }
        self.counters.incremental_since_full += 1;
        let exceed_count = self
            .checkout_every_nth
            .is_some_and(|nth| self.counters.incremental_since_full >= nth);
        let exceed_time = self.checkout_every_nms.is_some_and(|nms| {
            timestamp.saturating_sub(self.counters.last_full_timestamp) > nms
        });
        exceed_count || exceed_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{
        CustomData, FullSnapshotData, IncrementalData, MutationData, ScrollData, ScrollOffset,
        SerializedKind, SerializedNode,
    };
    use core_types::NodeId;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(Emitted, bool)>>>;

    fn sink(log: &Log) -> Box<dyn EventSink> {
        let log = Rc::clone(log);
        Box::new(move |event: Emitted, checkout: bool| log.borrow_mut().push((event, checkout)))
    }

    fn scroll() -> EventData {
        EventData::Incremental(IncrementalData::Scroll(ScrollData {
            id: NodeId(1),
            x: 0.0,
            y: 0.0,
        }))
    }

    fn full() -> EventData {
        EventData::FullSnapshot(FullSnapshotData {
            node: SerializedNode {
                id: NodeId(1),
                kind: SerializedKind::Document {
                    child_nodes: Vec::new(),
                },
                root_id: None,
                is_shadow: false,
            },
            initial_offset: ScrollOffset::default(),
        })
    }

    #[test]
    fn nth_incremental_event_is_due() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(
            EmitMode::Emitting,
            Some(sink(&log)),
            Box::new(ManualClock::new(0)),
            Some(3),
            None,
        );
        pipeline.dispatch(full(), false);
        assert!(!pipeline.dispatch(scroll(), false));
        assert!(!pipeline.dispatch(scroll(), false));
        assert!(pipeline.dispatch(scroll(), false));
        pipeline.dispatch(full(), true);
        assert_eq!(pipeline.counters().incremental_since_full, 0);
        assert_eq!(log.borrow().len(), 5);
        assert!(log.borrow()[4].1);
    }

    #[test]
    fn attach_iframe_mutations_do_not_count() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(
            EmitMode::Emitting,
            Some(sink(&log)),
            Box::new(ManualClock::new(0)),
            Some(1),
            None,
        );
        let attach = EventData::Incremental(IncrementalData::Mutation(MutationData {
            is_attach_iframe: true,
            ..MutationData::default()
        }));
        assert!(!pipeline.dispatch(attach, false));
        assert_eq!(pipeline.counters().incremental_since_full, 0);
    }

    #[test]
    fn elapsed_time_triggers_checkout() {
        let clock = ManualClock::new(1_000);
        let mut pipeline = Pipeline::new(
            EmitMode::Emitting,
            Some(sink(&Log::default())),
            Box::new(clock.clone()),
            None,
            Some(500),
        );
        pipeline.dispatch(full(), false);
        clock.advance(500);
        assert!(!pipeline.dispatch(scroll(), false));
        clock.advance(1);
        assert!(pipeline.dispatch(scroll(), false));
    }

    struct Tag;

    impl EventProcessor for Tag {
        fn process(&mut self, mut event: Event) -> Event {
            if let EventData::Custom(custom) = &mut event.data {
                custom.tag.push_str("!");
            }
            event
        }
    }

    #[test]
    fn plugins_run_before_packing() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(
            EmitMode::Emitting,
            Some(sink(&log)),
            Box::new(ManualClock::new(42)),
            None,
            None,
        )
        .with_plugins(vec![Box::new(Tag)])
        .with_pack(Some(Box::new(pack_json)));
        pipeline.dispatch(
            EventData::Custom(CustomData {
                tag: "t".into(),
                payload: serde_json::json!(null),
            }),
            false,
        );
        let log = log.borrow();
        let Emitted::Packed(packed) = &log[0].0 else {
            panic!("expected packed event");
        };
        let value: serde_json::Value = serde_json::from_str(packed).expect("json");
        assert_eq!(value["v"], PACK_VERSION);
        assert_eq!(value["type"], 5);
        assert_eq!(value["data"]["tag"], "t!");
        assert_eq!(value["timestamp"], 42);
    }
}
