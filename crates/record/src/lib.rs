//! # record
//!
//! Turns a live [`dom::Dom`] into a stream of replayable events: one full snapshot,
//! then incremental diffs that address nodes by stable integer ids.
//!
//! A [`Recorder`] owns the whole session. The host drives it: after changing the
//! document it calls [`Recorder::pump`], which delivers the queued native batches to
//! the per-root mutation buffers, flushes them into canonical payloads and hands every
//! event to the sink through the checkpoint pipeline.

pub mod bridges;
pub mod clock;
pub mod events;
pub mod frame;
pub mod mirror;
pub mod mutation;
pub mod observer;
pub mod options;
pub mod pipeline;
pub mod snapshot;

mod error;
mod recorder;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorHandler, RecordError};
pub use events::{Event, EventData, EventType, IncrementalData, IncrementalSource, MutationData};
pub use frame::{EmitMode, FrameEnv, ParentFrame};
pub use mirror::Mirror;
pub use mutation::{BufferState, MutationBuffer};
pub use observer::{Emit, Producer};
pub use options::{RecordAfter, RecordOptions};
pub use pipeline::{EventProcessor, EventSink, Emitted, pack_json};
pub use recorder::{Recorder, RecorderParts, RecorderStatus};
pub use snapshot::{SerializeHooks, Snapshotter, TreeSnapshotter};
