//! # dom
//!
//! Live host document model for the recorder.
//!
//! The model stands in for a browser's document: nodes live in one arena and are
//! addressed by [`NodeRef`] handles; tree changes queue native-style
//! [`MutationRecord`] batches on every observer whose root covers the target; other
//! host happenings (document lifecycle, iframe loads, `attachShadow`, stylesheet loads,
//! adopted stylesheets) queue as [`Notifications`].
//!
//! Nothing here knows about recording. The `record` crate consumes the records and
//! notifications and is the only place ids are assigned.

mod document;
mod error;
mod node;
mod observer;

pub use document::{Dom, Lifecycle, Notifications};
pub use error::DomError;
pub use node::{NodeKind, NodeRef, ReadyState, SheetRef, StyleSheet, Viewport};
pub use observer::{MutationRecord, ObserverId};
