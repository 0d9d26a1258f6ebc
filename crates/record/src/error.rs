use dom::{DomError, MutationRecord, NodeRef};

/// Errors surfaced to the embedder.
///
/// `MissingSink`, `NotRecording`, `InvalidConfig` and `Dom` are returned from the
/// failing call. The remaining variants describe anomalies the recorder skipped over
/// while recording continued; they are only ever passed to an [`ErrorHandler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// Local emission was requested but no sink was supplied.
    MissingSink,
    /// The named operation needs an active recording.
    NotRecording(&'static str),
    InvalidConfig(String),
    Dom(DomError),
    /// A native record that referenced stale or self-referential nodes.
    MalformedRecord {
        root: NodeRef,
        record: MutationRecord,
    },
    /// An added node whose parent never became addressable.
    AddDropped { root: NodeRef, node: NodeRef },
    /// The snapshotter produced nothing for this root.
    SnapshotFailed(NodeRef),
    /// A tree could not be observed.
    ObserveFailed { root: NodeRef, source: DomError },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::MissingSink => write!(f, "an event sink is required in the emitting frame"),
            RecordError::NotRecording(op) => {
                write!(f, "{op} is only available while recording")
            }
            RecordError::InvalidConfig(msg) => write!(f, "invalid record options: {msg}"),
            RecordError::Dom(err) => write!(f, "document error: {err}"),
            RecordError::MalformedRecord { root, record } => {
                write!(f, "skipped malformed record under {root:?}: {record:?}")
            }
            RecordError::AddDropped { root, node } => {
                write!(f, "dropped unaddressable add of {node:?} under {root:?}")
            }
            RecordError::SnapshotFailed(root) => write!(f, "failed to serialize {root:?}"),
            RecordError::ObserveFailed { root, source } => {
                write!(f, "cannot observe {root:?}: {source}")
            }
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::Dom(err) | RecordError::ObserveFailed { source: err, .. } => Some(err),
            _ => None,
        }
    }
}

impl From<DomError> for RecordError {
    fn from(err: DomError) -> Self {
        RecordError::Dom(err)
    }
}

/// Receives anomalies the recorder recovered from. Recording always continues.
pub trait ErrorHandler {
    fn handle(&mut self, error: &RecordError);
}

impl<F: FnMut(&RecordError)> ErrorHandler for F {
    fn handle(&mut self, error: &RecordError) {
        self(error)
    }
}
