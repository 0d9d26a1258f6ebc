use crate::node::{NodeRef, SheetRef};

/// Host-side misuse of the document model.
///
/// These are deterministic programming errors on the caller's side (for example
/// inserting a node into its own subtree); the document is left unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomError {
    UnknownNode(NodeRef),
    UnknownSheet(SheetRef),
    WrongNodeKind(NodeRef),
    InvalidParent(NodeRef),
    InvalidSibling { parent: NodeRef, before: NodeRef },
    CycleDetected { parent: NodeRef, child: NodeRef },
    ShadowRootExists(NodeRef),
}

impl std::fmt::Display for DomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomError::UnknownNode(node) => write!(f, "unknown node: {node:?}"),
            DomError::UnknownSheet(sheet) => write!(f, "unknown stylesheet: {sheet:?}"),
            DomError::WrongNodeKind(node) => write!(f, "wrong node kind for {node:?}"),
            DomError::InvalidParent(node) => write!(f, "{node:?} cannot take this child"),
            DomError::InvalidSibling { parent, before } => {
                write!(f, "{before:?} is not a child of {parent:?}")
            }
            DomError::CycleDetected { parent, child } => {
                write!(f, "inserting {child:?} under {parent:?} would create a cycle")
            }
            DomError::ShadowRootExists(host) => {
                write!(f, "{host:?} already hosts a shadow root")
            }
        }
    }
}

impl std::error::Error for DomError {}
