//! Native-style mutation observation.
//!
//! Observers register on a root node and receive every record whose target lies in
//! that root's tree scope: the root itself and its descendants, not crossing into
//! shadow roots or iframe documents (those have no parent and form their own scope).
//! Records queue per observer until the host delivers them with `take_records`, which
//! models delivery at a microtask boundary: grouping is preserved, but nothing is
//! ordered or de-duplicated.

use crate::node::NodeRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationRecord {
    ChildList {
        target: NodeRef,
        added: Vec<NodeRef>,
        removed: Vec<NodeRef>,
        previous_sibling: Option<NodeRef>,
        next_sibling: Option<NodeRef>,
    },
    Attributes {
        target: NodeRef,
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        target: NodeRef,
        old_value: String,
    },
}

impl MutationRecord {
    pub fn target(&self) -> NodeRef {
        match self {
            MutationRecord::ChildList { target, .. }
            | MutationRecord::Attributes { target, .. }
            | MutationRecord::CharacterData { target, .. } => *target,
        }
    }
}

struct Registration {
    id: ObserverId,
    root: NodeRef,
    queue: Vec<MutationRecord>,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u32,
    active: Vec<Registration>,
}

impl ObserverRegistry {
    pub(crate) fn register(&mut self, root: NodeRef) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.active.push(Registration {
            id,
            root,
            queue: Vec::new(),
        });
        id
    }

    /// Returns `false` when the observer was already disconnected.
    pub(crate) fn disconnect(&mut self, id: ObserverId) -> bool {
        let before = self.active.len();
        self.active.retain(|reg| reg.id != id);
        before != self.active.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Queue `record` for every observer rooted somewhere on `scope` (the target's
    /// inclusive ancestor chain within its tree).
    pub(crate) fn queue(&mut self, scope: &[NodeRef], record: MutationRecord) {
        for reg in &mut self.active {
            if scope.contains(&reg.root) {
                log::trace!(target: "dom.observer", "queue {:?} for {:?}", record, reg.id);
                reg.queue.push(record.clone());
            }
        }
    }

    pub(crate) fn take(&mut self, id: ObserverId) -> Vec<MutationRecord> {
        self.active
            .iter_mut()
            .find(|reg| reg.id == id)
            .map(|reg| std::mem::take(&mut reg.queue))
            .unwrap_or_default()
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.active.iter().any(|reg| !reg.queue.is_empty())
    }
}
