//! Mutation buffer: turns native record batches into one canonical diff per flush.
//!
//! Records are ingested as they are delivered, in any state. Ingestion only sorts
//! nodes into pending sets (added, moved, removed, text, attribute); nothing is
//! serialized until `flush`, which reads the live document at that point. That is
//! what makes repeated notifications collapse: a node added and removed before the
//! flush never shows up, and an attribute set twice is reported once with its final
//! value.
//!
//! Flush invariants:
//! - every add's parent is mirrored before the add, either from an earlier flush or
//!   from an earlier add of the same payload; the same holds for `nextId`;
//! - an add whose parent or next sibling cannot be resolved is carried over to the
//!   next flush, at most `max_deferred_flushes` times;
//! - text and attribute changes never reference a node that is added in the same
//!   payload, and never repeat the value the mirror already holds;
//! - mirror entries of removed nodes are released only after the payload is built,
//!   and never for nodes that are connected again.

use crate::error::RecordError;
use crate::events::{AddedNode, AttributeChange, MutationData, RemovedNode, TextChange};
use crate::mirror::Mirror;
use crate::snapshot::{SerializeHooks, serialize_node};
use core_types::NodeId;
use dom::{Dom, MutationRecord, NodeRef};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Externally visible buffer state. A locked buffer reports `Locked` even when it is
/// also frozen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Unlocked,
    Locked,
    Frozen,
}

#[derive(Debug, Default)]
struct OrderedSet {
    order: Vec<NodeRef>,
    members: HashSet<NodeRef>,
}

impl OrderedSet {
    fn insert(&mut self, node: NodeRef) {
        if self.members.insert(node) {
            self.order.push(node);
        }
    }

    fn contains(&self, node: NodeRef) -> bool {
        self.members.contains(&node)
    }

    fn remove(&mut self, node: NodeRef) {
        if self.members.remove(&node) {
            self.order.retain(|n| *n != node);
        }
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Default)]
struct Pending {
    added: OrderedSet,
    moved: OrderedSet,
    /// `(node, new parent)` for moves, so a later removal from that parent cancels
    /// the move instead of emitting a removal.
    moved_into: HashSet<(NodeRef, NodeRef)>,
    dropped: HashSet<NodeRef>,
    removes: Vec<RemovedNode>,
    /// Every node seen leaving the tree; candidates for mirror release.
    detached: Vec<NodeRef>,
    texts: OrderedSet,
    attributes: Vec<(NodeRef, Vec<String>)>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.moved.is_empty()
            && self.removes.is_empty()
            && self.detached.is_empty()
            && self.texts.is_empty()
            && self.attributes.is_empty()
    }

    fn note_attribute(&mut self, node: NodeRef, name: &str) {
        match self.attributes.iter_mut().find(|(n, _)| *n == node) {
            Some((_, names)) => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            None => self.attributes.push((node, vec![name.to_string()])),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Deferred {
    node: NodeRef,
    attempts: u32,
}

#[derive(Debug)]
pub struct MutationBuffer {
    root: NodeRef,
    root_id: Option<NodeId>,
    frozen: bool,
    locked: bool,
    max_deferred_flushes: u32,
    pending: Pending,
    deferred: Vec<Deferred>,
    resync_requested: bool,
    anomalies: Vec<RecordError>,
}

impl MutationBuffer {
    /// Buffer for the tree rooted at `root` (a document or shadow root). `root_id` is
    /// stamped on serialized nodes when the tree lives inside an iframe document.
    pub fn new(root: NodeRef, root_id: Option<NodeId>, max_deferred_flushes: u32) -> Self {
        Self {
            root,
            root_id,
            frozen: false,
            locked: false,
            max_deferred_flushes,
            pending: Pending::default(),
            deferred: Vec::new(),
            resync_requested: false,
            anomalies: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn state(&self) -> BufferState {
        if self.locked {
            BufferState::Locked
        } else if self.frozen {
            BufferState::Frozen
        } else {
            BufferState::Unlocked
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.deferred.is_empty()
    }

    /// Whether a deferred add was given up on since the last call. The recorder
    /// answers with a full snapshot.
    pub fn take_resync_request(&mut self) -> bool {
        std::mem::take(&mut self.resync_requested)
    }

    /// Records and adds skipped since the last call.
    pub fn take_anomalies(&mut self) -> Vec<RecordError> {
        std::mem::take(&mut self.anomalies)
    }

    /// Forget every pending change except mirror releases. Called right after a full
    /// snapshot, which already describes the current tree.
    pub fn rebase(&mut self) {
        let detached = std::mem::take(&mut self.pending.detached);
        self.pending = Pending {
            detached,
            ..Pending::default()
        };
        self.deferred.clear();
    }

    /// Sort one delivered batch into the pending sets. Accepted in every state.
    pub fn ingest(&mut self, dom: &Dom, mirror: &Mirror, records: Vec<MutationRecord>) {
        for record in records {
            if !is_well_formed(dom, &record) {
                log::warn!(target: "record.mutation", "skipping malformed record {record:?}");
                self.anomalies.push(RecordError::MalformedRecord {
                    root: self.root,
                    record,
                });
                continue;
            }
            match record {
                MutationRecord::CharacterData { target, old_value } => {
                    if dom.text(target) != Some(old_value.as_str()) {
                        self.pending.texts.insert(target);
                    }
                }
                MutationRecord::Attributes {
                    target,
                    name,
                    old_value,
                } => {
                    if dom.attribute(target, &name) != old_value.as_deref() {
                        self.pending.note_attribute(target, &name);
                    }
                }
                MutationRecord::ChildList {
                    target,
                    added,
                    removed,
                    ..
                } => {
                    for node in added {
                        self.gen_adds(dom, mirror, node, target);
                    }
                    for node in removed {
                        self.ingest_removal(dom, mirror, target, node);
                    }
                }
            }
        }
    }

    fn gen_adds(&mut self, dom: &Dom, mirror: &Mirror, node: NodeRef, target: NodeRef) {
        let mut stack = vec![(node, Some(target))];
        while let Some((current, target)) = stack.pop() {
            if mirror.has(current) {
                self.pending.moved.insert(current);
                if let Some(target) = target {
                    if mirror.has(scope_anchor(dom, target)) {
                        self.pending.moved_into.insert((current, target));
                    }
                }
            } else {
                self.pending.added.insert(current);
                self.pending.dropped.remove(&current);
            }
            let shadow = dom.shadow_root(current);
            if let Some(root) = shadow {
                for child in dom.children(root).iter().rev() {
                    stack.push((*child, Some(root)));
                }
            }
            for child in dom.children(current).iter().rev() {
                stack.push((*child, None));
            }
        }
    }

    fn ingest_removal(&mut self, dom: &Dom, mirror: &Mirror, target: NodeRef, node: NodeRef) {
        let host = dom.shadow_host(target);
        if self.pending.added.contains(node) {
            self.deep_delete_added(dom, node);
            self.pending.dropped.insert(node);
        } else if self.pending.added.contains(target) && !mirror.has(node) {
            // Never serialized, and its parent will be serialized from scratch.
        } else if target_detached(dom, mirror, target) {
            // An ancestor's removal covers this node.
        } else if self.pending.moved.contains(node)
            && self.pending.moved_into.contains(&(node, target))
        {
            self.deep_delete_moved(dom, node);
        } else {
            match (mirror.get_id(node), mirror.get_id(host.unwrap_or(target))) {
                (Some(id), Some(parent_id)) => self.pending.removes.push(RemovedNode {
                    parent_id,
                    id,
                    is_shadow: host.is_some(),
                }),
                _ => log::trace!(
                    target: "record.mutation",
                    "dropping unresolved removal of {node:?} from {target:?}"
                ),
            }
        }
        self.pending.detached.push(node);
    }

    fn deep_delete_added(&mut self, dom: &Dom, node: NodeRef) {
        for n in subtree(dom, node) {
            self.pending.added.remove(n);
        }
    }

    fn deep_delete_moved(&mut self, dom: &Dom, node: NodeRef) {
        for n in subtree(dom, node) {
            self.pending.moved.remove(n);
        }
    }

    /// Build the payload for everything pending and release mirror entries of removed
    /// nodes. Returns `None` while frozen or locked, and when nothing changed.
    pub fn flush(
        &mut self,
        dom: &Dom,
        mirror: &mut Mirror,
        hooks: &mut dyn SerializeHooks,
    ) -> Option<MutationData> {
        if self.frozen || self.locked {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        let carried = std::mem::take(&mut self.deferred);
        let mut attempts: HashMap<NodeRef, u32> = HashMap::new();
        for d in &carried {
            attempts.insert(d.node, d.attempts);
        }

        let mut out = MutationData::default();
        let mut emitted: HashSet<NodeRef> = HashSet::new();
        let mut added_ids: HashSet<NodeId> = HashSet::new();
        let mut waiting: Vec<NodeRef> = Vec::new();

        let candidates = carried
            .iter()
            .map(|d| d.node)
            .chain(pending.moved.order.iter().copied())
            .chain(pending.added.order.iter().copied());
        for node in candidates {
            if pending.added.contains(node) && !pending.moved.contains(node) && mirror.has(node) {
                // Serialized by something else since ingestion; nothing new to say.
                continue;
            }
            match self.push_add(dom, mirror, hooks, node, &mut emitted) {
                AddOutcome::Added(add) => {
                    if pending.moved.contains(add.node_ref) {
                        out.moved += 1;
                    }
                    added_ids.insert(add.entry.node.id);
                    out.adds.push(add.entry);
                }
                AddOutcome::Waiting => {
                    if !waiting.contains(&node) {
                        waiting.push(node);
                    }
                }
                AddOutcome::Skipped => {}
            }
        }

        // Resolve waiting adds, latest first so next siblings land before the nodes
        // that point at them.
        loop {
            let ready = waiting
                .iter()
                .rposition(|n| resolve_position(dom, mirror, *n).is_some());
            let Some(index) = ready else {
                break;
            };
            let node = waiting.remove(index);
            match self.push_add(dom, mirror, hooks, node, &mut emitted) {
                AddOutcome::Added(add) => {
                    if pending.moved.contains(add.node_ref) {
                        out.moved += 1;
                    }
                    added_ids.insert(add.entry.node.id);
                    out.adds.push(add.entry);
                }
                AddOutcome::Waiting | AddOutcome::Skipped => {}
            }
        }
        self.carry_over(dom, waiting, &attempts);

        let mut seen_removals = HashSet::new();
        for removal in pending.removes {
            if seen_removals.insert(removal.id) {
                out.removes.push(removal);
            }
        }

        for node in pending.texts.order {
            let Some(id) = mirror.get_id(node) else {
                continue;
            };
            if added_ids.contains(&id) {
                continue;
            }
            let Some(value) = dom.text(node) else {
                continue;
            };
            if mirror.meta(id).and_then(|m| m.text.as_deref()) == Some(value) {
                continue;
            }
            mirror.note_text(id, value);
            out.texts.push(TextChange {
                id,
                value: value.to_string(),
            });
        }

        for (node, names) in pending.attributes {
            let Some(id) = mirror.get_id(node) else {
                continue;
            };
            if added_ids.contains(&id) {
                continue;
            }
            let mut changed = BTreeMap::new();
            for name in names {
                let value = dom.attribute(node, &name);
                let known = mirror
                    .meta(id)
                    .and_then(|m| m.attributes.get(&name))
                    .map(String::as_str);
                if value == known {
                    continue;
                }
                mirror.note_attribute(id, &name, value);
                changed.insert(name, value.map(str::to_string));
            }
            if !changed.is_empty() {
                out.attributes.push(AttributeChange {
                    id,
                    attributes: changed,
                });
            }
        }

        let removed_ids: HashSet<NodeId> = out.removes.iter().map(|r| r.id).collect();
        for node in pending.detached {
            if dom.is_connected(node) && mirror.has(node) {
                continue;
            }
            let counted = mirror.get_id(node).is_some_and(|id| !removed_ids.contains(&id));
            out.released += mirror.remove_subtree(dom, node) + usize::from(counted);
        }

        log::trace!(
            target: "record.mutation",
            "flush {:?}: {} adds ({} moved), {} removes, {} texts, {} attributes, {} deferred",
            self.root,
            out.adds.len(),
            out.moved,
            out.removes.len(),
            out.texts.len(),
            out.attributes.len(),
            self.deferred.len()
        );
        if out.is_empty() { None } else { Some(out) }
    }

    fn push_add(
        &mut self,
        dom: &Dom,
        mirror: &mut Mirror,
        hooks: &mut dyn SerializeHooks,
        node: NodeRef,
        emitted: &mut HashSet<NodeRef>,
    ) -> AddOutcome {
        if emitted.contains(&node) || !dom.contains(node) || !dom.is_connected(node) {
            return AddOutcome::Skipped;
        }
        if dom.parent(node).is_none() {
            return AddOutcome::Skipped;
        }
        let Some((parent_id, next_id)) = resolve_position(dom, mirror, node) else {
            return AddOutcome::Waiting;
        };
        let Some(serialized) = serialize_node(dom, node, mirror, self.root_id, hooks) else {
            return AddOutcome::Skipped;
        };
        emitted.insert(node);
        AddOutcome::Added(ReadyAdd {
            node_ref: node,
            entry: AddedNode {
                parent_id,
                next_id,
                node: serialized,
            },
        })
    }

    fn carry_over(&mut self, dom: &Dom, waiting: Vec<NodeRef>, attempts: &HashMap<NodeRef, u32>) {
        for node in waiting {
            if !dom.is_connected(node) {
                continue;
            }
            let tries = attempts.get(&node).copied().unwrap_or(0) + 1;
            if tries > self.max_deferred_flushes {
                log::warn!(
                    target: "record.mutation",
                    "giving up on add of {node:?} after {} flushes; requesting resync",
                    tries - 1
                );
                self.resync_requested = true;
                self.anomalies.push(RecordError::AddDropped {
                    root: self.root,
                    node,
                });
                continue;
            }
            self.deferred.push(Deferred {
                node,
                attempts: tries,
            });
        }
    }
}

struct ReadyAdd {
    node_ref: NodeRef,
    entry: AddedNode,
}

enum AddOutcome {
    Added(ReadyAdd),
    Waiting,
    Skipped,
}

/// `(parent id, next sibling id)` when both are addressable.
fn resolve_position(dom: &Dom, mirror: &Mirror, node: NodeRef) -> Option<(NodeId, Option<NodeId>)> {
    let parent = dom.parent(node)?;
    let parent_id = mirror.get_id(dom.shadow_host(parent).unwrap_or(parent))?;
    let next_id = match dom.next_sibling(node) {
        Some(next) => Some(mirror.get_id(next)?),
        None => None,
    };
    Some((parent_id, next_id))
}

/// Node that carries the id for a tree scope: the host for shadow roots.
fn scope_anchor(dom: &Dom, node: NodeRef) -> NodeRef {
    dom.shadow_host(node).unwrap_or(node)
}

fn target_detached(dom: &Dom, mirror: &Mirror, target: NodeRef) -> bool {
    !mirror.has(scope_anchor(dom, target)) || !dom.is_connected(target)
}

fn is_well_formed(dom: &Dom, record: &MutationRecord) -> bool {
    let target = record.target();
    if !dom.contains(target) {
        return false;
    }
    match record {
        MutationRecord::ChildList { added, removed, .. } => added
            .iter()
            .chain(removed)
            .all(|n| *n != target && dom.contains(*n)),
        MutationRecord::CharacterData { .. } => dom.text(target).is_some(),
        MutationRecord::Attributes { .. } => dom.tag_name(target).is_some(),
    }
}

/// `node` and its current descendants, shadow trees included.
fn subtree(dom: &Dom, node: NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        out.push(current);
        stack.extend_from_slice(dom.children(current));
        if let Some(root) = dom.shadow_root(current) {
            stack.extend_from_slice(dom.children(root));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DocumentScope, NoHooks, Snapshotter, TreeSnapshotter};
    use dom::ObserverId;
    use url::Url;

    struct Fixture {
        dom: Dom,
        doc: NodeRef,
        body: NodeRef,
        mirror: Mirror,
        observer: ObserverId,
        buffer: MutationBuffer,
    }

    impl Fixture {
        fn new() -> Self {
            let mut dom = Dom::new();
            let doc = dom.create_document(Url::parse("https://example.com/").expect("url"));
            let html = dom.create_element("html");
            let body = dom.create_element("body");
            dom.append_child(doc, html).expect("html");
            dom.append_child(html, body).expect("body");
            let mut mirror = Mirror::new();
            TreeSnapshotter
                .snapshot(&dom, doc, DocumentScope::Top, &mut mirror, &mut NoHooks)
                .expect("snapshot");
            let observer = dom.observe(doc).expect("observe");
            Self {
                dom,
                doc,
                body,
                mirror,
                observer,
                buffer: MutationBuffer::new(doc, None, 3),
            }
        }

        fn deliver(&mut self) {
            let records = self.dom.take_records(self.observer);
            self.buffer.ingest(&self.dom, &self.mirror, records);
        }

        fn flush(&mut self) -> Option<MutationData> {
            self.deliver();
            self.buffer.flush(&self.dom, &mut self.mirror, &mut NoHooks)
        }

        fn id(&self, node: NodeRef) -> NodeId {
            self.mirror.get_id(node).expect("mirrored")
        }
    }

    #[test]
    fn add_then_remove_cancels_out() {
        let mut fx = Fixture::new();
        let div = fx.dom.create_element("div");
        let text = fx.dom.create_text("x");
        fx.dom.append_child(div, text).expect("text");
        fx.dom.append_child(fx.body, div).expect("add");
        fx.dom.remove(div).expect("remove");
        assert_eq!(fx.flush(), None);
        assert!(!fx.mirror.has(div));
        assert!(!fx.mirror.has(text));
    }

    #[test]
    fn nested_adds_are_parent_first_with_next_ids() {
        let mut fx = Fixture::new();
        let list = fx.dom.create_element("ul");
        fx.dom.append_child(fx.body, list).expect("list");
        let a = fx.dom.create_element("li");
        let b = fx.dom.create_element("li");
        fx.dom.append_child(list, a).expect("a");
        fx.dom.append_child(list, b).expect("b");

        let data = fx.flush().expect("payload");
        assert_eq!(data.adds.len(), 3);
        let position = |id| data.adds.iter().position(|add| add.node.id == id).expect("add");
        let (list_id, a_id, b_id) = (fx.id(list), fx.id(a), fx.id(b));
        assert!(position(list_id) < position(a_id));
        assert!(position(b_id) < position(a_id));
        let a_add = &data.adds[position(a_id)];
        assert_eq!(a_add.parent_id, list_id);
        assert_eq!(a_add.next_id, Some(b_id));
        assert_eq!(data.adds[position(list_id)].parent_id, fx.id(fx.body));
    }

    #[test]
    fn attribute_changes_collapse_to_final_value() {
        let mut fx = Fixture::new();
        fx.dom.set_attribute(fx.body, "class", "a").expect("a");
        fx.dom.set_attribute(fx.body, "class", "b").expect("b");
        let data = fx.flush().expect("payload");
        assert_eq!(data.attributes.len(), 1);
        assert_eq!(
            data.attributes[0].attributes.get("class"),
            Some(&Some("b".to_string()))
        );

        fx.dom.set_attribute(fx.body, "class", "c").expect("c");
        fx.dom.set_attribute(fx.body, "class", "b").expect("back");
        assert_eq!(fx.flush(), None);

        fx.dom.remove_attribute(fx.body, "class").expect("remove");
        let data = fx.flush().expect("payload");
        assert_eq!(data.attributes[0].attributes.get("class"), Some(&None));
    }

    #[test]
    fn changes_on_added_nodes_are_folded_into_the_add() {
        let mut fx = Fixture::new();
        let p = fx.dom.create_element("p");
        let text = fx.dom.create_text("one");
        fx.dom.append_child(fx.body, p).expect("p");
        fx.dom.append_child(p, text).expect("text");
        fx.dom.set_text(text, "two").expect("set");
        fx.dom.set_attribute(p, "id", "x").expect("attr");
        let data = fx.flush().expect("payload");
        assert_eq!(data.adds.len(), 2);
        assert!(data.texts.is_empty());
        assert!(data.attributes.is_empty());
    }

    #[test]
    fn frozen_buffer_keeps_everything_for_one_flush() {
        let mut fx = Fixture::new();
        let div = fx.dom.create_element("div");
        fx.dom.append_child(fx.body, div).expect("add");
        assert_eq!(fx.flush().map(|d| d.adds.len()), Some(1));

        fx.buffer.freeze();
        assert_eq!(fx.buffer.state(), BufferState::Frozen);
        fx.dom.remove(div).expect("remove");
        assert_eq!(fx.flush(), None);
        fx.dom.set_attribute(fx.body, "data-x", "1").expect("attr");
        assert_eq!(fx.flush(), None);
        assert!(fx.mirror.has(div));

        fx.buffer.unfreeze();
        let data = fx.flush().expect("payload");
        assert_eq!(data.removes.len(), 1);
        assert_eq!(data.attributes.len(), 1);
        assert!(!fx.mirror.has(div));
    }

    #[test]
    fn lock_takes_precedence_over_freeze() {
        let mut fx = Fixture::new();
        fx.buffer.freeze();
        fx.buffer.lock();
        assert_eq!(fx.buffer.state(), BufferState::Locked);
        fx.buffer.unlock();
        assert_eq!(fx.buffer.state(), BufferState::Frozen);
    }

    #[test]
    fn move_keeps_id_and_reports_removal() {
        let mut fx = Fixture::new();
        let a = fx.dom.create_element("section");
        let b = fx.dom.create_element("section");
        let item = fx.dom.create_element("span");
        fx.dom.append_child(fx.body, a).expect("a");
        fx.dom.append_child(fx.body, b).expect("b");
        fx.dom.append_child(a, item).expect("item");
        fx.flush().expect("initial adds");
        let item_id = fx.id(item);

        fx.dom.append_child(b, item).expect("move");
        let data = fx.flush().expect("payload");
        assert_eq!(data.moved, 1);
        assert_eq!(data.adds[0].node.id, item_id);
        assert_eq!(data.adds[0].parent_id, fx.id(b));
        assert_eq!(data.removes.len(), 1);
        assert_eq!(data.removes[0].parent_id, fx.id(a));
        assert_eq!(fx.id(item), item_id);
    }

    #[test]
    fn descendant_removal_is_covered_by_ancestor() {
        let mut fx = Fixture::new();
        let outer = fx.dom.create_element("div");
        let inner = fx.dom.create_element("div");
        fx.dom.append_child(fx.body, outer).expect("outer");
        fx.dom.append_child(outer, inner).expect("inner");
        fx.flush().expect("adds");

        fx.dom.remove(inner).expect("inner");
        fx.dom.remove(outer).expect("outer");
        let data = fx.flush().expect("payload");
        assert_eq!(data.removes.len(), 1);
        assert_eq!(data.removes[0].parent_id, fx.id(fx.body));
        assert!(!fx.mirror.has(inner));
    }

    #[test]
    fn malformed_records_are_skipped() {
        let mut fx = Fixture::new();
        let bogus = vec![
            MutationRecord::ChildList {
                target: fx.body,
                added: vec![fx.body],
                removed: Vec::new(),
                previous_sibling: None,
                next_sibling: None,
            },
            MutationRecord::Attributes {
                target: NodeRef(9_999),
                name: "x".into(),
                old_value: None,
            },
        ];
        fx.buffer.ingest(&fx.dom, &fx.mirror, bogus);
        assert!(!fx.buffer.has_pending());
        let skipped = fx.buffer.take_anomalies();
        assert_eq!(skipped.len(), 2);
        assert!(matches!(skipped[0], RecordError::MalformedRecord { root, .. } if root == fx.doc));
        assert!(fx.buffer.take_anomalies().is_empty());
        assert_eq!(fx.buffer.flush(&fx.dom, &mut fx.mirror, &mut NoHooks), None);
        assert!(fx.mirror.has(fx.doc));
    }

    #[test]
    fn unresolvable_adds_are_deferred_then_resynced() {
        let mut fx = Fixture::new();
        // Forget the body to leave a connected parent without an id.
        let body_id = fx.id(fx.body);
        fx.mirror.remove(body_id);
        let div = fx.dom.create_element("div");
        fx.dom.append_child(fx.body, div).expect("add");
        for _ in 0..3 {
            assert_eq!(fx.flush(), None);
            assert!(fx.buffer.has_pending());
            assert!(!fx.buffer.take_resync_request());
        }
        assert_eq!(fx.flush(), None);
        assert!(fx.buffer.take_resync_request());
        assert!(!fx.buffer.has_pending());
        assert_eq!(
            fx.buffer.take_anomalies(),
            vec![RecordError::AddDropped { root: fx.doc, node: div }]
        );
    }

    #[test]
    fn deferred_add_lands_once_parent_resolves() {
        let mut fx = Fixture::new();
        let body_id = fx.id(fx.body);
        fx.mirror.remove(body_id);
        let div = fx.dom.create_element("div");
        fx.dom.append_child(fx.body, div).expect("add");
        assert_eq!(fx.flush(), None);

        let body = fx.body;
        fx.mirror.allocate(body);
        let data = fx.flush().expect("payload");
        assert_eq!(data.adds.len(), 1);
        assert_eq!(data.adds[0].parent_id, fx.id(body));
    }

    #[test]
    fn rebase_drops_changes_but_releases_removed_nodes() {
        let mut fx = Fixture::new();
        let div = fx.dom.create_element("div");
        fx.dom.append_child(fx.body, div).expect("add");
        fx.flush().expect("add");
        fx.dom.remove(div).expect("remove");
        fx.dom.set_attribute(fx.body, "class", "z").expect("attr");
        fx.deliver();
        fx.buffer.rebase();
        assert_eq!(fx.buffer.flush(&fx.dom, &mut fx.mirror, &mut NoHooks), None);
        assert!(!fx.mirror.has(div));
    }
}
