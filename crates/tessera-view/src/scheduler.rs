#![forbid(unsafe_code)]

//! Mode-aware update scheduler.
//!
//! [`UpdateScheduler::schedule`] walks a [`ViewTree`] in pre-order and
//! produces the recompute set for one event. The walk is synchronous: when
//! it returns, every recomputed node's recorded bindings match its current
//! bindings and every callback has run.
//!
//! # Eligibility
//!
//! A node reached by the walk is eligible when any of these holds:
//!
//! | Condition | Consumed by the visit |
//! |-----------|-----------------------|
//! | mode is `Default` | no |
//! | carries a mark (`ManualMark`, or ancestor of an internal event) | yes |
//! | carries the internal-event flag | yes |
//!
//! A `Manual` node is never eligible because a binding changed: a changed
//! input stays unrecorded until the node is marked or raises an event. An
//! ineligible node prunes its whole subtree without comparing bindings, so a
//! walk costs the number of eligible nodes plus the pruned frontier.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | callback returns `Err` | failure recorded, descendants skipped |
//! | callback panics (`catch_panics`) | failure recorded, descendants skipped |
//! | duplicate key in a tracked collection | failure recorded, record kept, flags kept |
//! | staged write to a removed node | failure recorded for the writer |
//! | origin is not a live node | `TreeError::StaleNode`, nothing changed |

use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::binding::{BindingValue, Identity, ItemKey};
use crate::error::{
    FailureCause, RecomputeError, TreeError, ViewUpdateErrors, ViewUpdateFailure,
};
use crate::node::{DetectionMode, NodeFlags, NodeId, ViewNode, ViewTree};
use crate::reconcile::{EditScript, reconcile};

/// Recompute callback installed with [`ViewTree::set_recompute`].
pub type RecomputeFn = Box<dyn FnMut(&mut RecomputeContext<'_>) -> Result<(), RecomputeError>>;

/// Edit script of a tracked collection binding.
pub type ListEdits = EditScript<BindingValue, ItemKey>;

/// What triggered a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Opaque external event; walks from the root.
    External,
    /// Event raised by the origin node itself; the origin and its ancestors
    /// become eligible for one walk.
    Internal,
    /// Mark the origin and its ancestors for the next walk without walking.
    ManualMark,
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct UpdateConfig {
    /// Contain panics raised by recompute callbacks as node failures.
    pub catch_panics: bool,
    /// Follow-up batches [`UpdateScheduler::flush`] runs before giving up.
    pub max_follow_up_passes: usize,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            catch_panics: true,
            max_follow_up_passes: 10,
        }
    }
}

impl UpdateConfig {
    #[must_use]
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    #[must_use]
    pub fn with_max_follow_up_passes(mut self, passes: usize) -> Self {
        self.max_follow_up_passes = passes;
        self
    }
}

/// What a recompute callback sees of its node, and what it may request.
pub struct RecomputeContext<'a> {
    node: NodeId,
    bindings: &'a BTreeMap<Rc<str>, BindingValue>,
    changed: &'a [Rc<str>],
    edits: &'a BTreeMap<Rc<str>, ListEdits>,
    writes: Vec<(NodeId, Rc<str>, BindingValue)>,
    follow_ups: Vec<(NodeId, EventKind)>,
}

impl<'a> RecomputeContext<'a> {
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Names of the bindings that changed since the node was last visited.
    #[must_use]
    pub fn changed(&self) -> &'a [Rc<str>] {
        self.changed
    }

    #[must_use]
    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.iter().any(|n| &**n == name)
    }

    /// Current value of one of the node's bindings.
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&'a BindingValue> {
        self.bindings.get(name)
    }

    /// All current bindings of the node.
    pub fn bindings(&self) -> impl Iterator<Item = (&'a str, &'a BindingValue)> + 'a {
        self.bindings.iter().map(|(name, value)| (&**name, value))
    }

    /// List edits for a tracked collection binding that changed.
    #[must_use]
    pub fn edits(&self, name: &str) -> Option<&'a ListEdits> {
        self.edits.get(name)
    }

    /// Stage a binding write. Writes are applied after the callback returns
    /// and before the node's children are visited.
    pub fn set_binding(&mut self, node: NodeId, name: impl Into<Rc<str>>, value: BindingValue) {
        self.writes.push((node, name.into(), value));
    }

    /// Queue an event for [`UpdateScheduler::flush`].
    pub fn enqueue_follow_up(&mut self, origin: NodeId, kind: EventKind) {
        self.follow_ups.push((origin, kind));
    }
}

/// Outcome of one walk.
#[derive(Debug, Clone)]
pub struct WalkReport {
    pub origin: NodeId,
    pub kind: EventKind,
    /// Recompute set, in visit order.
    pub recomputed: Vec<NodeId>,
    /// Nodes with at least one changed binding.
    pub dirty: Vec<NodeId>,
    pub failures: Vec<ViewUpdateFailure>,
    /// Nodes whose bindings were compared.
    pub visited: usize,
    /// Ineligible nodes whose subtree was skipped.
    pub pruned: usize,
}

impl WalkReport {
    fn new(origin: NodeId, kind: EventKind) -> Self {
        Self {
            origin,
            kind,
            recomputed: Vec::new(),
            dirty: Vec::new(),
            failures: Vec::new(),
            visited: 0,
            pruned: 0,
        }
    }

    #[must_use]
    pub fn is_recomputed(&self, node: NodeId) -> bool {
        self.recomputed.contains(&node)
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// The recompute set, or every failure of the walk.
    pub fn into_result(self) -> Result<Vec<NodeId>, ViewUpdateErrors> {
        if self.failures.is_empty() {
            Ok(self.recomputed)
        } else {
            Err(ViewUpdateErrors {
                failures: self.failures,
            })
        }
    }
}

/// A binding whose current value differs from the recorded one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnstableBinding {
    pub node: NodeId,
    pub name: Rc<str>,
}

/// Cumulative scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub walks: u64,
    pub visited: u64,
    pub pruned: u64,
    pub recomputed: u64,
    pub failures: u64,
}

/// Changes observed on one node.
#[derive(Default)]
struct NodeDiff {
    changed: Vec<Rc<str>>,
    edits: BTreeMap<Rc<str>, ListEdits>,
}

/// Drives walks over a [`ViewTree`].
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    config: UpdateConfig,
    queue: VecDeque<(NodeId, EventKind)>,
    stats: SchedulerStats,
}

impl UpdateScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: UpdateConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Events waiting for [`flush`](Self::flush).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn enqueue(&mut self, origin: NodeId, kind: EventKind) {
        self.queue.push_back((origin, kind));
    }

    /// Handle one event. `origin` is ignored for [`EventKind::External`].
    pub fn schedule(
        &mut self,
        tree: &mut ViewTree,
        origin: NodeId,
        kind: EventKind,
    ) -> Result<WalkReport, TreeError> {
        match kind {
            EventKind::External => {}
            EventKind::Internal => {
                tree.node_mut(origin)?.flags.insert(NodeFlags::INTERNAL_EVENT);
                if let Some(parent) = tree.parent(origin) {
                    tree.flag_path(parent, NodeFlags::MARKED)?;
                }
            }
            EventKind::ManualMark => {
                let marked = tree.flag_path(origin, NodeFlags::MARKED)?;
                trace!(node = %origin, marked, "marked path to root");
                return Ok(WalkReport::new(origin, kind));
            }
        }
        self.walk(tree, origin, kind)
    }

    /// Run queued events, including follow-ups they enqueue, until the queue
    /// drains.
    ///
    /// An event whose origin is gone fails the flush. That event is dropped;
    /// the rest of its batch goes back to the front of the queue, ahead of
    /// any follow-ups, so the next flush resumes where this one stopped.
    pub fn flush(&mut self, tree: &mut ViewTree) -> Result<Vec<WalkReport>, TreeError> {
        let mut reports = Vec::new();
        let mut passes = 0;
        while !self.queue.is_empty() {
            if passes > self.config.max_follow_up_passes {
                warn!(passes, pending = self.queue.len(), "dropping follow-up events");
                self.queue.clear();
                return Err(TreeError::FollowUpLimit { passes });
            }
            let mut batch = std::mem::take(&mut self.queue);
            while let Some((origin, kind)) = batch.pop_front() {
                match self.schedule(tree, origin, kind) {
                    Ok(report) => reports.push(report),
                    Err(err) => {
                        warn!(
                            origin = %origin,
                            ?kind,
                            error = %err,
                            requeued = batch.len(),
                            "flush stopped"
                        );
                        batch.append(&mut self.queue);
                        self.queue = batch;
                        return Err(err);
                    }
                }
            }
            passes += 1;
        }
        Ok(reports)
    }

    /// Report bindings of eligible nodes whose current value differs from
    /// the recorded one. Reads only; no flag, record or callback is touched.
    #[must_use]
    pub fn verify_stable(&self, tree: &ViewTree) -> Vec<UnstableBinding> {
        let mut unstable = Vec::new();
        let Some(root) = tree.root() else {
            return unstable;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Ok(node) = tree.node(id) else {
                continue;
            };
            if !is_eligible(node) {
                continue;
            }
            let changed = match diff_node(tree, id, node) {
                Ok(diff) => diff.changed,
                Err(FailureCause::DuplicateKey { binding, .. }) => vec![Rc::from(binding)],
                Err(_) => Vec::new(),
            };
            unstable.extend(changed.into_iter().map(|name| UnstableBinding { node: id, name }));
            stack.extend(node.children.iter().rev().copied());
        }
        unstable
    }

    fn walk(
        &mut self,
        tree: &mut ViewTree,
        origin: NodeId,
        kind: EventKind,
    ) -> Result<WalkReport, TreeError> {
        let root = tree.root().ok_or(TreeError::NoRoot)?;
        let mut report = WalkReport::new(origin, kind);
        debug!(origin = %origin, ?kind, "walk start");

        for id in std::mem::take(&mut tree.last_dirty) {
            if let Ok(node) = tree.node_mut(id) {
                node.flags.remove(NodeFlags::DIRTY);
            }
        }

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            report.visited += 1;
            let node = tree.node(id)?;
            if !is_eligible(node) {
                trace!(node = %id, "pruned subtree");
                report.pruned += 1;
                continue;
            }
            let diff = match diff_node(tree, id, node) {
                Ok(diff) => diff,
                Err(cause) => {
                    fail(&mut report, id, cause);
                    continue;
                }
            };

            if self.visit(tree, id, diff, &mut report)? {
                stack.extend(tree.children(id).iter().rev().copied());
            }
        }

        self.stats.walks += 1;
        self.stats.visited += report.visited as u64;
        self.stats.pruned += report.pruned as u64;
        self.stats.recomputed += report.recomputed.len() as u64;
        self.stats.failures += report.failures.len() as u64;
        debug!(
            origin = %origin,
            ?kind,
            recomputed = report.recomputed.len(),
            dirty = report.dirty.len(),
            visited = report.visited,
            pruned = report.pruned,
            failures = report.failures.len(),
            "walk end"
        );
        Ok(report)
    }

    /// Recompute one eligible node. Returns whether its children should be
    /// visited.
    fn visit(
        &mut self,
        tree: &mut ViewTree,
        id: NodeId,
        diff: NodeDiff,
        report: &mut WalkReport,
    ) -> Result<bool, TreeError> {
        let node = tree.node_mut(id)?;
        node.flags.remove(NodeFlags::MARKED | NodeFlags::INTERNAL_EVENT);
        let callback = node.recompute.take();
        if !diff.changed.is_empty() {
            node.flags.insert(NodeFlags::DIRTY);
            let updates: Vec<_> = diff
                .changed
                .iter()
                .filter_map(|name| node.bindings.get(name).map(|v| (Rc::clone(name), v.clone())))
                .collect();
            for (name, value) in updates {
                tree.store_mut().record(id, name, value);
            }
            tree.last_dirty.push(id);
            report.dirty.push(id);
        }
        report.recomputed.push(id);
        trace!(node = %id, changed = diff.changed.len(), "recompute");

        let Some(mut recompute) = callback else {
            return Ok(true);
        };
        let node = tree.node(id)?;
        let mut ctx = RecomputeContext {
            node: id,
            bindings: &node.bindings,
            changed: &diff.changed,
            edits: &diff.edits,
            writes: Vec::new(),
            follow_ups: Vec::new(),
        };
        let outcome = if self.config.catch_panics {
            match catch_unwind(AssertUnwindSafe(|| recompute(&mut ctx))) {
                Ok(result) => result.map_err(FailureCause::Callback),
                Err(payload) => Err(FailureCause::Panicked(panic_message(&*payload))),
            }
        } else {
            recompute(&mut ctx).map_err(FailureCause::Callback)
        };
        let RecomputeContext {
            writes, follow_ups, ..
        } = ctx;
        tree.node_mut(id)?.recompute = Some(recompute);

        let mut outcome = outcome;
        for (target, name, value) in writes {
            if let Err(err) = tree.set_binding(target, name, value) {
                if outcome.is_ok() {
                    outcome = Err(FailureCause::Callback(RecomputeError::new(format!(
                        "staged write rejected: {err}"
                    ))));
                }
            }
        }
        self.queue.extend(follow_ups);

        match outcome {
            Ok(()) => Ok(true),
            Err(cause) => {
                fail(report, id, cause);
                Ok(false)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn fail(report: &mut WalkReport, node: NodeId, cause: FailureCause) {
    warn!(node = %node, error = %cause, "view update failed");
    report.failures.push(ViewUpdateFailure { node, cause });
}

fn is_eligible(node: &ViewNode) -> bool {
    node.mode == DetectionMode::Default
        || node
            .flags
            .intersects(NodeFlags::MARKED | NodeFlags::INTERNAL_EVENT)
}

/// Compare a node's current bindings to its recorded ones.
fn diff_node(tree: &ViewTree, id: NodeId, node: &ViewNode) -> Result<NodeDiff, FailureCause> {
    let mut diff = NodeDiff::default();
    for (name, current) in &node.bindings {
        let recorded = tree.store().get(id, name);
        if recorded.is_some_and(|r| r.is_same(current)) {
            continue;
        }
        let tracked = node.collections.get(name);
        match (tracked, current.as_list()) {
            (Some(key_fn), Some(next)) => {
                let previous = recorded.and_then(BindingValue::as_list).unwrap_or(&[]);
                let script = reconcile(previous, next, |item| key_fn(item)).map_err(|error| {
                    FailureCause::DuplicateKey {
                        binding: name.to_string(),
                        error,
                    }
                })?;
                if !script.is_empty() {
                    diff.changed.push(Rc::clone(name));
                    diff.edits.insert(Rc::clone(name), script);
                }
            }
            _ => diff.changed.push(Rc::clone(name)),
        }
    }
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn none() -> [(&'static str, BindingValue); 0] {
        []
    }

    /// Record every recompute callback invocation into a shared log.
    fn log_recomputes(tree: &mut ViewTree, nodes: &[NodeId]) -> Rc<RefCell<Vec<NodeId>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for &node in nodes {
            let log = Rc::clone(&log);
            tree.set_recompute(node, move |ctx| {
                log.borrow_mut().push(ctx.node());
                Ok(())
            })
            .unwrap();
        }
        log
    }

    #[test]
    fn default_manual_default_chain_recomputes_only_root() {
        let mut tree = ViewTree::new();
        let a = tree.create_root(DetectionMode::Default, none()).unwrap();
        let b = tree
            .create_node(a, DetectionMode::Manual, [("label", BindingValue::from("x"))])
            .unwrap();
        let c = tree.create_node(b, DetectionMode::Default, none()).unwrap();
        tree.set_binding(b, "label", BindingValue::from("x")).unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, a, EventKind::External).unwrap();

        assert_eq!(report.recomputed, vec![a]);
        assert!(!report.is_recomputed(c));
        assert!(!tree.is_dirty(b));
        assert_eq!(report.pruned, 1);
    }

    #[test]
    fn changed_binding_does_not_wake_manual_node() {
        let mut tree = ViewTree::new();
        let root = tree
            .create_root(DetectionMode::Manual, [("n", BindingValue::from(1))])
            .unwrap();
        let child = tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        let log = log_recomputes(&mut tree, &[root, child]);
        tree.set_binding(root, "n", 2.into()).unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert!(report.recomputed.is_empty());
        assert!(report.dirty.is_empty());
        assert!(!tree.is_dirty(root));
        assert!(log.borrow().is_empty());
        assert_eq!(tree.store().get(root, "n").and_then(BindingValue::as_int), Some(1));

        // The change is picked up once the node is marked.
        scheduler.schedule(&mut tree, root, EventKind::ManualMark).unwrap();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(report.recomputed, vec![root]);
        assert_eq!(report.dirty, vec![root]);
        assert_eq!(tree.store().get(root, "n").and_then(BindingValue::as_int), Some(2));
    }

    #[test]
    fn all_manual_tree_prunes_everything() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Manual, none()).unwrap();
        let a = tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        tree.create_node(a, DetectionMode::Manual, none()).unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert!(report.recomputed.is_empty());
        assert_eq!(report.visited, 1);
        assert_eq!(report.pruned, 1);
    }

    #[test]
    fn mark_propagates_to_ancestors_once() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Manual, none()).unwrap();
        let mid = tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        let leaf = tree.create_node(mid, DetectionMode::Manual, none()).unwrap();
        let other = tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        let log = log_recomputes(&mut tree, &[root, mid, leaf, other]);

        let mut scheduler = UpdateScheduler::new();
        let marked = scheduler.schedule(&mut tree, leaf, EventKind::ManualMark).unwrap();
        assert!(marked.recomputed.is_empty());
        assert!(log.borrow().is_empty());

        let first = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(first.recomputed, vec![root, mid, leaf]);
        assert_eq!(*log.borrow(), vec![root, mid, leaf]);
        assert!(!tree.is_marked(leaf));

        let second = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert!(second.recomputed.is_empty());
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn internal_event_reaches_origin_subtree() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Manual, none()).unwrap();
        let origin = tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        let child = tree.create_node(origin, DetectionMode::Default, none()).unwrap();
        let sibling = tree.create_node(root, DetectionMode::Manual, none()).unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, origin, EventKind::Internal).unwrap();
        assert_eq!(report.recomputed, vec![root, origin, child]);
        assert!(!report.is_recomputed(sibling));
    }

    #[test]
    fn distinct_equal_objects_are_a_change() {
        #[derive(Debug, PartialEq)]
        struct User {
            name: &'static str,
        }

        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, none()).unwrap();
        let card = tree
            .create_node(
                root,
                DetectionMode::Default,
                [("user", BindingValue::object(User { name: "ada" }))],
            )
            .unwrap();
        tree.set_binding(card, "user", BindingValue::object(User { name: "ada" }))
            .unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(report.recomputed, vec![root, card]);
        assert_eq!(report.dirty, vec![card]);
        assert!(tree.is_dirty(card));

        let again = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(again.recomputed, vec![root, card]);
        assert!(again.dirty.is_empty());
        assert!(!tree.is_dirty(card));
    }

    #[test]
    fn store_is_updated_before_callback() {
        let mut tree = ViewTree::new();
        let root = tree
            .create_root(DetectionMode::Default, [("n", BindingValue::from(1))])
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        tree.set_recompute(root, move |ctx| {
            sink.borrow_mut().push((
                ctx.is_changed("n"),
                ctx.binding("n").and_then(BindingValue::as_int),
            ));
            Ok(())
        })
        .unwrap();
        tree.set_binding(root, "n", 2.into()).unwrap();

        let mut scheduler = UpdateScheduler::new();
        scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        scheduler.schedule(&mut tree, root, EventKind::External).unwrap();

        assert_eq!(*seen.borrow(), vec![(true, Some(2)), (false, Some(2))]);
        assert_eq!(tree.store().get(root, "n").and_then(BindingValue::as_int), Some(2));
    }

    #[test]
    fn failure_skips_descendants_only() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, none()).unwrap();
        let broken = tree.create_node(root, DetectionMode::Default, none()).unwrap();
        let below = tree.create_node(broken, DetectionMode::Default, none()).unwrap();
        let sibling = tree.create_node(root, DetectionMode::Default, none()).unwrap();
        tree.set_recompute(broken, |_| Err("render failed".into())).unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(report.recomputed, vec![root, broken, sibling]);
        assert!(!report.is_recomputed(below));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].node, broken);

        let errors = report.into_result().unwrap_err();
        assert!(matches!(errors.failures[0].cause, FailureCause::Callback(_)));
    }

    #[test]
    fn panics_are_contained() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, none()).unwrap();
        let child = tree.create_node(root, DetectionMode::Default, none()).unwrap();
        tree.set_recompute(child, |_| panic!("bad state")).unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        match &report.failures[0].cause {
            FailureCause::Panicked(msg) => assert_eq!(msg, "bad state"),
            other => panic!("unexpected cause {other:?}"),
        }

        // The callback is reinstalled after a contained panic.
        let again = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(again.failures.len(), 1);
    }

    #[test]
    fn staged_writes_apply_before_children() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, none()).unwrap();
        let child = tree
            .create_node(root, DetectionMode::Default, [("total", BindingValue::from(0))])
            .unwrap();
        tree.set_recompute(root, move |ctx| {
            ctx.set_binding(child, "total", BindingValue::from(10));
            Ok(())
        })
        .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        tree.set_recompute(child, move |ctx| {
            sink.borrow_mut().push(ctx.is_changed("total"));
            Ok(())
        })
        .unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(report.recomputed, vec![root, child]);
        assert_eq!(report.dirty, vec![child]);
        assert_eq!(*seen.borrow(), vec![true]);
        assert_eq!(tree.store().get(child, "total").and_then(BindingValue::as_int), Some(10));
    }

    #[test]
    fn tracked_collection_delivers_edits() {
        let mut tree = ViewTree::new();
        let root = tree
            .create_root(
                DetectionMode::Default,
                [("rows", BindingValue::list([1.into(), 2.into()]))],
            )
            .unwrap();
        tree.track_collection(root, "rows", |item| ItemKey::Int(item.as_int().unwrap_or(-1)))
            .unwrap();
        let counts = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&counts);
        tree.set_recompute(root, move |ctx| {
            *sink.borrow_mut() = ctx.edits("rows").map(EditScript::counts);
            Ok(())
        })
        .unwrap();

        // A fresh list with the same keys and values is not a change.
        tree.set_binding(root, "rows", BindingValue::list([1.into(), 2.into()]))
            .unwrap();
        let mut scheduler = UpdateScheduler::new();
        let unchanged = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert!(unchanged.dirty.is_empty());
        assert!(counts.borrow().is_none());

        tree.set_binding(root, "rows", BindingValue::list([2.into(), 1.into(), 3.into()]))
            .unwrap();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(report.recomputed, vec![root]);
        let counts = counts.borrow().expect("edits delivered");
        assert_eq!(counts.moves, 1);
        assert_eq!(counts.inserts, 1);
    }

    #[test]
    fn duplicate_keys_fail_the_node() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, none()).unwrap();
        let list = tree
            .create_node(root, DetectionMode::Default, [("rows", BindingValue::list([]))])
            .unwrap();
        tree.track_collection(list, "rows", |_| ItemKey::Int(0)).unwrap();
        tree.set_binding(list, "rows", BindingValue::list([1.into(), 2.into()]))
            .unwrap();

        let mut scheduler = UpdateScheduler::new();
        let report = scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        assert_eq!(report.recomputed, vec![root]);
        assert!(matches!(
            report.failures[0].cause,
            FailureCause::DuplicateKey { .. }
        ));
        assert_eq!(tree.store().get(list, "rows").and_then(BindingValue::as_list).map(<[_]>::len), Some(0));
    }

    #[test]
    fn follow_ups_flush_in_passes() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Manual, none()).unwrap();
        let panel = tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        let fired = Rc::new(RefCell::new(0));
        let count = Rc::clone(&fired);
        tree.set_recompute(panel, move |ctx| {
            *count.borrow_mut() += 1;
            if *count.borrow() == 1 {
                ctx.enqueue_follow_up(ctx.node(), EventKind::Internal);
            }
            Ok(())
        })
        .unwrap();

        let mut scheduler = UpdateScheduler::new();
        scheduler.enqueue(panel, EventKind::Internal);
        let reports = scheduler.flush(&mut tree).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(*fired.borrow(), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn stale_event_keeps_the_rest_of_its_batch() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Manual, none()).unwrap();
        let panel = tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        let gone = tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        tree.remove_node(gone).unwrap();

        let mut scheduler = UpdateScheduler::new();
        scheduler.enqueue(gone, EventKind::Internal);
        scheduler.enqueue(panel, EventKind::Internal);
        assert_eq!(scheduler.flush(&mut tree).unwrap_err(), TreeError::StaleNode(gone));
        assert_eq!(scheduler.pending(), 1);

        let reports = scheduler.flush(&mut tree).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].recomputed, vec![root, panel]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn endless_follow_ups_hit_the_limit() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, none()).unwrap();
        tree.set_recompute(root, |ctx| {
            ctx.enqueue_follow_up(ctx.node(), EventKind::External);
            Ok(())
        })
        .unwrap();

        let mut scheduler =
            UpdateScheduler::with_config(UpdateConfig::default().with_max_follow_up_passes(3));
        scheduler.enqueue(root, EventKind::External);
        assert_eq!(
            scheduler.flush(&mut tree).unwrap_err(),
            TreeError::FollowUpLimit { passes: 4 }
        );
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn verify_stable_reads_without_updating() {
        let mut tree = ViewTree::new();
        let root = tree
            .create_root(DetectionMode::Default, [("n", BindingValue::from(1))])
            .unwrap();
        let scheduler = UpdateScheduler::new();
        assert!(scheduler.verify_stable(&tree).is_empty());

        tree.set_binding(root, "n", 5.into()).unwrap();
        let unstable = scheduler.verify_stable(&tree);
        assert_eq!(unstable.len(), 1);
        assert_eq!(&*unstable[0].name, "n");
        assert_eq!(tree.store().get(root, "n").and_then(BindingValue::as_int), Some(1));
    }

    #[test]
    fn schedule_errors() {
        let mut tree = ViewTree::new();
        let mut scheduler = UpdateScheduler::new();
        let ghost = NodeId::new(9, 0);
        assert_eq!(
            scheduler.schedule(&mut tree, ghost, EventKind::External).unwrap_err(),
            TreeError::NoRoot
        );
        tree.create_root(DetectionMode::Default, none()).unwrap();
        assert_eq!(
            scheduler.schedule(&mut tree, ghost, EventKind::Internal).unwrap_err(),
            TreeError::StaleNode(ghost)
        );
    }

    #[test]
    fn stats_accumulate() {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, none()).unwrap();
        tree.create_node(root, DetectionMode::Manual, none()).unwrap();
        let mut scheduler = UpdateScheduler::new();
        scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
        scheduler.schedule(&mut tree, root, EventKind::External).unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.walks, 2);
        assert_eq!(stats.visited, 4);
        assert_eq!(stats.pruned, 2);
        assert_eq!(stats.recomputed, 2);
    }
}
