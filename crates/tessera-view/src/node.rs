#![forbid(unsafe_code)]

//! View nodes and the arena-backed view tree.
//!
//! Nodes live in a slot arena indexed by generational [`NodeId`]s. Children
//! are stored as ordered id lists and the parent as a non-owning id, so the
//! parent/child cycle never becomes an ownership cycle. The tree is the sole
//! owner of every node: removing a node destroys its whole subtree.
//!
//! # Invariants
//!
//! 1. A live node's id always resolves to that node; ids of removed nodes
//!    are rejected with [`TreeError::StaleNode`], even after slot reuse.
//! 2. A node's [`DetectionMode`] is fixed at creation.
//! 3. Every live node has a record in the [`BindingStore`], initialised from
//!    the bindings it was created with.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::binding::{BindingStore, BindingValue, KeyFn};
use crate::error::TreeError;
use crate::scheduler::RecomputeFn;

/// Generational index of a node in a [`ViewTree`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Build an id from raw parts (for tests and diagnostics).
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// How a node participates in a full update pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DetectionMode {
    /// Checked on every pass that reaches it.
    #[default]
    Default,
    /// Checked only when marked or when an internal event originates on it.
    /// Otherwise its whole subtree is skipped, changed bindings included.
    Manual,
}

bitflags! {
    /// Per-node walk flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeFlags: u8 {
        /// One binding changed during the most recent walk.
        const DIRTY = 1 << 0;
        /// One-shot eligibility from an explicit mark.
        const MARKED = 1 << 1;
        /// One-shot eligibility from an internal event on this node.
        const INTERNAL_EVENT = 1 << 2;
    }
}

pub(crate) struct ViewNode {
    pub(crate) mode: DetectionMode,
    pub(crate) flags: NodeFlags,
    pub(crate) bindings: BTreeMap<Rc<str>, BindingValue>,
    pub(crate) collections: BTreeMap<Rc<str>, KeyFn>,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) recompute: Option<RecomputeFn>,
}

impl ViewNode {
    fn new(
        mode: DetectionMode,
        parent: Option<NodeId>,
        bindings: BTreeMap<Rc<str>, BindingValue>,
    ) -> Self {
        Self {
            mode,
            flags: NodeFlags::empty(),
            bindings,
            collections: BTreeMap::new(),
            children: SmallVec::new(),
            parent,
            recompute: None,
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<ViewNode>,
}

/// Arena of view nodes plus their binding store.
///
/// # Example
///
/// ```
/// use tessera_view::{DetectionMode, ViewTree};
///
/// let mut tree = ViewTree::new();
/// let root = tree.create_root(DetectionMode::Default, [("title", "Inbox".into())]).unwrap();
/// let row = tree.create_node(root, DetectionMode::Manual, [("count", 3.into())]).unwrap();
///
/// assert_eq!(tree.parent(row), Some(root));
/// assert_eq!(tree.children(root), &[row]);
/// ```
#[derive(Default)]
pub struct ViewTree {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    root: Option<NodeId>,
    store: BindingStore,
    live: usize,
    /// Nodes flagged dirty by the most recent walk.
    pub(crate) last_dirty: Vec<NodeId>,
}

impl ViewTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the root node. A tree has at most one root.
    pub fn create_root<N, I>(&mut self, mode: DetectionMode, bindings: I) -> Result<NodeId, TreeError>
    where
        N: Into<Rc<str>>,
        I: IntoIterator<Item = (N, BindingValue)>,
    {
        if let Some(root) = self.root {
            return Err(TreeError::RootExists(root));
        }
        let id = self.alloc(ViewNode::new(mode, None, collect_bindings(bindings)))?;
        self.root = Some(id);
        tracing::trace!(node = %id, ?mode, "created root node");
        Ok(id)
    }

    /// Create a node as the last child of `parent`.
    ///
    /// The node's recorded bindings start equal to `bindings`, so a fresh
    /// node has no pending changes.
    pub fn create_node<N, I>(
        &mut self,
        parent: NodeId,
        mode: DetectionMode,
        bindings: I,
    ) -> Result<NodeId, TreeError>
    where
        N: Into<Rc<str>>,
        I: IntoIterator<Item = (N, BindingValue)>,
    {
        self.node(parent)?;
        let id = self.alloc(ViewNode::new(mode, Some(parent), collect_bindings(bindings)))?;
        self.node_mut(parent)?.children.push(id);
        tracing::trace!(node = %id, parent = %parent, ?mode, "created node");
        Ok(id)
    }

    /// Set the current value of a binding. Returns the previous current value.
    ///
    /// The change is observed by the next walk that considers the node.
    pub fn set_binding(
        &mut self,
        node: NodeId,
        name: impl Into<Rc<str>>,
        value: BindingValue,
    ) -> Result<Option<BindingValue>, TreeError> {
        Ok(self.node_mut(node)?.bindings.insert(name.into(), value))
    }

    /// Remove `node` and all of its descendants. Returns how many nodes were
    /// destroyed.
    pub fn remove_node(&mut self, node: NodeId) -> Result<usize, TreeError> {
        let parent = self.node(node)?.parent;
        if let Some(parent) = parent {
            let siblings = &mut self.node_mut(parent)?.children;
            siblings.retain(|child| *child != node);
        } else if self.root == Some(node) {
            self.root = None;
        }

        let mut removed = 0;
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let slot = &mut self.slots[id.index as usize];
            let Some(dead) = slot.node.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(id.index);
            self.store.forget(id);
            stack.extend(dead.children.iter().copied());
            removed += 1;
        }
        self.live -= removed;
        tracing::trace!(node = %node, removed, "removed subtree");
        Ok(removed)
    }

    /// Install the callback fired when `node` is recomputed.
    pub fn set_recompute<F>(&mut self, node: NodeId, callback: F) -> Result<(), TreeError>
    where
        F: FnMut(&mut crate::scheduler::RecomputeContext<'_>) -> Result<(), crate::error::RecomputeError>
            + 'static,
    {
        self.node_mut(node)?.recompute = Some(Box::new(callback));
        Ok(())
    }

    /// Reconcile the collection binding `name` by key instead of comparing it
    /// by identity.
    pub fn track_collection<F>(
        &mut self,
        node: NodeId,
        name: impl Into<Rc<str>>,
        key: F,
    ) -> Result<(), TreeError>
    where
        F: Fn(&BindingValue) -> crate::binding::ItemKey + 'static,
    {
        self.node_mut(node)?.collections.insert(name.into(), Rc::new(key));
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.node(node).is_ok()
    }

    #[must_use]
    pub fn mode(&self, node: NodeId) -> Option<DetectionMode> {
        self.node(node).ok().map(|n| n.mode)
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).ok().and_then(|n| n.parent)
    }

    /// Children of `node` in order. Empty for unknown ids.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Current value of a binding (not the recorded one).
    #[must_use]
    pub fn binding(&self, node: NodeId, name: &str) -> Option<&BindingValue> {
        self.node(node).ok().and_then(|n| n.bindings.get(name))
    }

    /// Whether `node` had a changed binding during the most recent walk.
    #[must_use]
    pub fn is_dirty(&self, node: NodeId) -> bool {
        self.flag(node, NodeFlags::DIRTY)
    }

    /// Whether `node` carries an unconsumed mark.
    #[must_use]
    pub fn is_marked(&self, node: NodeId) -> bool {
        self.flag(node, NodeFlags::MARKED)
    }

    /// Iterate from `node`'s parent up to the root.
    pub fn ancestors(&self, node: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(node),
        }
    }

    /// Last-observed binding values.
    #[must_use]
    pub fn store(&self) -> &BindingStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut BindingStore {
        &mut self.store
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&ViewNode, TreeError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(TreeError::StaleNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut ViewNode, TreeError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(TreeError::StaleNode(id))
    }

    /// Set `flag` on `node` and every ancestor up to the root.
    pub(crate) fn flag_path(&mut self, node: NodeId, flag: NodeFlags) -> Result<usize, TreeError> {
        let mut current = Some(node);
        let mut count = 0;
        while let Some(id) = current {
            let n = self.node_mut(id)?;
            n.flags.insert(flag);
            current = n.parent;
            count += 1;
        }
        Ok(count)
    }

    fn flag(&self, node: NodeId, flag: NodeFlags) -> bool {
        self.node(node).is_ok_and(|n| n.flags.contains(flag))
    }

    fn alloc(&mut self, node: ViewNode) -> Result<NodeId, TreeError> {
        let bindings = node.bindings.clone();
        let id = if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId::new(index, slot.generation)
        } else {
            let index = slot_index(self.slots.len())?;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId::new(index, 0)
        };
        self.store.init_node(id, &bindings);
        self.live += 1;
        Ok(id)
    }
}

/// Index of the next fresh slot. Ids address at most `u32::MAX + 1` slots.
fn slot_index(len: usize) -> Result<u32, TreeError> {
    u32::try_from(len).map_err(|_| TreeError::CapacityExceeded)
}

impl fmt::Debug for ViewTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewTree")
            .field("root", &self.root)
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Iterator over a node's ancestors, nearest first.
pub struct Ancestors<'a> {
    tree: &'a ViewTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

fn collect_bindings<N, I>(bindings: I) -> BTreeMap<Rc<str>, BindingValue>
where
    N: Into<Rc<str>>,
    I: IntoIterator<Item = (N, BindingValue)>,
{
    bindings
        .into_iter()
        .map(|(name, value)| (name.into(), value))
        .collect()
}
