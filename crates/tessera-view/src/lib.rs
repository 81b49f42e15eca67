#![forbid(unsafe_code)]

//! Tessera View
//!
//! Incremental view-update engine. Given a tree of stateful view nodes and
//! an event, it decides which nodes must be recomputed, updates their
//! recorded bindings, and runs their recompute callbacks.
//!
//! # Key Components
//!
//! - [`ViewTree`] - Arena of view nodes with generational [`NodeId`]s
//! - [`BindingValue`] - Binding values compared by identity, never structurally
//! - [`BindingStore`] - Last-observed binding values per node
//! - [`UpdateScheduler`] - Mode-aware walk producing the recompute set
//! - [`reconcile`](reconcile::reconcile) - Keyed list diff with minimal moves
//!
//! # Example
//!
//! ```
//! use tessera_view::{BindingValue, DetectionMode, EventKind, UpdateScheduler, ViewTree};
//!
//! let mut tree = ViewTree::new();
//! let app = tree.create_root(DetectionMode::Default, [("title", "Inbox".into())]).unwrap();
//! let list = tree
//!     .create_node(app, DetectionMode::Manual, [("unread", BindingValue::from(3))])
//!     .unwrap();
//!
//! let mut scheduler = UpdateScheduler::new();
//!
//! // A changed input alone does not wake a manual node.
//! tree.set_binding(list, "unread", 4.into()).unwrap();
//! let report = scheduler.schedule(&mut tree, app, EventKind::External).unwrap();
//! assert_eq!(report.recomputed, vec![app]);
//!
//! // Marking it does, once.
//! scheduler.schedule(&mut tree, list, EventKind::ManualMark).unwrap();
//! let report = scheduler.schedule(&mut tree, app, EventKind::External).unwrap();
//! assert_eq!(report.recomputed, vec![app, list]);
//! assert_eq!(report.dirty, vec![list]);
//! ```

pub mod binding;
pub mod error;
pub mod node;
pub mod reconcile;
pub mod scheduler;

pub use binding::{BindingRecord, BindingStore, BindingValue, Identity, ItemKey, KeyFn};
pub use error::{FailureCause, RecomputeError, TreeError, ViewUpdateErrors, ViewUpdateFailure};
pub use node::{Ancestors, DetectionMode, NodeId, ViewTree};
pub use reconcile::{DuplicateKeyError, EditCounts, EditOp, EditScript, KeySide, reconcile};
pub use scheduler::{
    EventKind, ListEdits, RecomputeContext, RecomputeFn, SchedulerStats, UnstableBinding,
    UpdateConfig, UpdateScheduler, WalkReport,
};
