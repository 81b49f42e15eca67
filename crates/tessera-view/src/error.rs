#![forbid(unsafe_code)]

//! Error types for the view engine.
//!
//! | Error | Scope | Behavior |
//! |-------|-------|----------|
//! | [`TreeError`] | one API call | returned synchronously, nothing changed |
//! | [`ViewUpdateFailure`] | one node's subtree | collected in the walk report, walk continues |
//! | [`DuplicateKeyError`](crate::reconcile::DuplicateKeyError) | one reconcile call | surfaced as a failure of the owning node |

use std::fmt;

use crate::binding::ItemKey;
use crate::node::NodeId;
use crate::reconcile::DuplicateKeyError;

/// Misuse of the tree API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The id does not name a live node.
    StaleNode(NodeId),
    /// The tree has no root to walk from.
    NoRoot,
    /// `create_root` was called on a tree that already has one.
    RootExists(NodeId),
    /// Follow-up events kept re-triggering walks past the configured limit.
    FollowUpLimit { passes: usize },
    /// Every slot index a [`NodeId`] can address is taken.
    CapacityExceeded,
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleNode(id) => write!(f, "node {id} is not part of the tree"),
            Self::NoRoot => f.write_str("view tree has no root"),
            Self::RootExists(id) => write!(f, "view tree already has root {id}"),
            Self::FollowUpLimit { passes } => {
                write!(f, "follow-up events still pending after {passes} passes")
            }
            Self::CapacityExceeded => f.write_str("view tree has no free node slots"),
        }
    }
}

impl std::error::Error for TreeError {}

/// Error returned by a recompute callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeError {
    message: String,
}

impl RecomputeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RecomputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RecomputeError {}

impl From<&str> for RecomputeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RecomputeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Why a node failed to update.
#[derive(Debug, Clone)]
pub enum FailureCause {
    /// The recompute callback returned an error.
    Callback(RecomputeError),
    /// The recompute callback panicked; holds the panic message.
    Panicked(String),
    /// A tracked collection binding held two items with the same key.
    DuplicateKey {
        binding: String,
        error: DuplicateKeyError<ItemKey>,
    },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(err) => write!(f, "recompute failed: {err}"),
            Self::Panicked(msg) => write!(f, "recompute panicked: {msg}"),
            Self::DuplicateKey { binding, error } => write!(f, "binding `{binding}`: {error}"),
        }
    }
}

/// Update failure scoped to one node. The node's descendants were skipped
/// for the walk that produced it.
#[derive(Debug, Clone)]
pub struct ViewUpdateFailure {
    pub node: NodeId,
    pub cause: FailureCause,
}

impl fmt::Display for ViewUpdateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}: {}", self.node, self.cause)
    }
}

impl std::error::Error for ViewUpdateFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            FailureCause::Callback(err) => Some(err),
            FailureCause::DuplicateKey { error, .. } => Some(error),
            FailureCause::Panicked(_) => None,
        }
    }
}

/// All failures of one walk.
#[derive(Debug, Clone)]
pub struct ViewUpdateErrors {
    pub failures: Vec<ViewUpdateFailure>,
}

impl fmt::Display for ViewUpdateErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node(s) failed to update", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ViewUpdateErrors {}
