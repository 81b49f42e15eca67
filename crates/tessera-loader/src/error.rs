#![forbid(unsafe_code)]

//! Loader errors.
//!
//! A [`ChunkLoadError`] is terminal for one load attempt only: every waiter
//! of that attempt receives a clone, and the next request for the chunk
//! starts a fresh attempt.

use std::fmt;

use crate::module::ChunkId;
use crate::route::RouteId;

/// Failure reported by a [`ChunkFetcher`](crate::ChunkFetcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    message: String,
}

impl FetchError {
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

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FetchError {}

/// Why a load attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// The transport rejected the fetch.
    Fetch(FetchError),
    /// The executor refused to run the load task.
    SpawnRejected,
    /// The load task or the registry was dropped before the load settled.
    Abandoned,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "fetch failed: {err}"),
            Self::SpawnRejected => f.write_str("executor rejected the load task"),
            Self::Abandoned => f.write_str("load abandoned"),
        }
    }
}

/// A load attempt for `chunk` failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLoadError {
    pub chunk: ChunkId,
    pub cause: LoadFailure,
}

impl fmt::Display for ChunkLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk `{}`: {}", self.chunk, self.cause)
    }
}

impl std::error::Error for ChunkLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            LoadFailure::Fetch(err) => Some(err),
            LoadFailure::SpawnRejected | LoadFailure::Abandoned => None,
        }
    }
}

/// Error of a deadline-bounded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    Load(ChunkLoadError),
    /// The deadline fired first. The load keeps running.
    TimedOut { chunk: ChunkId },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(err) => err.fmt(f),
            Self::TimedOut { chunk } => write!(f, "chunk `{chunk}`: request timed out"),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Load(err) => Some(err),
            Self::TimedOut { .. } => None,
        }
    }
}

impl From<ChunkLoadError> for RequestError {
    fn from(err: ChunkLoadError) -> Self {
        Self::Load(err)
    }
}

/// Error of [`Navigator`](crate::Navigator) and [`RouteGraph`](crate::RouteGraph)
/// operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    UnknownRoute(RouteId),
}

impl fmt::Display for NavigationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRoute(route) => write!(f, "unknown route `{route}`"),
        }
    }
}

impl std::error::Error for NavigationError {}
