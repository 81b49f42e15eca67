#![forbid(unsafe_code)]

//! Process-wide record of every chunk's load state.
//!
//! # State machine
//!
//! ```text
//! Unloaded ──begin──▶ Loading ──complete(Ok)──▶ Loaded
//!                       │  ▲
//!            complete(Err)  └──begin── Failed
//!                       ▼
//!                    Failed
//! ```
//!
//! # Invariants
//!
//! 1. At most one load per chunk is in flight: `begin` on a `Loading`
//!    chunk joins the existing load instead of starting another.
//! 2. All waiters of one load receive the same outcome, and the waiter list
//!    is empty outside `Loading`.
//! 3. Records are created on first reference and never removed.
//! 4. No `RefCell` borrow is held while a waiter is notified.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures::channel::oneshot;
use tracing::debug;

use crate::error::{ChunkLoadError, LoadFailure};
use crate::module::{ChunkId, ModuleHandle, RawModule};

pub(crate) type LoadOutcome = Result<ModuleHandle, ChunkLoadError>;

/// Load state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChunkState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        })
    }
}

#[derive(Default)]
struct ChunkRecord {
    state: ChunkState,
    handle: Option<ModuleHandle>,
    waiters: Vec<oneshot::Sender<LoadOutcome>>,
    error: Option<ChunkLoadError>,
    attempts: u32,
}

/// Result of [`ChunkRegistry::begin`].
pub(crate) enum Begin {
    /// Already loaded.
    Cached(ModuleHandle),
    /// A load is in flight; wait on it.
    Joined(oneshot::Receiver<LoadOutcome>),
    /// A new attempt started; the caller must drive the fetch.
    Started {
        waiter: oneshot::Receiver<LoadOutcome>,
        attempt: u32,
    },
}

/// Chunk load states shared by every scheduler of a process.
#[derive(Default)]
pub struct ChunkRegistry {
    records: RefCell<HashMap<ChunkId, ChunkRecord>>,
}

impl ChunkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A new registry behind a shared handle.
    #[must_use]
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::new())
    }

    #[must_use]
    pub fn state(&self, chunk: &ChunkId) -> ChunkState {
        self.records
            .borrow()
            .get(chunk)
            .map_or(ChunkState::Unloaded, |r| r.state)
    }

    /// The cached module, once loaded.
    #[must_use]
    pub fn handle(&self, chunk: &ChunkId) -> Option<ModuleHandle> {
        self.records.borrow().get(chunk).and_then(|r| r.handle.clone())
    }

    /// Error of the most recent failed attempt, while the chunk is `Failed`.
    #[must_use]
    pub fn last_error(&self, chunk: &ChunkId) -> Option<ChunkLoadError> {
        self.records.borrow().get(chunk).and_then(|r| r.error.clone())
    }

    /// Number of load attempts started for `chunk`.
    #[must_use]
    pub fn attempts(&self, chunk: &ChunkId) -> u32 {
        self.records.borrow().get(chunk).map_or(0, |r| r.attempts)
    }

    /// Waiters of the in-flight load that are still interested.
    #[must_use]
    pub fn waiter_count(&self, chunk: &ChunkId) -> usize {
        self.records.borrow().get(chunk).map_or(0, |r| {
            r.waiters.iter().filter(|w| !w.is_canceled()).count()
        })
    }

    /// Chunks currently `Loading`.
    #[must_use]
    pub fn loading_count(&self) -> usize {
        self.records
            .borrow()
            .values()
            .filter(|r| r.state == ChunkState::Loading)
            .count()
    }

    /// Number of chunks ever referenced.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Every known chunk with its state, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ChunkId, ChunkState)> {
        let mut states: Vec<_> = self
            .records
            .borrow()
            .iter()
            .map(|(id, r)| (id.clone(), r.state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Register interest in `chunk`, starting a new attempt when nothing is
    /// loaded or loading.
    pub(crate) fn begin(&self, chunk: &ChunkId) -> Begin {
        let mut records = self.records.borrow_mut();
        let record = records.entry(chunk.clone()).or_default();
        match (record.state, &record.handle) {
            (ChunkState::Loaded, Some(handle)) => Begin::Cached(handle.clone()),
            (ChunkState::Loading, _) => {
                let (tx, rx) = oneshot::channel();
                record.waiters.retain(|w| !w.is_canceled());
                record.waiters.push(tx);
                debug!(chunk = %chunk, waiters = record.waiters.len(), "joined in-flight load");
                Begin::Joined(rx)
            }
            _ => {
                let (tx, rx) = oneshot::channel();
                let from = record.state;
                record.state = ChunkState::Loading;
                record.error = None;
                record.attempts += 1;
                record.waiters.push(tx);
                debug!(chunk = %chunk, %from, attempt = record.attempts, "chunk loading");
                Begin::Started {
                    waiter: rx,
                    attempt: record.attempts,
                }
            }
        }
    }

    /// Settle the in-flight load of `chunk` and notify its waiters.
    pub(crate) fn complete(
        &self,
        chunk: &ChunkId,
        attempt: u32,
        result: Result<RawModule, LoadFailure>,
    ) -> LoadOutcome {
        let (outcome, waiters) = {
            let mut records = self.records.borrow_mut();
            let record = records.entry(chunk.clone()).or_default();
            let outcome = match result {
                Ok(raw) => {
                    let handle = ModuleHandle::new(chunk.clone(), attempt, raw);
                    record.state = ChunkState::Loaded;
                    record.handle = Some(handle.clone());
                    record.error = None;
                    Ok(handle)
                }
                Err(cause) => {
                    let err = ChunkLoadError {
                        chunk: chunk.clone(),
                        cause,
                    };
                    record.state = ChunkState::Failed;
                    record.error = Some(err.clone());
                    Err(err)
                }
            };
            (outcome, std::mem::take(&mut record.waiters))
        };

        debug!(
            chunk = %chunk,
            attempt,
            to = %self.state(chunk),
            waiters = waiters.len(),
            "chunk settled"
        );
        for waiter in waiters {
            // A dropped receiver means that caller stopped waiting.
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }
}

impl fmt::Debug for ChunkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkRegistry")
            .field("chunks", &self.snapshot())
            .finish()
    }
}
