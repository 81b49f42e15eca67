#![forbid(unsafe_code)]

//! On-demand and speculative chunk loading.
//!
//! [`LoadScheduler::request`] performs the registry transition at the call
//! site and returns a [`ChunkRequest`] future. The only suspension point of
//! a load is the transport fetch, which runs as a task on the host's
//! [`LocalSpawn`] executor; the request future only waits for the outcome.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | fetch fails | every waiter of the attempt gets the same `ChunkLoadError` |
//! | executor rejects the task | attempt fails with `LoadFailure::SpawnRejected` |
//! | executor drops the task before it settles | attempt fails with `LoadFailure::Abandoned` |
//! | caller drops its `ChunkRequest` | only that waiter is removed |
//! | deadline fires first | `RequestError::TimedOut`, the load keeps running |
//! | preload fails | logged at `warn`, never surfaced |

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{self, Either};
use futures::task::{LocalSpawn, LocalSpawnExt};
use tracing::{debug, trace, warn};

use crate::error::{ChunkLoadError, LoadFailure, RequestError};
use crate::fetch::ChunkFetcher;
use crate::module::{ChunkId, ModuleHandle, RawModule};
use crate::registry::{Begin, ChunkRegistry, ChunkState, LoadOutcome};

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LoaderConfig {
    /// Whether [`LoadScheduler::preload`] may start loads at all.
    pub preload_enabled: bool,
    /// Preloads are skipped while this many loads started by earlier
    /// preloads are still running. Explicit requests do not count.
    pub max_inflight_preloads: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            preload_enabled: true,
            max_inflight_preloads: 4,
        }
    }
}

impl LoaderConfig {
    #[must_use]
    pub fn with_preload_enabled(mut self, enabled: bool) -> Self {
        self.preload_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_max_inflight_preloads(mut self, max: usize) -> Self {
        self.max_inflight_preloads = max;
        self
    }
}

/// Cumulative loader counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub joined: u64,
    pub fetches_started: u64,
    pub failures: u64,
    pub preloads_started: u64,
    pub preloads_skipped: u64,
}

/// What a preload predicate may inspect.
pub struct PreloadContext<'a> {
    chunk: &'a ChunkId,
    state: ChunkState,
    inflight: usize,
    preloading: usize,
    registry: &'a ChunkRegistry,
}

impl PreloadContext<'_> {
    #[must_use]
    pub fn chunk(&self) -> &ChunkId {
        self.chunk
    }

    #[must_use]
    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Chunks loading at the time of the call.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inflight
    }

    /// Preloads still running at the time of the call.
    #[must_use]
    pub fn preloading(&self) -> usize {
        self.preloading
    }

    #[must_use]
    pub fn registry(&self) -> &ChunkRegistry {
        self.registry
    }
}

/// Outcome of [`LoadScheduler::preload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadOutcome {
    Started,
    AlreadyLoaded,
    AlreadyLoading,
    Declined,
    Disabled,
    OverBudget,
}

/// Future resolving to the outcome of one chunk request.
///
/// Dropping it removes only this caller's interest; the load continues.
#[must_use = "a chunk request does nothing for the caller unless awaited"]
pub struct ChunkRequest {
    chunk: ChunkId,
    inner: RequestInner,
}

enum RequestInner {
    Ready(Option<LoadOutcome>),
    Waiting(oneshot::Receiver<LoadOutcome>),
}

impl ChunkRequest {
    fn ready(chunk: ChunkId, outcome: LoadOutcome) -> Self {
        Self {
            chunk,
            inner: RequestInner::Ready(Some(outcome)),
        }
    }

    fn waiting(chunk: ChunkId, waiter: oneshot::Receiver<LoadOutcome>) -> Self {
        Self {
            chunk,
            inner: RequestInner::Waiting(waiter),
        }
    }

    #[must_use]
    pub fn chunk(&self) -> &ChunkId {
        &self.chunk
    }

    fn abandoned(&self) -> ChunkLoadError {
        ChunkLoadError {
            chunk: self.chunk.clone(),
            cause: LoadFailure::Abandoned,
        }
    }
}

impl Future for ChunkRequest {
    type Output = Result<ModuleHandle, ChunkLoadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            RequestInner::Ready(outcome) => {
                let outcome = outcome.take();
                Poll::Ready(outcome.unwrap_or_else(|| Err(this.abandoned())))
            }
            RequestInner::Waiting(waiter) => match Pin::new(waiter).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(this.abandoned())),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl fmt::Debug for ChunkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            RequestInner::Ready(Some(_)) => "ready",
            RequestInner::Ready(None) => "taken",
            RequestInner::Waiting(_) => "waiting",
        };
        f.debug_struct("ChunkRequest")
            .field("chunk", &self.chunk)
            .field("state", &state)
            .finish()
    }
}

/// Orchestrates chunk loads against a shared [`ChunkRegistry`].
///
/// Clones share the registry, the transport, the executor and the counters.
#[derive(Clone)]
pub struct LoadScheduler {
    registry: Rc<ChunkRegistry>,
    fetcher: Rc<dyn ChunkFetcher>,
    spawner: Rc<dyn LocalSpawn>,
    config: LoaderConfig,
    stats: Rc<Cell<LoaderStats>>,
    preloading: Rc<Cell<usize>>,
}

impl LoadScheduler {
    pub fn new(
        registry: Rc<ChunkRegistry>,
        fetcher: impl ChunkFetcher + 'static,
        spawner: impl LocalSpawn + 'static,
    ) -> Self {
        Self::with_config(registry, fetcher, spawner, LoaderConfig::default())
    }

    pub fn with_config(
        registry: Rc<ChunkRegistry>,
        fetcher: impl ChunkFetcher + 'static,
        spawner: impl LocalSpawn + 'static,
        config: LoaderConfig,
    ) -> Self {
        Self {
            registry,
            fetcher: Rc::new(fetcher),
            spawner: Rc::new(spawner),
            config,
            stats: Rc::default(),
            preloading: Rc::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Rc<ChunkRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        self.stats.get()
    }

    #[must_use]
    pub fn state(&self, chunk: &ChunkId) -> ChunkState {
        self.registry.state(chunk)
    }

    /// Request a chunk.
    ///
    /// A loaded chunk resolves immediately. A loading chunk joins the
    /// in-flight load. Otherwise a new attempt starts before this returns.
    pub fn request(&self, chunk: impl Into<ChunkId>) -> ChunkRequest {
        self.bump(|s| s.requests += 1);
        self.begin(chunk.into())
    }

    /// Race a request against `deadline`. On timeout the load keeps running
    /// in the registry for later callers.
    pub fn request_with_deadline<C, D>(
        &self,
        chunk: C,
        deadline: D,
    ) -> impl Future<Output = Result<ModuleHandle, RequestError>> + use<C, D>
    where
        C: Into<ChunkId>,
        D: Future<Output = ()>,
    {
        let request = self.request(chunk);
        async move {
            let chunk = request.chunk().clone();
            match future::select(request, pin!(deadline)).await {
                Either::Left((outcome, _)) => outcome.map_err(RequestError::Load),
                Either::Right(((), _)) => {
                    debug!(chunk = %chunk, "chunk request timed out");
                    Err(RequestError::TimedOut { chunk })
                }
            }
        }
    }

    /// Speculatively load `chunk` if `predicate` agrees. Never blocks and
    /// never surfaces a failure; a later [`request`](Self::request) shares
    /// the same load.
    pub fn preload<P>(&self, chunk: impl Into<ChunkId>, predicate: P) -> PreloadOutcome
    where
        P: FnOnce(&PreloadContext<'_>) -> bool,
    {
        let chunk = chunk.into();
        let outcome = self.preload_decision(&chunk, predicate);
        if outcome != PreloadOutcome::Started {
            self.bump(|s| s.preloads_skipped += 1);
            trace!(chunk = %chunk, ?outcome, "preload skipped");
            return outcome;
        }

        self.bump(|s| s.preloads_started += 1);
        debug!(chunk = %chunk, "preload started");
        let slot = PreloadSlot::take(&self.preloading);
        let request = self.begin(chunk.clone());
        let watcher = async move {
            let _slot = slot;
            match request.await {
                Ok(handle) => trace!(chunk = %handle.chunk(), "preload finished"),
                Err(err) => warn!(chunk = %err.chunk, error = %err.cause, "preload failed"),
            }
        };
        if let Err(err) = self.spawner.spawn_local(watcher) {
            debug!(chunk = %chunk, error = %err, "preload watcher not spawned");
        }
        outcome
    }

    fn preload_decision<P>(&self, chunk: &ChunkId, predicate: P) -> PreloadOutcome
    where
        P: FnOnce(&PreloadContext<'_>) -> bool,
    {
        if !self.config.preload_enabled {
            return PreloadOutcome::Disabled;
        }
        let state = self.registry.state(chunk);
        match state {
            ChunkState::Loaded => return PreloadOutcome::AlreadyLoaded,
            ChunkState::Loading => return PreloadOutcome::AlreadyLoading,
            ChunkState::Unloaded | ChunkState::Failed => {}
        }
        let preloading = self.preloading.get();
        let ctx = PreloadContext {
            chunk,
            state,
            inflight: self.registry.loading_count(),
            preloading,
            registry: &self.registry,
        };
        if !predicate(&ctx) {
            return PreloadOutcome::Declined;
        }
        if preloading >= self.config.max_inflight_preloads {
            return PreloadOutcome::OverBudget;
        }
        PreloadOutcome::Started
    }

    fn begin(&self, chunk: ChunkId) -> ChunkRequest {
        match self.registry.begin(&chunk) {
            Begin::Cached(handle) => {
                self.bump(|s| s.cache_hits += 1);
                trace!(chunk = %chunk, "chunk cache hit");
                ChunkRequest::ready(chunk, Ok(handle))
            }
            Begin::Joined(waiter) => {
                self.bump(|s| s.joined += 1);
                ChunkRequest::waiting(chunk, waiter)
            }
            Begin::Started { waiter, attempt } => {
                self.spawn_fetch(&chunk, attempt);
                ChunkRequest::waiting(chunk, waiter)
            }
        }
    }

    fn spawn_fetch(&self, chunk: &ChunkId, attempt: u32) {
        self.bump(|s| s.fetches_started += 1);
        let spawned = Rc::new(Cell::new(false));
        let mut guard = AttemptGuard {
            registry: Rc::clone(&self.registry),
            stats: Rc::clone(&self.stats),
            chunk: chunk.clone(),
            attempt,
            spawned: Rc::clone(&spawned),
            settled: false,
        };
        let fetcher = Rc::clone(&self.fetcher);
        let task = async move {
            let result = fetcher.fetch(&guard.chunk).await.map_err(LoadFailure::Fetch);
            if let Err(err) = guard.settle(result) {
                debug!(chunk = %err.chunk, error = %err.cause, "chunk load failed");
            }
        };
        match self.spawner.spawn_local(task) {
            Ok(()) => spawned.set(true),
            // The rejected task was dropped inside the call and settled the attempt.
            Err(err) => warn!(chunk = %chunk, error = %err, "executor rejected chunk load"),
        }
    }

    fn bump(&self, update: impl FnOnce(&mut LoaderStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}

/// One unit of the preload budget, held by a preload's watcher task.
struct PreloadSlot(Rc<Cell<usize>>);

impl PreloadSlot {
    fn take(count: &Rc<Cell<usize>>) -> Self {
        count.set(count.get() + 1);
        Self(Rc::clone(count))
    }
}

impl Drop for PreloadSlot {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Owns the outcome of one load attempt inside its fetch task.
///
/// Dropping it unsettled fails the attempt, so waiters never outlive the
/// task that was meant to wake them.
struct AttemptGuard {
    registry: Rc<ChunkRegistry>,
    stats: Rc<Cell<LoaderStats>>,
    chunk: ChunkId,
    attempt: u32,
    /// Set once the executor accepted the task.
    spawned: Rc<Cell<bool>>,
    settled: bool,
}

impl AttemptGuard {
    fn settle(&mut self, result: Result<RawModule, LoadFailure>) -> LoadOutcome {
        self.settled = true;
        let outcome = self.registry.complete(&self.chunk, self.attempt, result);
        if outcome.is_err() {
            let mut stats = self.stats.get();
            stats.failures += 1;
            self.stats.set(stats);
        }
        outcome
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let cause = if self.spawned.get() {
            LoadFailure::Abandoned
        } else {
            LoadFailure::SpawnRejected
        };
        trace!(chunk = %self.chunk, attempt = self.attempt, %cause, "fetch task dropped");
        let _ = self.settle(Err(cause));
    }
}

impl fmt::Debug for LoadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadScheduler")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("stats", &self.stats.get())
            .finish_non_exhaustive()
    }
}
