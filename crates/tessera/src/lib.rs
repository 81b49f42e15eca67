#![forbid(unsafe_code)]

//! Tessera public facade crate.
//!
//! Re-exports the view-update engine ([`view`]) and the chunk loader
//! ([`loader`]) with a prelude for day-to-day usage, plus the combined
//! [`EngineConfig`].

use std::rc::Rc;

use futures::task::LocalSpawn;

pub mod config;

pub use config::{ConfigError, EngineConfig};

// --- View re-exports -------------------------------------------------------

pub use tessera_view::{
    BindingStore, BindingValue, DetectionMode, EventKind, ItemKey, NodeId, RecomputeContext,
    RecomputeError, TreeError, UpdateConfig, UpdateScheduler, ViewTree, ViewUpdateErrors,
    ViewUpdateFailure, WalkReport,
};

// --- Loader re-exports -----------------------------------------------------

pub use tessera_loader::{
    ChunkFetcher, ChunkId, ChunkLoadError, ChunkRegistry, ChunkRequest, ChunkState, FetchError,
    LoadScheduler, LoaderConfig, ModuleHandle, Navigator, PreloadOutcome, RawModule, RouteGraph,
    RouteId,
};

/// View tree, scheduler and loader built from one [`EngineConfig`].
///
/// The chunk registry is passed in, so several sessions can share one.
#[derive(Debug)]
pub struct Session {
    pub tree: ViewTree,
    pub updates: UpdateScheduler,
    pub loader: LoadScheduler,
}

impl Session {
    pub fn new(
        config: &EngineConfig,
        registry: Rc<ChunkRegistry>,
        fetcher: impl ChunkFetcher + 'static,
        spawner: impl LocalSpawn + 'static,
    ) -> Self {
        Self {
            tree: ViewTree::new(),
            updates: UpdateScheduler::with_config(config.view.clone()),
            loader: LoadScheduler::with_config(registry, fetcher, spawner, config.loader.clone()),
        }
    }
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        BindingValue, ChunkId, DetectionMode, EngineConfig, EventKind, LoadScheduler, NodeId,
        Session, UpdateScheduler, ViewTree,
    };

    pub use crate::{loader, view};
}

pub use tessera_loader as loader;
pub use tessera_view as view;
