#![forbid(unsafe_code)]

//! Tessera Loader
//!
//! On-demand chunk loading for a single-threaded cooperative runtime.
//! Chunks are fetched at most once at a time, cached for the life of the
//! [`ChunkRegistry`], and may be preloaded speculatively without ever
//! delaying an explicit request.
//!
//! # Key Components
//!
//! - [`ChunkRegistry`] - Shared load state of every chunk
//! - [`LoadScheduler`] - Request deduplication, caching and preloading
//! - [`ChunkFetcher`] - Transport seam supplied by the host
//! - [`RouteGraph`] / [`Navigator`] - Route-driven requests and preloads
//!
//! # Example
//!
//! ```
//! use futures::executor::LocalPool;
//! use futures::future::{FutureExt, LocalBoxFuture};
//! use tessera_loader::{ChunkId, ChunkRegistry, FetchError, LoadScheduler, RawModule};
//!
//! fn fetch(chunk: &ChunkId) -> LocalBoxFuture<'static, Result<RawModule, FetchError>> {
//!     let name = chunk.to_string();
//!     async move { Ok(RawModule::new(name)) }.boxed_local()
//! }
//!
//! let mut pool = LocalPool::new();
//! let scheduler = LoadScheduler::new(ChunkRegistry::shared(), fetch, pool.spawner());
//!
//! let first = scheduler.request("settings");
//! let second = scheduler.request("settings");
//! let (a, b) = pool.run_until(futures::future::join(first, second));
//! assert!(tessera_loader::ModuleHandle::ptr_eq(&a.unwrap(), &b.unwrap()));
//! ```

pub mod error;
pub mod fetch;
pub mod module;
pub mod registry;
pub mod route;
pub mod scheduler;

pub use error::{ChunkLoadError, FetchError, LoadFailure, NavigationError, RequestError};
pub use fetch::ChunkFetcher;
pub use module::{ChunkId, ModuleHandle, RawModule};
pub use registry::{ChunkRegistry, ChunkState};
pub use route::{
    Navigator, NoPreloading, PreloadAll, PreloadNeighbors, PreloadStrategy, RouteGraph, RouteId,
};
pub use scheduler::{
    ChunkRequest, LoadScheduler, LoaderConfig, LoaderStats, PreloadContext, PreloadOutcome,
};
