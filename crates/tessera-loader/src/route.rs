#![forbid(unsafe_code)]

//! Navigation graph and route-driven preloading.
//!
//! A [`RouteGraph`] maps routes to the chunk that implements them and links
//! routes a user can navigate between. A [`Navigator`] requests the chunk of
//! the route being entered and then preloads whatever its
//! [`PreloadStrategy`] selects around it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::NavigationError;
use crate::module::ChunkId;
use crate::registry::ChunkState;
use crate::scheduler::{ChunkRequest, LoadScheduler, PreloadOutcome};

/// Identifier of a route.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(Rc<str>);

impl RouteId {
    pub fn new(id: impl Into<Rc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteId({:?})", &*self.0)
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RouteId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Default)]
struct RouteEntry {
    chunk: Option<ChunkId>,
    links: BTreeSet<RouteId>,
}

/// Directed graph of routes and the chunks they need.
#[derive(Debug, Default)]
pub struct RouteGraph {
    routes: BTreeMap<RouteId, RouteEntry>,
}

impl RouteGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, or replace its chunk while keeping its links.
    pub fn add_route(&mut self, route: impl Into<RouteId>, chunk: Option<ChunkId>) -> &mut Self {
        self.routes.entry(route.into()).or_default().chunk = chunk;
        self
    }

    /// Link `from` to `to`. Both routes must exist.
    pub fn link(
        &mut self,
        from: impl Into<RouteId>,
        to: impl Into<RouteId>,
    ) -> Result<&mut Self, NavigationError> {
        let (from, to) = (from.into(), to.into());
        if !self.routes.contains_key(&to) {
            return Err(NavigationError::UnknownRoute(to));
        }
        match self.routes.get_mut(&from) {
            Some(entry) => {
                entry.links.insert(to);
                Ok(self)
            }
            None => Err(NavigationError::UnknownRoute(from)),
        }
    }

    #[must_use]
    pub fn contains(&self, route: &RouteId) -> bool {
        self.routes.contains_key(route)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    #[must_use]
    pub fn chunk_for(&self, route: &RouteId) -> Option<&ChunkId> {
        self.routes.get(route).and_then(|e| e.chunk.as_ref())
    }

    /// Routes directly linked from `route`.
    pub fn neighbors(&self, route: &RouteId) -> impl Iterator<Item = &RouteId> {
        self.routes.get(route).into_iter().flat_map(|e| e.links.iter())
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteId> {
        self.routes.keys()
    }

    /// Routes reachable from `route` in at most `hops` links, nearest first.
    /// The start route is not included.
    #[must_use]
    pub fn reachable_within(&self, route: &RouteId, hops: usize) -> Vec<RouteId> {
        let mut seen = BTreeSet::from([route.clone()]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([(route.clone(), 0)]);
        while let Some((current, depth)) = queue.pop_front() {
            if depth == hops {
                continue;
            }
            for next in self.neighbors(&current) {
                if seen.insert(next.clone()) {
                    order.push(next.clone());
                    queue.push_back((next.clone(), depth + 1));
                }
            }
        }
        order
    }
}

/// Picks the chunks worth preloading around the current route.
pub trait PreloadStrategy {
    fn select(&self, graph: &RouteGraph, current: &RouteId) -> Vec<ChunkId>;
}

/// Never preload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreloading;

impl PreloadStrategy for NoPreloading {
    fn select(&self, _graph: &RouteGraph, _current: &RouteId) -> Vec<ChunkId> {
        Vec::new()
    }
}

/// Preload the chunk of every route.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloadAll;

impl PreloadStrategy for PreloadAll {
    fn select(&self, graph: &RouteGraph, current: &RouteId) -> Vec<ChunkId> {
        let routes = graph.routes().filter(|r| *r != current);
        chunks_of(graph, routes)
    }
}

/// Preload the chunks of routes within `hops` links of the current one.
#[derive(Debug, Clone, Copy)]
pub struct PreloadNeighbors {
    pub hops: usize,
}

impl Default for PreloadNeighbors {
    fn default() -> Self {
        Self { hops: 1 }
    }
}

impl PreloadStrategy for PreloadNeighbors {
    fn select(&self, graph: &RouteGraph, current: &RouteId) -> Vec<ChunkId> {
        let reachable = graph.reachable_within(current, self.hops);
        chunks_of(graph, reachable.iter())
    }
}

/// Distinct chunks of `routes`, in route order.
fn chunks_of<'a>(graph: &RouteGraph, routes: impl Iterator<Item = &'a RouteId>) -> Vec<ChunkId> {
    let mut seen = BTreeSet::new();
    routes
        .filter_map(|r| graph.chunk_for(r))
        .filter(|c| seen.insert((*c).clone()))
        .cloned()
        .collect()
}

/// Drives chunk loading from navigation.
pub struct Navigator<S = PreloadNeighbors> {
    scheduler: LoadScheduler,
    graph: RouteGraph,
    strategy: S,
    current: Option<RouteId>,
}

impl<S: PreloadStrategy> Navigator<S> {
    pub fn new(scheduler: LoadScheduler, graph: RouteGraph, strategy: S) -> Self {
        Self {
            scheduler,
            graph,
            strategy,
            current: None,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&RouteId> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn graph(&self) -> &RouteGraph {
        &self.graph
    }

    #[must_use]
    pub fn scheduler(&self) -> &LoadScheduler {
        &self.scheduler
    }

    /// Enter `route`: request its chunk, then preload around it.
    ///
    /// Returns `None` for routes without a chunk.
    pub fn navigate(
        &mut self,
        route: impl Into<RouteId>,
    ) -> Result<Option<ChunkRequest>, NavigationError> {
        let route = route.into();
        if !self.graph.contains(&route) {
            return Err(NavigationError::UnknownRoute(route));
        }
        let request = self
            .graph
            .chunk_for(&route)
            .map(|chunk| self.scheduler.request(chunk));
        debug!(route = %route, chunk = ?request.as_ref().map(ChunkRequest::chunk), "navigate");
        self.current = Some(route);
        self.on_idle();
        Ok(request)
    }

    /// Re-run preloading for the current route. Chunks whose last attempt
    /// failed are left for an explicit request.
    pub fn on_idle(&self) -> Vec<(ChunkId, PreloadOutcome)> {
        let Some(current) = &self.current else {
            return Vec::new();
        };
        self.strategy
            .select(&self.graph, current)
            .into_iter()
            .map(|chunk| {
                let outcome = self
                    .scheduler
                    .preload(&chunk, |ctx| ctx.state() != ChunkState::Failed);
                (chunk, outcome)
            })
            .collect()
    }
}

impl<S> fmt::Debug for Navigator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Navigator")
            .field("current", &self.current)
            .field("routes", &self.graph.len())
            .finish_non_exhaustive()
    }
}
