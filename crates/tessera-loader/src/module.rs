#![forbid(unsafe_code)]

//! Chunk identifiers and loaded module handles.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Identifier of a loadable code unit.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(Rc<str>);

impl ChunkId {
    pub fn new(id: impl Into<Rc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({:?})", &*self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ChunkId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&ChunkId> for ChunkId {
    fn from(id: &ChunkId) -> Self {
        id.clone()
    }
}

/// Module exports as produced by the transport.
pub struct RawModule {
    exports: Box<dyn Any>,
}

impl RawModule {
    pub fn new<T: Any>(exports: T) -> Self {
        Self {
            exports: Box::new(exports),
        }
    }
}

impl fmt::Debug for RawModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawModule").finish_non_exhaustive()
    }
}

struct LoadedModule {
    chunk: ChunkId,
    attempt: u32,
    exports: Box<dyn Any>,
}

/// Shared handle to a loaded module.
///
/// Every waiter of one load receives a clone of the same handle, so
/// [`ModuleHandle::ptr_eq`] tells whether two handles came from the same
/// load.
#[derive(Clone)]
pub struct ModuleHandle(Rc<LoadedModule>);

impl ModuleHandle {
    pub(crate) fn new(chunk: ChunkId, attempt: u32, raw: RawModule) -> Self {
        Self(Rc::new(LoadedModule {
            chunk,
            attempt,
            exports: raw.exports,
        }))
    }

    #[must_use]
    pub fn chunk(&self) -> &ChunkId {
        &self.0.chunk
    }

    /// The load attempt (1-based) that produced this module.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.0.attempt
    }

    /// The module exports, if they are a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.exports.downcast_ref()
    }

    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("chunk", &self.0.chunk)
            .field("attempt", &self.0.attempt)
            .finish_non_exhaustive()
    }
}
