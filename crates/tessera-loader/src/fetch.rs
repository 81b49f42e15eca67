#![forbid(unsafe_code)]

//! The transport seam.

use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::error::FetchError;
use crate::module::{ChunkId, RawModule};

/// Fetches the code of one chunk. Supplied by the host.
///
/// The returned future must not borrow the fetcher; it is driven by a task
/// on the host's executor.
pub trait ChunkFetcher {
    fn fetch(&self, chunk: &ChunkId) -> LocalBoxFuture<'static, Result<RawModule, FetchError>>;
}

impl<F> ChunkFetcher for F
where
    F: Fn(&ChunkId) -> LocalBoxFuture<'static, Result<RawModule, FetchError>>,
{
    fn fetch(&self, chunk: &ChunkId) -> LocalBoxFuture<'static, Result<RawModule, FetchError>> {
        self(chunk)
    }
}

impl<T: ChunkFetcher + ?Sized> ChunkFetcher for Rc<T> {
    fn fetch(&self, chunk: &ChunkId) -> LocalBoxFuture<'static, Result<RawModule, FetchError>> {
        (**self).fetch(chunk)
    }
}
