//! The runtime model defines interface to adapt various async runtimes.
//!
//! The adaptor are provided as sub-crates:
//!
//! - `strand-rpc-tokio`
//!
//! - `strand-rpc-smol`
//!
//! A runtime value is held by both client and server facts, it spawns the background tasks of a
//! connection (reader, writer, handlers). Timers and fd readiness are static functions.

use crate::io::Cancellable;
use std::future::Future;
use std::io;
use std::ops::Deref;
use std::os::fd::{AsFd, AsRawFd};
use std::time::Duration;

/// The trait of async fd to turn sync I/O to async
///
/// See module level doc: [crate::runtime]
pub trait AsyncFdTrait<T: AsRawFd + AsFd + Send + Sync + 'static>:
    Send + Sync + 'static + Deref<Target = T>
{
    fn async_read<R>(
        &self, f: impl FnMut(&T) -> io::Result<R> + Send,
    ) -> impl Future<Output = io::Result<R>> + Send;

    fn async_write<R>(
        &self, f: impl FnMut(&T) -> io::Result<R> + Send,
    ) -> impl Future<Output = io::Result<R>> + Send;
}

/// Defines the interface we used from async runtime
///
/// See module level doc: [crate::runtime]
pub trait AsyncIO: Send + Sync + 'static {
    type AsyncFd<T: AsRawFd + AsFd + Send + Sync + 'static>: AsyncFdTrait<T>;

    fn sleep(d: Duration) -> impl Future + Send;

    #[inline]
    fn timeout<F>(d: Duration, func: F) -> impl Future<Output = Result<F::Output, ()>> + Send
    where
        F: Future + Send,
    {
        Cancellable::new(func, Self::sleep(d))
    }

    /// Required to set_nonblocking first
    fn to_async_fd_rw<T: AsRawFd + AsFd + Send + Sync + 'static>(
        fd: T,
    ) -> io::Result<Self::AsyncFd<T>>;

    /// Spawn a background coroutine, its result is discarded
    fn spawn_detach<F, R>(&self, f: F)
    where
        F: Future<Output = R> + Send + 'static,
        R: Send + 'static;
}
