#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # strand-rpc-tokio
//!
//! This crate provides a runtime adapter for `strand-rpc` to work with the `tokio` runtime.
//! It implements the [AsyncIO](strand_rpc_core::runtime::AsyncIO) trait to support `tokio`.

use std::future::Future;
use std::io;
use std::ops::Deref;
use std::os::fd::{AsFd, AsRawFd};
use std::time::Duration;
use strand_rpc_core::runtime::{AsyncFdTrait, AsyncIO};
use tokio::runtime::Handle;

/// The main struct for tokio runtime IO, assign this type to the IO param of
/// [ClientDefault](strand_rpc_stream::client::ClientDefault) and
/// [ServerDefault](strand_rpc_stream::server::ServerDefault).
#[derive(Clone)]
pub struct TokioRT(Handle);

impl TokioRT {
    /// Capture a tokio runtime handle to ensure background task can spawn
    #[inline]
    pub fn new(handle: Handle) -> Self {
        Self(handle)
    }

    /// Must be called within a tokio runtime context
    #[inline]
    pub fn current() -> Self {
        Self(Handle::current())
    }
}

impl AsyncIO for TokioRT {
    type AsyncFd<T: AsRawFd + AsFd + Send + Sync + 'static> = TokioFD<T>;

    #[inline(always)]
    fn sleep(d: Duration) -> impl Future + Send {
        tokio::time::sleep(d)
    }

    #[inline(always)]
    fn to_async_fd_rw<T: AsRawFd + AsFd + Send + Sync + 'static>(
        fd: T,
    ) -> io::Result<Self::AsyncFd<T>> {
        use tokio::io::Interest;
        use tokio::io::unix::AsyncFd;
        Ok(TokioFD(AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE)?))
    }

    /// spawn background coroutine with captured runtime handle
    #[inline]
    fn spawn_detach<F, R>(&self, f: F)
    where
        F: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        self.0.spawn(f);
    }
}

/// Associate type for TokioRT
pub struct TokioFD<T: AsRawFd + AsFd + Send + Sync + 'static>(tokio::io::unix::AsyncFd<T>);

impl<T: AsRawFd + AsFd + Send + Sync + 'static> AsyncFdTrait<T> for TokioFD<T> {
    #[inline(always)]
    async fn async_read<R>(&self, f: impl FnMut(&T) -> io::Result<R> + Send) -> io::Result<R> {
        self.0.async_io(tokio::io::Interest::READABLE, f).await
    }

    #[inline(always)]
    async fn async_write<R>(&self, f: impl FnMut(&T) -> io::Result<R> + Send) -> io::Result<R> {
        self.0.async_io(tokio::io::Interest::WRITABLE, f).await
    }
}

impl<T: AsRawFd + AsFd + Send + Sync + 'static> Deref for TokioFD<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.0.get_ref()
    }
}

pub type ClientDefault<C> = strand_rpc_stream::client::ClientDefault<TokioRT, C>;
pub type ServerDefault<C> = strand_rpc_stream::server::ServerDefault<TokioRT, C>;
