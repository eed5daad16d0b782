#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # strand-rpc-smol
//!
//! This crate provides a runtime adapter for `strand-rpc` to work with the `smol` runtime.
//! It implements the [AsyncIO](strand_rpc_core::runtime::AsyncIO) trait on top of `async-io`.

use async_executor::Executor;
use async_io::{Async, Timer};
use std::future::Future;
use std::io;
use std::ops::Deref;
use std::os::fd::{AsFd, AsRawFd};
use std::sync::Arc;
use std::time::Duration;
use strand_rpc_core::runtime::{AsyncFdTrait, AsyncIO};

/// The main struct for async-io, assign this type to the IO param of
/// [ClientDefault](strand_rpc_stream::client::ClientDefault) and
/// [ServerDefault](strand_rpc_stream::server::ServerDefault).
#[derive(Clone)]
pub struct SmolRT(Option<Arc<Executor<'static>>>);

impl SmolRT {
    #[cfg(feature = "global")]
    #[inline]
    pub fn new_global() -> Self {
        Self(None)
    }

    #[inline]
    pub fn new(executor: Arc<Executor<'static>>) -> Self {
        Self(Some(executor))
    }
}

impl AsyncIO for SmolRT {
    type AsyncFd<T: AsRawFd + AsFd + Send + Sync + 'static> = SmolFD<T>;

    #[inline(always)]
    fn sleep(d: Duration) -> impl Future + Send {
        Timer::after(d)
    }

    #[inline(always)]
    fn to_async_fd_rw<T: AsRawFd + AsFd + Send + Sync + 'static>(
        fd: T,
    ) -> io::Result<Self::AsyncFd<T>> {
        Ok(SmolFD(Async::new(fd)?))
    }

    #[inline]
    fn spawn_detach<F, R>(&self, f: F)
    where
        F: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        if let Some(executor) = self.0.as_ref() {
            executor.spawn(f).detach();
        } else {
            #[cfg(feature = "global")]
            {
                smol::spawn(f).detach();
                return;
            }
            #[cfg(not(feature = "global"))]
            unreachable!();
        }
    }
}

/// Associate type for SmolRT
pub struct SmolFD<T: AsRawFd + AsFd + Send + Sync + 'static>(Async<T>);

impl<T: AsRawFd + AsFd + Send + Sync + 'static> AsyncFdTrait<T> for SmolFD<T> {
    #[inline(always)]
    async fn async_read<R>(&self, f: impl FnMut(&T) -> io::Result<R> + Send) -> io::Result<R> {
        self.0.read_with(f).await
    }

    #[inline(always)]
    async fn async_write<R>(&self, f: impl FnMut(&T) -> io::Result<R> + Send) -> io::Result<R> {
        self.0.write_with(f).await
    }
}

impl<T: AsRawFd + AsFd + Send + Sync + 'static> Deref for SmolFD<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.0.get_ref()
    }
}

pub type ClientDefault<C> = strand_rpc_stream::client::ClientDefault<SmolRT, C>;
pub type ServerDefault<C> = strand_rpc_stream::server::ServerDefault<SmolRT, C>;
