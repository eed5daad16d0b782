//! Frame channels: ordered, reliable, duplex carriers of [Frame].
//!
//! - [mem]: an in-process pair, frames are moved through crossfire channels
//! - [sock]: framing over a non-blocking unix / tcp stream, driven by [AsyncIO](strand_rpc_core::runtime::AsyncIO)
//!
//! A connection calls read_frame() from its reader task only, and write_frame() / flush() / close()
//! from its writer task only.

use crate::proto::Frame;
use std::future::Future;
use std::{fmt, io};

pub mod mem;
pub mod sock;

pub trait FrameTransport: Send + Sync + Sized + 'static + fmt::Debug {
    /// Receive the next frame. An error means the channel is broken or closed by the peer.
    fn read_frame(&self) -> impl Future<Output = io::Result<Frame>> + Send;

    /// Queue a frame. It might not reach the peer before flush()
    fn write_frame(&self, frame: Frame) -> impl Future<Output = io::Result<()>> + Send;

    fn flush(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Shutdown the write direction, the peer's read_frame() will fail after consuming what was
    /// written.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
