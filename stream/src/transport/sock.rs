use super::FrameTransport;
use crate::proto::*;
use futures::lock::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::{fmt, future::Future};
use strand_rpc_core::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use strand_rpc_core::runtime::{AsyncFdTrait, AsyncIO};
use zerocopy::AsBytes;

pub const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// A connected stream socket usable by [SockTransport]
pub trait SockStream: AsRawFd + AsFd + Send + Sync + 'static + fmt::Debug {
    fn read_nb(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_nb(&self, buf: &[u8]) -> io::Result<usize>;

    fn shutdown_write(&self) -> io::Result<()>;
}

impl SockStream for UnixStream {
    #[inline(always)]
    fn read_nb(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut s: &UnixStream = self;
        s.read(buf)
    }

    #[inline(always)]
    fn write_nb(&self, buf: &[u8]) -> io::Result<usize> {
        let mut s: &UnixStream = self;
        s.write(buf)
    }

    #[inline]
    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

impl SockStream for TcpStream {
    #[inline(always)]
    fn read_nb(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut s: &TcpStream = self;
        s.read(buf)
    }

    #[inline(always)]
    fn write_nb(&self, buf: &[u8]) -> io::Result<usize> {
        let mut s: &TcpStream = self;
        s.write(buf)
    }

    #[inline]
    fn shutdown_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

/// One direction of the shared async fd
struct SockHalf<IO: AsyncIO, T: SockStream>(Arc<IO::AsyncFd<T>>);

impl<IO: AsyncIO, T: SockStream> AsyncRead for SockHalf<IO, T> {
    #[inline(always)]
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        async move { self.0.async_read(|s| s.read_nb(buf)).await }
    }
}

impl<IO: AsyncIO, T: SockStream> AsyncWrite for SockHalf<IO, T> {
    #[inline(always)]
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        async move { self.0.async_write(|s| s.write_nb(buf)).await }
    }
}

/// Frame channel over a byte stream socket.
///
/// Reading and writing are buffered separately, a frame written is not sent before flush().
pub struct SockTransport<IO: AsyncIO, T: SockStream> {
    fd: Arc<IO::AsyncFd<T>>,
    reader: Mutex<BufReader<SockHalf<IO, T>>>,
    writer: Mutex<BufWriter<SockHalf<IO, T>>>,
}

impl<IO: AsyncIO, T: SockStream> SockTransport<IO, T> {
    /// Wrap a connected stream, `buf_size` 0 for the default.
    ///
    /// The stream is switched to non-blocking mode by the caller.
    pub fn new(stream: T, buf_size: usize) -> io::Result<Self> {
        let buf_size = if buf_size == 0 { DEFAULT_BUF_SIZE } else { buf_size };
        let fd = Arc::new(IO::to_async_fd_rw(stream)?);
        Ok(Self {
            reader: Mutex::new(BufReader::new(SockHalf(fd.clone()), buf_size)),
            writer: Mutex::new(BufWriter::new(SockHalf(fd.clone()), buf_size)),
            fd,
        })
    }
}

/// A connected pair of unix sockets wrapped in frame channels
pub fn socket_pair<IO: AsyncIO>(
    buf_size: usize,
) -> io::Result<(SockTransport<IO, UnixStream>, SockTransport<IO, UnixStream>)> {
    let (a, b) = UnixStream::pair()?;
    a.set_nonblocking(true)?;
    b.set_nonblocking(true)?;
    Ok((SockTransport::new(a, buf_size)?, SockTransport::new(b, buf_size)?))
}

impl<IO: AsyncIO, T: SockStream> fmt::Debug for SockTransport<IO, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "sock(fd={})", self.fd.as_raw_fd())
    }
}

#[inline]
fn invalid_data<E: Into<Box<dyn std::error::Error + Send + Sync>>>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl<IO: AsyncIO, T: SockStream> FrameTransport for SockTransport<IO, T> {
    async fn read_frame(&self) -> io::Result<Frame> {
        let mut reader = self.reader.lock().await;
        let mut head_buf = [0u8; FRAME_HEAD_LEN];
        reader.read_exact(&mut head_buf).await?;
        let head = FrameHead::decode(&head_buf).map_err(invalid_data)?;
        let mut method = None;
        let method_len = head.method_len();
        if method_len > 0 {
            let mut buf = vec![0u8; method_len];
            reader.read_exact(&mut buf).await?;
            method = Some(String::from_utf8(buf).map_err(invalid_data)?);
        }
        let mut body = vec![0u8; head.body_len()];
        if !body.is_empty() {
            reader.read_exact(&mut body).await?;
        }
        head.into_frame(method, body).map_err(invalid_data)
    }

    async fn write_frame(&self, frame: Frame) -> io::Result<()> {
        let (head, body) = frame.encode_head();
        let mut writer = self.writer.lock().await;
        writer.write_all(head.as_bytes()).await?;
        if let Some(method) = frame.method.as_ref() {
            writer.write_all(method.as_bytes()).await?;
        }
        if let Some(body) = body {
            writer.write_all(body).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> io::Result<()> {
        self.writer.lock().await.flush().await
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.flush().await;
        if let Err(e) = self.fd.shutdown_write() {
            debug!("{:?} shutdown err: {}", self, e);
        }
    }
}
