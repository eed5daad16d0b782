//! I/O utilities

use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::*;
use std::{fmt, io};

pin_project! {
    /// Cancellable accepts a param `future` for I/O,
    /// abort the waiting when `cancel_future` returns.
    ///
    /// The `cancel_future` can be timer or notification channel recv()
    pub struct Cancellable<F, C> {
        #[pin]
        future: F,
        #[pin]
        cancel_future: C,
    }
}

impl<F: Future + Send, C: Future + Send> Cancellable<F, C> {
    pub fn new(future: F, cancel_future: C) -> Self {
        Self { future, cancel_future }
    }
}

impl<F: Future + Send, C: Future + Send> Future for Cancellable<F, C> {
    type Output = Result<F::Output, ()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _self = self.project();
        if let Poll::Ready(output) = _self.future.poll(cx) {
            return Poll::Ready(Ok(output));
        }
        if let Poll::Ready(_) = _self.cancel_future.poll(cx) {
            return Poll::Ready(Err(()));
        }
        Poll::Pending
    }
}

/// AsyncRead trait for runtime adapter
pub trait AsyncRead: Send {
    /// Async version of read function
    ///
    /// On ok, return the bytes read, 0 means EOF
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Read the exact number of bytes required to fill `buf`.
    ///
    /// Returns `UnexpectedEof` if the stream is closed before the buffer is filled.
    fn read_exact<'a>(
        &'a mut self, mut buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a {
        async move {
            while !buf.is_empty() {
                match self.read(buf).await {
                    Ok(0) => {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                    Ok(n) => {
                        let tmp = buf;
                        buf = &mut tmp[n..];
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }
    }
}

/// AsyncWrite trait for runtime adapter
pub trait AsyncWrite: Send {
    /// Async version of write function
    ///
    /// On ok, return the bytes written
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Write the entire buffer `buf`, `WriteZero` if the peer stops accepting.
    fn write_all<'a>(
        &'a mut self, mut buf: &'a [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a {
        async move {
            while !buf.is_empty() {
                match self.write(buf).await {
                    Ok(0) => {
                        return Err(io::ErrorKind::WriteZero.into());
                    }
                    Ok(n) => {
                        buf = &buf[n..];
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }
    }
}

/// Read side buffering, so that small header reads do not cost one syscall each.
pub struct BufReader<R: AsyncRead> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
}

impl<R: AsyncRead> BufReader<R> {
    #[inline]
    pub fn new(inner: R, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity {} must > 0", capacity);
        Self { inner, buf: vec![0; capacity].into_boxed_slice(), pos: 0, cap: 0 }
    }

    #[inline(always)]
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Bytes already fetched but not consumed
    #[inline(always)]
    pub fn buffered(&self) -> usize {
        self.cap - self.pos
    }
}

impl<R: AsyncRead> AsyncRead for BufReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        async move {
            if self.pos == self.cap {
                // Large reads bypass the buffer
                if buf.len() >= self.buf.len() {
                    return self.inner.read(buf).await;
                }
                self.cap = self.inner.read(&mut self.buf).await?;
                self.pos = 0;
            }
            let n = std::cmp::min(buf.len(), self.cap - self.pos);
            buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}

impl<R: AsyncRead + fmt::Debug> fmt::Debug for BufReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// Write side buffering. Nothing reaches the inner writer before [BufWriter::flush()]
/// unless the buffer fills up.
pub struct BufWriter<W: AsyncWrite> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite> BufWriter<W> {
    #[inline]
    pub fn new(inner: W, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity {} must > 0", capacity);
        Self { inner, buf: Vec::with_capacity(capacity) }
    }

    #[inline(always)]
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    #[inline(always)]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: AsyncWrite> AsyncWrite for BufWriter<W> {
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        async move {
            let cap = self.buf.capacity();
            if self.buf.len() + buf.len() > cap {
                self.flush().await?;
            }
            if buf.len() >= cap {
                return self.inner.write(buf).await;
            }
            self.buf.extend_from_slice(buf);
            Ok(buf.len())
        }
    }
}

impl<W: AsyncWrite + fmt::Debug> fmt::Debug for BufWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}
