//! Call-scoped cancellation and deadline.
//!
//! A [CallContext] is cheap to clone, all clones observe the same cancel signal. Contexts form a
//! tree: cancelling a parent cancels every child derived from it, a child never affects its
//! parent. The cancel signal is the close of a crossfire channel, so any number of waiters wake
//! up at once.

use crate::error::StreamError;
use crate::runtime::AsyncIO;
use crossfire::{MAsyncRx, MTx};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct CallContext {
    inner: Arc<CtxInner>,
}

struct CtxInner {
    cancelled: AtomicBool,
    cancel_tx: Mutex<Option<MTx<()>>>,
    cancel_rx: MAsyncRx<()>,
    deadline: Option<Instant>,
    children: Mutex<Vec<Weak<CtxInner>>>,
}

impl CtxInner {
    fn new(deadline: Option<Instant>) -> Arc<Self> {
        let (tx, rx) = crossfire::mpmc::unbounded_async();
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            cancel_tx: Mutex::new(Some(tx)),
            cancel_rx: rx,
            deadline,
            children: Mutex::new(Vec::new()),
        })
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the only sender wakes every recv()
        let _ = self.cancel_tx.lock().unwrap().take();
        let children = std::mem::take(&mut *self.children.lock().unwrap());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl CallContext {
    /// A root context without deadline, only cancelled explicitly.
    #[inline]
    pub fn background() -> Self {
        Self { inner: CtxInner::new(None) }
    }

    /// Derive a child which inherits the deadline and the cancel signal of self.
    pub fn child(&self) -> Self {
        self.derive(self.inner.deadline)
    }

    /// Derive a child with the earlier of `deadline` and the deadline of self.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(d) if d < deadline => d,
            _ => deadline,
        };
        self.derive(Some(deadline))
    }

    #[inline]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        let child = CtxInner::new(deadline);
        {
            let mut children = self.inner.children.lock().unwrap();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        // Parent might be cancelled concurrently before the push
        if self.inner.cancelled.load(Ordering::SeqCst) {
            child.cancel();
        }
        Self { inner: child }
    }

    /// Cancel self and all the descendants, idempotent.
    #[inline]
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline, None when there is no deadline.
    #[inline]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancelled, or the deadline has elapsed.
    #[inline]
    pub fn is_done(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        if let Some(d) = self.inner.deadline {
            return Instant::now() >= d;
        }
        false
    }

    #[inline]
    pub fn err(&self) -> Option<StreamError> {
        if self.is_done() { Some(StreamError::Cancelled) } else { None }
    }

    /// Resolves when cancel() is called on self or an ancestor. Ignores the deadline.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.inner.cancel_rx.recv().await;
    }

    /// Resolves when the context is cancelled or the deadline elapsed.
    pub async fn done<IO: AsyncIO>(&self) {
        match self.remaining() {
            None => self.cancelled().await,
            Some(left) => {
                if left.is_zero() {
                    return;
                }
                let _ = IO::timeout(left, self.cancelled()).await;
            }
        }
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ctx(cancelled={}, remaining={:?})", self.is_cancelled(), self.remaining())
    }
}
