//! The client side of a connection: one call-starting operation per call shape.

pub use strand_rpc_core::ClientConfig;

use crate::conn::{ConnFacts, ConnShared};
use crate::proto::{Frame, FrameKind, MAX_METHOD_LEN, check_msg_len};
use crate::stream::{ClientStream, Role, StreamCore};
use crate::transport::FrameTransport;
use captains_log::LogFilter;
use crossfire::{MAsyncRx, MTx};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strand_rpc_core::{
    Codec, RecvErrPolicy, context::CallContext, error::StreamError, io::Cancellable,
    runtime::AsyncIO,
};

/// A trait implemented by the user for the client-side, to define the customizable plugin.
pub trait ClientFacts: ConnFacts {
    /// You should keep ClientConfig inside, get_config() will return the reference.
    fn get_config(&self) -> &ClientConfig;
}

/// An example ClientFacts for general use
pub struct ClientDefault<IO: AsyncIO, C: Codec> {
    pub logger: Arc<LogFilter>,
    config: ClientConfig,
    rt: IO,
    _phan: std::marker::PhantomData<fn(&C)>,
}

impl<IO: AsyncIO, C: Codec> ClientDefault<IO, C> {
    pub fn new(config: ClientConfig, rt: IO) -> Arc<Self> {
        Arc::new(Self { logger: Arc::new(LogFilter::new()), config, rt, _phan: Default::default() })
    }

    #[inline]
    pub fn set_log_level(&self, level: log::Level) {
        self.logger.set_level(level);
    }
}

impl<IO: AsyncIO, C: Codec> ConnFacts for ClientDefault<IO, C> {
    type Codec = C;
    type IO = IO;

    #[inline]
    fn new_logger(&self) -> Arc<LogFilter> {
        self.logger.clone()
    }

    #[inline]
    fn recv_err_policy(&self) -> RecvErrPolicy {
        self.config.recv_err_policy
    }

    #[inline]
    fn spawn_detach<F, R>(&self, f: F)
    where
        F: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        self.rt.spawn_detach(f);
    }
}

impl<IO: AsyncIO, C: Codec> ClientFacts for ClientDefault<IO, C> {
    #[inline]
    fn get_config(&self) -> &ClientConfig {
        &self.config
    }
}

/// The client end of one connection. Calls may run concurrently from any number of tasks.
///
/// Dropping the client stops its reader, the live streams then fail with
/// [StreamError::ConnectionLost]. The connection is closed once the last stream is gone.
pub struct RpcClient<F: ClientFacts> {
    conn: Arc<ConnShared<F>>,
    close_tx: Mutex<Option<MTx<()>>>,
}

impl<F: ClientFacts> RpcClient<F> {
    /// Take over an established frame channel, spawn its reader and writer.
    pub fn new<T: FrameTransport>(facts: Arc<F>, transport: T) -> Self {
        let transport = Arc::new(transport);
        let conn =
            ConnShared::new(facts, transport.clone(), "client", CallContext::background(), None);
        let (close_tx, close_rx) = crossfire::mpmc::unbounded_async();
        logger_debug!(conn.logger, "client {:?} connected", transport);
        let reader = Reader { conn: conn.clone(), transport, close_rx };
        conn.facts.spawn_detach(reader.run());
        Self { conn, close_tx: Mutex::new(Some(close_tx)) }
    }

    /// Stop reading, the live streams will fail with [StreamError::ConnectionLost].
    pub fn close(&self) {
        let _ = self.close_tx.lock().unwrap().take();
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.conn.is_lost()
    }

    /// Number of calls in progress
    #[inline]
    pub fn live_streams(&self) -> usize {
        self.conn.table.len()
    }

    fn open(
        &self, ctx: &CallContext, method: &str, payload: Option<Vec<u8>>, send_closed: bool,
    ) -> Result<Arc<StreamCore<F>>, StreamError> {
        if self.conn.is_lost() {
            return Err(StreamError::ConnectionLost);
        }
        if method.len() > MAX_METHOD_LEN {
            logger_warn!(self.conn.logger, "client method name of {}B too long", method.len());
            return Err(StreamError::Encode);
        }
        if let Some(p) = payload.as_ref() {
            check_msg_len(p.len())?;
        }
        let call_timeout = self.conn.facts.get_config().call_timeout;
        let ctx = if ctx.deadline().is_none() && call_timeout > Duration::from_secs(0) {
            ctx.with_timeout(call_timeout)
        } else {
            ctx.child()
        };
        if ctx.is_done() {
            return Err(StreamError::Cancelled);
        }
        let timeout_ms = match ctx.remaining() {
            Some(left) => std::cmp::max(1, left.as_millis().min(u32::MAX as u128) as u32),
            None => 0,
        };
        let id = self.conn.table.alloc_id();
        let (tx, rx) = crossfire::mpmc::unbounded_async();
        self.conn.table.insert(id, tx, ctx.clone());
        let core = StreamCore::new(id, Role::Client, self.conn.clone(), ctx, rx, send_closed);
        self.conn.send_frame(Frame::open(id, method, timeout_ms, payload))?;
        logger_trace!(self.conn.logger, "{:?} open {}", core, method);
        core.watch_cancel();
        Ok(core)
    }

    #[inline]
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, StreamError> {
        self.conn.codec.encode(msg).map_err(|_| StreamError::Encode)
    }

    /// One request, one response.
    pub async fn call_unary<Req, Resp>(
        &self, ctx: &CallContext, method: &str, req: &Req,
    ) -> Result<Resp, StreamError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = self.encode(req)?;
        let core = self.open(ctx, method, Some(payload), true)?;
        ClientStream::<F, Req, Resp>::from_core(core).recv().await
    }

    /// One request, then a sequence of responses. The send side is closed by the request.
    pub fn call_server_streaming<Req, Resp>(
        &self, ctx: &CallContext, method: &str, req: &Req,
    ) -> Result<ClientStream<F, Req, Resp>, StreamError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = self.encode(req)?;
        let core = self.open(ctx, method, Some(payload), true)?;
        Ok(ClientStream::from_core(core))
    }

    /// A sequence of requests, optionally starting with `initial`, finished by
    /// [close_and_recv()](crate::stream::RpcStream::close_and_recv) for the aggregate.
    pub fn call_client_streaming<Req, Resp>(
        &self, ctx: &CallContext, method: &str, initial: Option<&Req>,
    ) -> Result<ClientStream<F, Req, Resp>, StreamError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = match initial {
            Some(req) => Some(self.encode(req)?),
            None => None,
        };
        let core = self.open(ctx, method, payload, false)?;
        Ok(ClientStream::from_core(core))
    }

    /// Both directions send and receive concurrently, optionally starting with `initial`.
    pub fn call_bidi_streaming<Req, Resp>(
        &self, ctx: &CallContext, method: &str, initial: Option<&Req>,
    ) -> Result<ClientStream<F, Req, Resp>, StreamError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = match initial {
            Some(req) => Some(self.encode(req)?),
            None => None,
        };
        let core = self.open(ctx, method, payload, false)?;
        Ok(ClientStream::from_core(core))
    }
}

impl<F: ClientFacts> fmt::Debug for RpcClient<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "client(live={}, lost={})", self.conn.table.len(), self.conn.is_lost())
    }
}

struct Reader<F: ClientFacts, T: FrameTransport> {
    conn: Arc<ConnShared<F>>,
    transport: Arc<T>,
    close_rx: MAsyncRx<()>,
}

impl<F: ClientFacts, T: FrameTransport> Reader<F, T> {
    async fn run(self) {
        loop {
            match Cancellable::new(self.transport.read_frame(), self.close_rx.recv()).await {
                Err(()) => {
                    logger_debug!(self.conn.logger, "client {:?} closed", self.transport);
                    self.conn.mark_lost("closed by client");
                    return;
                }
                Ok(Err(e)) => {
                    logger_debug!(self.conn.logger, "client {:?} read error: {}", self.transport, e);
                    self.conn.mark_lost("read error");
                    return;
                }
                Ok(Ok(frame)) => {
                    logger_trace!(self.conn.logger, "client recv {:?}", frame);
                    // The server ends a call with exactly one End or Error
                    let last = matches!(frame.kind, FrameKind::End | FrameKind::Error);
                    self.conn.route(frame, last);
                }
            }
        }
    }
}
