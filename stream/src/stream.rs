//! The per-call stream and its state machine.
//!
//! Each direction closes independently and only once:
//!
//! - The local send side is closed by [RpcStream::close_send()], [RpcStream::close_and_send()],
//!   by the Open frame itself for unary and server-streaming calls, or by cancellation.
//! - The inbound side is over once HalfClose, End or Error of the peer has been received, after
//!   that [RpcStream::recv()] keeps returning the same outcome.
//!
//! On the client side the call is over when the server's End or Error is observed. Dropping the
//! last handle before that tells the server to abandon the call with `rpc_cancelled`.

use crate::conn::{ConnFacts, ConnShared};
use crate::proto::{Frame, check_msg_len};
use crate::table::Inbound;
use crossfire::MAsyncRx;
use futures::future::{AbortHandle, Abortable};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use strand_rpc_core::{
    Codec, RecvErrPolicy,
    context::CallContext,
    error::{RpcIntErr, StreamError},
    io::Cancellable,
};

#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum Role {
    Client,
    Server,
}

#[derive(Default)]
struct StreamState {
    send_closed: bool,
    /// End or Error emitted by us, nothing may follow
    finished: bool,
    /// The peer ended the call: End or Error from the server, Error from the client
    peer_done: bool,
    /// Repeated by recv() once the inbound side is over
    terminal: Option<StreamError>,
    /// Repeated by send() after the peer aborted
    peer_err: Option<StreamError>,
    policy: RecvErrPolicy,
}

pub(crate) struct StreamCore<F: ConnFacts> {
    id: u64,
    role: Role,
    conn: Arc<ConnShared<F>>,
    ctx: CallContext,
    inbound: MAsyncRx<Inbound>,
    state: Mutex<StreamState>,
    watcher: Mutex<Option<AbortHandle>>,
}

impl<F: ConnFacts> StreamCore<F> {
    pub(crate) fn new(
        id: u64, role: Role, conn: Arc<ConnShared<F>>, ctx: CallContext,
        inbound: MAsyncRx<Inbound>, send_closed: bool,
    ) -> Arc<Self> {
        let state =
            StreamState { send_closed, policy: conn.facts.recv_err_policy(), ..Default::default() };
        Arc::new(Self {
            id,
            role,
            conn,
            ctx,
            inbound,
            state: Mutex::new(state),
            watcher: Mutex::new(None),
        })
    }

    #[inline]
    pub(crate) fn ctx(&self) -> &CallContext {
        &self.ctx
    }

    #[inline]
    pub(crate) fn codec(&self) -> &F::Codec {
        &self.conn.codec
    }

    /// Client side, report cancellation to the server as soon as the context is done, even if
    /// nobody is blocked on the stream.
    pub(crate) fn watch_cancel(self: &Arc<Self>) {
        let (handle, reg) = AbortHandle::new_pair();
        let weak = Arc::downgrade(self);
        let ctx = self.ctx.clone();
        let f = Abortable::new(
            async move {
                ctx.done::<F::IO>().await;
                if let Some(core) = weak.upgrade() {
                    core.on_cancelled();
                }
            },
            reg,
        );
        *self.watcher.lock().unwrap() = Some(handle);
        self.conn.facts.spawn_detach(f);
    }

    fn on_cancelled(&self) {
        if self.role != Role::Client {
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.finished || state.peer_done {
                return;
            }
            state.finished = true;
            state.send_closed = true;
        }
        logger_debug!(self.conn.logger, "{:?} cancelled", self);
        let _ = self.conn.send_frame(Frame::error(self.id, RpcIntErr::Cancelled.into()));
    }

    #[inline]
    fn check_send(&self, state: &StreamState) -> Result<(), StreamError> {
        if let Some(e) = state.peer_err.as_ref() {
            return Err(e.clone());
        }
        // The connection's context is cancelled after the loss, report the cause
        if self.conn.is_lost() {
            return Err(StreamError::ConnectionLost);
        }
        if self.ctx.is_done() && !state.peer_done {
            return Err(StreamError::Cancelled);
        }
        if state.send_closed || state.finished || state.peer_done {
            return Err(StreamError::StreamClosed);
        }
        Ok(())
    }

    fn send_payload(&self, payload: Vec<u8>) -> Result<(), StreamError> {
        check_msg_len(payload.len())?;
        let res = self.check_send(&self.state.lock().unwrap());
        if let Err(e) = res {
            if e == StreamError::Cancelled {
                self.on_cancelled();
            }
            return Err(e);
        }
        self.conn.send_frame(Frame::data(self.id, payload))
    }

    fn close_send(&self) -> Result<(), StreamError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.send_closed || state.finished {
                return Ok(());
            }
            if self.conn.is_lost() {
                return Err(StreamError::ConnectionLost);
            }
            state.send_closed = true;
            if state.peer_done {
                return Ok(());
            }
        }
        self.conn.send_frame(Frame::half_close(self.id))
    }

    fn close_and_send_payload(&self, payload: Vec<u8>) -> Result<(), StreamError> {
        check_msg_len(payload.len())?;
        {
            let mut state = self.state.lock().unwrap();
            if let Err(e) = self.check_send(&state) {
                return Err(e);
            }
            state.send_closed = true;
            if self.role == Role::Server {
                // The End of a handler finishes the call
                state.finished = true;
            }
        }
        self.conn.send_frame(Frame::end(self.id, Some(payload)))
    }

    async fn recv_payload(&self) -> Result<Vec<u8>, StreamError> {
        if let Some(e) = self.state.lock().unwrap().terminal.clone() {
            return Err(e);
        }
        let item = loop {
            // Once lost the queue is disconnected, what was routed before is still delivered
            if self.conn.is_lost() {
                break self.inbound.recv().await;
            }
            if self.ctx.is_done() {
                self.on_cancelled();
                return Err(StreamError::Cancelled);
            }
            match Cancellable::new(self.inbound.recv(), self.ctx.done::<F::IO>()).await {
                Ok(res) => break res,
                Err(()) => continue,
            }
        };
        let item = match item {
            Err(_) => {
                let e = StreamError::ConnectionLost;
                self.state.lock().unwrap().terminal = Some(e.clone());
                return Err(e);
            }
            Ok(item) => item,
        };
        let mut state = self.state.lock().unwrap();
        match item {
            Inbound::Data(payload) => Ok(payload),
            Inbound::HalfClose => {
                state.terminal = Some(StreamError::EndOfStream);
                Err(StreamError::EndOfStream)
            }
            Inbound::End(payload) => {
                state.terminal = Some(StreamError::EndOfStream);
                if self.role == Role::Client {
                    state.peer_done = true;
                }
                payload.ok_or(StreamError::EndOfStream)
            }
            Inbound::Error(e) => {
                let e = StreamError::from_peer(e);
                state.terminal = Some(e.clone());
                state.peer_err = Some(e.clone());
                state.peer_done = true;
                Err(e)
            }
        }
    }

    /// Server side, called by the dispatcher once the handler returned. Emits the single terminal
    /// frame unless the handler already ended the call.
    pub(crate) fn finish(&self, res: Result<Option<Vec<u8>>, StreamError>) {
        let frame = {
            let mut state = self.state.lock().unwrap();
            if state.finished {
                None
            } else {
                state.finished = true;
                state.send_closed = true;
                Some(match res.and_then(|p| self.check_final(p)) {
                    Ok(payload) => Frame::end(self.id, payload),
                    Err(StreamError::EndOfStream) => Frame::end(self.id, None),
                    Err(ref e) => {
                        logger_debug!(self.conn.logger, "{:?} handler returns {}", self, e);
                        Frame::error(self.id, e.to_encoded())
                    }
                })
            }
        };
        if let Some(frame) = frame {
            if let Err(e) = self.conn.send_frame(frame) {
                logger_debug!(self.conn.logger, "{:?} terminal frame not sent: {}", self, e);
            }
        }
        self.conn.table.remove(self.id);
    }

    #[inline]
    fn check_final(&self, payload: Option<Vec<u8>>) -> Result<Option<Vec<u8>>, StreamError> {
        if let Some(p) = payload.as_ref() {
            check_msg_len(p.len())?;
        }
        Ok(payload)
    }
}

impl<F: ConnFacts> fmt::Debug for StreamCore<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} stream {}", self.conn.name(), self.id)
    }
}

impl<F: ConnFacts> Drop for StreamCore<F> {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.conn.table.remove(self.id);
        if self.role == Role::Server {
            return;
        }
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if state.finished || state.peer_done {
            return;
        }
        // Both directions ended gracefully, only the server's End is missing
        if state.send_closed && state.terminal == Some(StreamError::EndOfStream) {
            return;
        }
        // The server's End or Error might be queued but not consumed
        while let Ok(item) = self.inbound.try_recv() {
            if matches!(item, Inbound::End(_) | Inbound::Error(_)) {
                return;
            }
        }
        logger_debug!(self.conn.logger, "{} stream {} dropped before the end", self.conn.name(), self.id);
        let _ = self.conn.send_frame(Frame::error(self.id, RpcIntErr::Cancelled.into()));
    }
}

/// A typed handle of one call, sending `S` and receiving `R`.
///
/// Clones share the same stream. `send` and `recv` may be used concurrently from two tasks, but
/// each direction is meant for a single caller.
pub struct RpcStream<F: ConnFacts, S, R> {
    core: Arc<StreamCore<F>>,
    _phan: PhantomData<fn(S) -> R>,
}

/// The caller's end of a call with request `Req` and response `Resp`
pub type ClientStream<F, Req, Resp> = RpcStream<F, Req, Resp>;

/// The handler's end of a call with request `Req` and response `Resp`
pub type ServerStream<F, Req, Resp> = RpcStream<F, Resp, Req>;

impl<F: ConnFacts, S, R> Clone for RpcStream<F, S, R> {
    #[inline]
    fn clone(&self) -> Self {
        Self { core: self.core.clone(), _phan: PhantomData }
    }
}

impl<F: ConnFacts, S, R> fmt::Debug for RpcStream<F, S, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.core.fmt(f)
    }
}

impl<F: ConnFacts, S: Serialize, R: DeserializeOwned> RpcStream<F, S, R> {
    #[inline]
    pub(crate) fn from_core(core: Arc<StreamCore<F>>) -> Self {
        Self { core, _phan: PhantomData }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// The call's context, cancelled when the call is cancelled or its deadline elapsed
    #[inline]
    pub fn context(&self) -> &CallContext {
        &self.core.ctx
    }

    /// Override the connection's default policy for this stream
    #[inline]
    pub fn set_recv_policy(&self, policy: RecvErrPolicy) {
        self.core.state.lock().unwrap().policy = policy;
    }

    #[inline]
    fn encode(&self, msg: &S) -> Result<Vec<u8>, StreamError> {
        self.core.codec().encode(msg).map_err(|_| StreamError::Encode)
    }

    /// Queue a message, the order of sends is the order the peer receives them.
    pub fn send(&self, msg: &S) -> Result<(), StreamError> {
        let payload = self.encode(msg)?;
        self.core.send_payload(payload)
    }

    /// Close the send side, idempotent. The receive side is untouched.
    #[inline]
    pub fn close_send(&self) -> Result<(), StreamError> {
        self.core.close_send()
    }

    /// Send a final message and close the send side with a single frame.
    pub fn close_and_send(&self, msg: &S) -> Result<(), StreamError> {
        let payload = self.encode(msg)?;
        self.core.close_and_send_payload(payload)
    }

    /// Wait for the next message.
    ///
    /// Returns [StreamError::EndOfStream] once the peer finished sending, and keeps returning it.
    pub async fn recv(&self) -> Result<R, StreamError> {
        loop {
            let payload = self.core.recv_payload().await?;
            match self.core.codec().decode::<R>(&payload) {
                Ok(msg) => return Ok(msg),
                Err(()) => {
                    let e = StreamError::Decode;
                    if !e.is_recoverable()
                        || self.core.state.lock().unwrap().policy == RecvErrPolicy::Abort
                    {
                        return Err(e);
                    }
                    logger_warn!(
                        self.core.conn.logger,
                        "{:?} skip undecodable message of {}B",
                        self,
                        payload.len()
                    );
                }
            }
        }
    }

    /// Close the send side if still open, then wait for the peer's final message.
    ///
    /// [StreamError::EndOfStream] when the peer ended without one.
    pub async fn close_and_recv(&self) -> Result<R, StreamError> {
        self.close_send()?;
        self.recv().await
    }
}
