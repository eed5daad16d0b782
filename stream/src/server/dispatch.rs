use super::{ServerFacts, ServiceRegistry};
use crate::conn::ConnShared;
use crate::proto::{Frame, FrameKind};
use crate::stream::{Role, StreamCore};
use crate::table::Inbound;
use std::sync::Arc;
use std::time::Duration;
use strand_rpc_core::error::RpcIntErr;

/// Turns the inbound frames of one connection into handler tasks and stream events.
pub(crate) struct Dispatcher<F: ServerFacts> {
    conn: Arc<ConnShared<F>>,
    registry: Arc<ServiceRegistry<F>>,
}

impl<F: ServerFacts> Dispatcher<F> {
    pub fn new(conn: Arc<ConnShared<F>>, registry: Arc<ServiceRegistry<F>>) -> Self {
        Self { conn, registry }
    }

    /// Called from the connection reader only, never blocks.
    pub fn dispatch(&self, frame: Frame) {
        match frame.kind {
            FrameKind::Open => self.open(frame),
            FrameKind::Error => {
                // The client abandoned the call, the handler sees it through its context
                let id = frame.stream_id;
                self.conn.route(frame, false);
                self.conn.table.cancel(id);
            }
            FrameKind::End => {
                // Only the server ends a call, from a client it is a half-close
                let id = frame.stream_id;
                if let Some(payload) = frame.payload {
                    self.conn.table.route(id, Inbound::Data(payload));
                }
                self.conn.table.route(id, Inbound::HalfClose);
            }
            _ => self.conn.route(frame, false),
        }
    }

    fn reject(&self, id: u64, err: RpcIntErr) {
        if let Err(e) = self.conn.send_frame(Frame::error(id, err.into())) {
            logger_debug!(self.conn.logger, "reject stream {} failed: {}", id, e);
        }
    }

    fn open(&self, frame: Frame) {
        let id = frame.stream_id;
        let method_name = frame.method.as_deref().unwrap_or("");
        let Some(method) = self.registry.get(method_name) else {
            logger_warn!(self.conn.logger, "stream {} unknown method {:?}", id, method_name);
            self.reject(id, RpcIntErr::Method);
            return;
        };
        if self.conn.table.contains(id) {
            logger_warn!(self.conn.logger, "stream {} opened twice", id);
            self.reject(id, RpcIntErr::Internal);
            return;
        }
        let ctx = if frame.timeout_ms > 0 {
            self.conn.root_ctx.with_timeout(Duration::from_millis(frame.timeout_ms as u64))
        } else {
            self.conn.root_ctx.child()
        };
        let (tx, rx) = crossfire::mpmc::unbounded_async();
        if !self.conn.table.insert(id, tx, ctx.clone()) {
            self.reject(id, RpcIntErr::Internal);
            return;
        }
        let kind = method.kind();
        let payload = if kind.request_in_open() {
            // Nothing else comes from the client but a possible cancel
            self.conn.table.route(id, Inbound::HalfClose);
            frame.payload
        } else {
            if let Some(initial) = frame.payload {
                self.conn.table.route(id, Inbound::Data(initial));
            }
            None
        };
        logger_trace!(self.conn.logger, "stream {} open {:?} {:?}", id, method_name, kind);
        let core = StreamCore::new(id, Role::Server, self.conn.clone(), ctx, rx, false);
        let fut = method.call(core.clone(), payload);
        self.conn.facts.spawn_detach(async move {
            let res = fut.await;
            core.finish(res);
        });
    }
}
