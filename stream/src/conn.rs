//! State shared by both sides of a connection, and its writer task.

use crate::proto::{Frame, FrameKind};
use crate::table::{Inbound, StreamTable};
use crate::transport::FrameTransport;
use captains_log::LogFilter;
use crossfire::{AsyncRx, MTx};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use strand_rpc_core::{
    Codec, RecvErrPolicy, context::CallContext, error::StreamError, runtime::AsyncIO,
};

/// The plugin points common to client and server.
///
/// See [ClientFacts](crate::client::ClientFacts) and [ServerFacts](crate::server::ServerFacts).
pub trait ConnFacts: Send + Sync + Sized + 'static {
    /// Define the codec to serialization and deserialization
    type Codec: Codec;

    /// Define the adaptor of async runtime
    type IO: AsyncIO;

    /// Construct a [captains_log::LogFilter] to organize log of a connection
    fn new_logger(&self) -> Arc<LogFilter>;

    /// Default policy of streams on this connection, see [RecvErrPolicy]
    fn recv_err_policy(&self) -> RecvErrPolicy;

    /// Define how the async runtime spawn a task
    fn spawn_detach<F, R>(&self, f: F)
    where
        F: Future<Output = R> + Send + 'static,
        R: Send + 'static;
}

pub(crate) struct ConnShared<F: ConnFacts> {
    pub facts: Arc<F>,
    pub codec: F::Codec,
    pub table: StreamTable,
    pub logger: Arc<LogFilter>,
    /// Lifetime of the connection, parent of every call context on the server side
    pub root_ctx: CallContext,
    frame_tx: MTx<Frame>,
    lost: AtomicBool,
    name: &'static str,
}

impl<F: ConnFacts> ConnShared<F> {
    /// Spawn the writer task, which owns the receiving end of all outbound frames.
    ///
    /// `ref_count` is held until the writer exits, that is until the connection is closed.
    pub fn new<T: FrameTransport>(
        facts: Arc<F>, transport: Arc<T>, name: &'static str, root_ctx: CallContext,
        ref_count: Option<Arc<()>>,
    ) -> Arc<Self> {
        let (frame_tx, frame_rx) = crossfire::mpsc::unbounded_async();
        let conn = Arc::new(Self {
            codec: F::Codec::default(),
            table: StreamTable::new(),
            logger: facts.new_logger(),
            root_ctx,
            frame_tx,
            lost: AtomicBool::new(false),
            name,
            facts,
        });
        let writer =
            Writer { transport, frame_rx, conn: Arc::downgrade(&conn), _ref_count: ref_count };
        conn.facts.spawn_detach(writer.run());
        conn
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// All outbound frames go through here, in the order of the calls.
    #[inline]
    pub fn send_frame(&self, frame: Frame) -> Result<(), StreamError> {
        if self.is_lost() {
            return Err(StreamError::ConnectionLost);
        }
        logger_trace!(self.logger, "{} send {:?}", self.name, frame);
        if self.frame_tx.send(frame).is_err() {
            return Err(StreamError::ConnectionLost);
        }
        Ok(())
    }

    /// The channel is broken or closed, fail every live stream.
    pub fn mark_lost(&self, reason: &str) {
        if self.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        let n = self.table.clear();
        logger_warn!(self.logger, "{} connection lost ({}), {} live streams", self.name, reason, n);
    }

    /// Deliver a non-Open frame to its stream.
    ///
    /// `last` means the frame ends the call as seen by this side, the entry is dropped after it.
    pub fn route(&self, frame: Frame, last: bool) {
        let id = frame.stream_id;
        let kind = frame.kind;
        let item = match kind {
            FrameKind::Data => Inbound::Data(frame.payload.unwrap_or_default()),
            FrameKind::HalfClose => Inbound::HalfClose,
            FrameKind::End => Inbound::End(frame.payload),
            FrameKind::Error => match frame.err {
                Some(e) => Inbound::Error(e),
                None => Inbound::Error(strand_rpc_core::error::RpcIntErr::Internal.into()),
            },
            FrameKind::Open => {
                logger_warn!(self.logger, "{} unexpected open for stream {}", self.name, id);
                return;
            }
        };
        let routed = if last { self.table.route_last(id, item) } else { self.table.route(id, item) };
        if !routed {
            logger_trace!(self.logger, "{} ignore late {:?} of stream {}", self.name, kind, id);
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Drains the outbound queue into the transport, flushing after each batch.
struct Writer<F: ConnFacts, T: FrameTransport> {
    transport: Arc<T>,
    frame_rx: AsyncRx<Frame>,
    conn: Weak<ConnShared<F>>,
    _ref_count: Option<Arc<()>>,
}

impl<F: ConnFacts, T: FrameTransport> Writer<F, T> {
    async fn run(mut self) {
        if let Err(e) = self.write_loop().await {
            if let Some(conn) = self.conn.upgrade() {
                logger_warn!(conn.logger, "{} {:?} write error: {}", conn.name, self.transport, e);
                conn.mark_lost("write error");
            }
        } else {
            trace!("{:?} writer exits", self.transport);
        }
        self.transport.close().await;
    }

    async fn write_loop(&mut self) -> std::io::Result<()> {
        // Ends when every sender is gone, that is after the connection is dropped
        while let Ok(frame) = self.frame_rx.recv().await {
            self.transport.write_frame(frame).await?;
            while let Ok(frame) = self.frame_rx.try_recv() {
                self.transport.write_frame(frame).await?;
            }
            self.transport.flush().await?;
        }
        Ok(())
    }
}
