use super::dispatch::Dispatcher;
use super::{ServerFacts, ServiceRegistry};
use crate::conn::ConnShared;
use crate::transport::FrameTransport;
use captains_log::LogFilter;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use strand_rpc_core::{
    context::CallContext, error::StreamError, io::Cancellable, runtime::AsyncIO,
};

/// Serves any number of connections with one [ServiceRegistry].
///
/// Accepting connections is left to the caller, each established frame channel is handed over
/// with [serve_conn()](Self::serve_conn).
pub struct RpcServer<F: ServerFacts> {
    facts: Arc<F>,
    registry: Arc<ServiceRegistry<F>>,
    logger: Arc<LogFilter>,
    conn_ref_count: Arc<()>,
    server_ctx: CallContext,
}

impl<F: ServerFacts> RpcServer<F> {
    pub fn new(facts: Arc<F>, registry: ServiceRegistry<F>) -> Self {
        Self {
            logger: facts.new_logger(),
            facts,
            registry: Arc::new(registry),
            conn_ref_count: Arc::new(()),
            server_ctx: CallContext::background(),
        }
    }

    #[inline]
    pub fn registry(&self) -> &ServiceRegistry<F> {
        &self.registry
    }

    /// Spawn the reader and writer of a connection, returns immediately.
    ///
    /// The connection lives until the peer disconnects, it stays idle longer than
    /// `ServerConfig.idle_timeout`, or the server is closed.
    pub fn serve_conn<T: FrameTransport>(&self, transport: T) -> Result<(), StreamError> {
        if self.server_ctx.is_cancelled() {
            logger_warn!(self.logger, "server closed, refuse {:?}", transport);
            return Err(StreamError::StreamClosed);
        }
        let transport = Arc::new(transport);
        let root_ctx = self.server_ctx.child();
        let conn = ConnShared::new(
            self.facts.clone(),
            transport.clone(),
            "server",
            root_ctx.clone(),
            Some(self.conn_ref_count.clone()),
        );
        logger_debug!(self.logger, "serve {:?}", transport);
        let last_active = Arc::new(Mutex::new(Instant::now()));
        let idle_timeout = self.facts.get_config().idle_timeout;
        if idle_timeout > Duration::from_secs(0) {
            let watcher = IdleWatcher { conn: conn.clone(), last_active: last_active.clone() };
            self.facts.spawn_detach(watcher.run(idle_timeout));
        }
        let reader = Reader {
            dispatcher: Dispatcher::new(conn.clone(), self.registry.clone()),
            conn,
            transport,
            last_active,
        };
        self.facts.spawn_detach(reader.run());
        Ok(())
    }

    /// Connections not fully closed yet
    #[inline]
    pub fn get_alive_conn(&self) -> usize {
        Arc::strong_count(&self.conn_ref_count) - 1
    }

    /// Gracefully close the server
    ///
    /// Steps:
    /// - cancel the server context, every connection reader stops, every handler observes cancellation.
    /// - the handlers emit their terminal frames, the writer of a connection closes the channel
    /// once the last stream is gone.
    /// - wait for connections to close with a timeout defined by ServerConfig.server_close_wait
    pub async fn close(&self) {
        self.server_ctx.cancel();
        let mut exists_count = self.get_alive_conn();
        let start_ts = Instant::now();
        let config = self.facts.get_config();
        while exists_count > 0 {
            <F::IO as AsyncIO>::sleep(Duration::from_millis(100)).await;
            exists_count = self.get_alive_conn();
            if Instant::now().duration_since(start_ts) > config.server_close_wait {
                logger_warn!(
                    self.logger,
                    "closed as wait too long for all conn closed voluntarily({} conn left)",
                    exists_count,
                );
                break;
            }
        }
        logger_info!(self.logger, "server closed with alive conn {}", exists_count);
    }
}

struct Reader<F: ServerFacts, T: FrameTransport> {
    conn: Arc<ConnShared<F>>,
    dispatcher: Dispatcher<F>,
    transport: Arc<T>,
    last_active: Arc<Mutex<Instant>>,
}

impl<F: ServerFacts, T: FrameTransport> Reader<F, T> {
    async fn run(self) {
        let root_ctx = self.conn.root_ctx.clone();
        loop {
            match Cancellable::new(self.transport.read_frame(), root_ctx.cancelled()).await {
                Err(()) => {
                    // Server closed or idle, the handlers still flush their terminal frames
                    logger_debug!(self.conn.logger, "{:?} reader stopped", self.transport);
                    return;
                }
                Ok(Err(e)) => {
                    logger_debug!(self.conn.logger, "{:?} read error: {}", self.transport, e);
                    self.conn.mark_lost("read error");
                    root_ctx.cancel();
                    return;
                }
                Ok(Ok(frame)) => {
                    logger_trace!(self.conn.logger, "server recv {:?}", frame);
                    *self.last_active.lock().unwrap() = Instant::now();
                    self.dispatcher.dispatch(frame);
                }
            }
        }
    }
}

/// Cancels the connection once no stream is live and no frame arrived for `idle_timeout`.
struct IdleWatcher<F: ServerFacts> {
    conn: Arc<ConnShared<F>>,
    last_active: Arc<Mutex<Instant>>,
}

impl<F: ServerFacts> IdleWatcher<F> {
    async fn run(self, idle_timeout: Duration) {
        let root_ctx = self.conn.root_ctx.clone();
        let mut wait = idle_timeout;
        loop {
            let sleep = <F::IO as AsyncIO>::sleep(wait);
            if Cancellable::new(sleep, root_ctx.cancelled()).await.is_err() {
                return;
            }
            let elapsed = self.last_active.lock().unwrap().elapsed();
            if self.conn.table.len() > 0 {
                wait = idle_timeout;
            } else if elapsed >= idle_timeout {
                logger_info!(self.conn.logger, "connection idle for {:?}, closing", elapsed);
                root_ctx.cancel();
                return;
            } else {
                wait = idle_timeout - elapsed;
            }
        }
    }
}
