//! This module contains the server-side: handler registration, the dispatcher and the server.
//!
//! ```ignore
//! let registry = ServiceRegistry::new()
//!     .unary("GetNumber", |_ctx, req: Request| async move { Ok(Response { count: req.initial_count + 1 }) })
//!     .bidi_streaming("ExchangeNumbers", exchange_numbers);
//! let server = RpcServer::new(ServerDefault::new(config, rt), registry);
//! server.serve_conn(transport)?;
//! ```

pub use strand_rpc_core::ServerConfig;

mod dispatch;
mod registry;
pub use registry::{MethodKind, ServiceRegistry};
mod server;
pub use server::RpcServer;

use crate::conn::ConnFacts;
use captains_log::LogFilter;
use std::future::Future;
use std::sync::Arc;
use strand_rpc_core::{Codec, RecvErrPolicy, runtime::AsyncIO};

/// A central hub defined by the user for the server-side, to define the customizable plugin.
pub trait ServerFacts: ConnFacts {
    /// You should keep ServerConfig inside ServerFacts, get_config() will return the reference.
    fn get_config(&self) -> &ServerConfig;
}

/// An example ServerFacts for general use
pub struct ServerDefault<IO: AsyncIO, C: Codec> {
    pub logger: Arc<LogFilter>,
    config: ServerConfig,
    rt: IO,
    _phan: std::marker::PhantomData<fn(&C)>,
}

impl<IO: AsyncIO, C: Codec> ServerDefault<IO, C> {
    pub fn new(config: ServerConfig, rt: IO) -> Arc<Self> {
        Arc::new(Self { logger: Arc::new(LogFilter::new()), config, rt, _phan: Default::default() })
    }

    #[inline]
    pub fn set_log_level(&self, level: log::Level) {
        self.logger.set_level(level);
    }
}

impl<IO: AsyncIO, C: Codec> ConnFacts for ServerDefault<IO, C> {
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

impl<IO: AsyncIO, C: Codec> ServerFacts for ServerDefault<IO, C> {
    #[inline]
    fn get_config(&self) -> &ServerConfig {
        &self.config
    }
}
