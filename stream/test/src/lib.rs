extern crate strand_rpc_stream;

pub mod service;

extern crate captains_log;
extern crate log;
pub use captains_log::logfn;
pub use strand_rpc_core::runtime::AsyncIO;

use captains_log::*;
use rstest::*;
use std::fmt;
use std::sync::Arc;
use strand_rpc_stream::client::{ClientConfig, RpcClient};
use strand_rpc_stream::server::{RpcServer, ServerConfig, ServiceRegistry};
use strand_rpc_stream::transport::{mem::mem_pair, sock::socket_pair};

#[cfg(feature = "tokio")]
use tokio::runtime::Runtime;

#[cfg(feature = "tokio")]
pub type RT = strand_rpc_tokio::TokioRT;
#[cfg(not(feature = "tokio"))]
pub type RT = strand_rpc_smol::SmolRT;

pub type Codec = strand_rpc_codec::MsgpCodec;

pub type TestClient = strand_rpc_stream::client::ClientDefault<RT, Codec>;
pub type TestServer = strand_rpc_stream::server::ServerDefault<RT, Codec>;

#[macro_export]
macro_rules! async_spawn {
    ($f: expr) => {{
        #[cfg(feature = "tokio")]
        {
            let _ = tokio::spawn($f);
        }
        #[cfg(not(feature = "tokio"))]
        {
            let _ = smol::spawn($f).detach();
        }
    }};
}

/// Must be called inside TestRunner::block_on()
pub fn new_rt() -> RT {
    #[cfg(feature = "tokio")]
    {
        strand_rpc_tokio::TokioRT::current()
    }
    #[cfg(not(feature = "tokio"))]
    {
        strand_rpc_smol::SmolRT::new_global()
    }
}

/// The frame channel connecting a test client to the server
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Chan {
    Mem,
    Sock,
}

pub fn init_server(
    config: ServerConfig, registry: ServiceRegistry<TestServer>,
) -> RpcServer<TestServer> {
    RpcServer::new(TestServer::new(config, new_rt()), registry)
}

/// Connect a new client to the server over the chosen frame channel
pub fn connect(
    chan: Chan, config: ClientConfig, server: &RpcServer<TestServer>,
) -> RpcClient<TestClient> {
    let facts = TestClient::new(config, new_rt());
    match chan {
        Chan::Mem => {
            let (a, b) = mem_pair();
            server.serve_conn(b).expect("serve");
            RpcClient::new(facts, a)
        }
        Chan::Sock => {
            let (a, b) = socket_pair::<RT>(0).expect("socket pair");
            server.serve_conn(b).expect("serve");
            RpcClient::new(facts, a)
        }
    }
}

pub fn init_pair(
    chan: Chan, registry: ServiceRegistry<TestServer>,
) -> (Arc<RpcClient<TestClient>>, RpcServer<TestServer>) {
    let server = init_server(ServerConfig::default(), registry);
    let client = connect(chan, ClientConfig::default(), &server);
    (Arc::new(client), server)
}

#[fixture]
pub fn runner() -> TestRunner {
    TestRunner::new()
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "")
    }
}

pub struct TestRunner {
    #[cfg(feature = "tokio")]
    rt: Runtime,
}

impl TestRunner {
    pub fn new() -> Self {
        recipe::raw_file_logger("/tmp/strand_rpc_test.log", Level::Trace)
            .test()
            .build()
            .expect("log");
        Self {
            #[cfg(feature = "tokio")]
            rt: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(8)
                .enable_all()
                .build()
                .unwrap(),
        }
    }

    pub fn block_on<F: Future<Output = ()> + Send + 'static>(&self, f: F) {
        #[cfg(feature = "tokio")]
        {
            self.rt.block_on(f);
        }
        #[cfg(not(feature = "tokio"))]
        {
            smol::block_on(f);
        }
    }
}

#[cfg(test)]
mod tests;
