#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # strand-rpc-stream
//!
//! This crate provides the streaming call engine of `strand-rpc`: unary, server-streaming,
//! client-streaming and bidirectional calls multiplexed over one frame channel.
//!
//! ## Components
//!
//! `strand-rpc` is built from a collection of crates that provide different functionalities:
//!
//! - `strand-rpc-core`: errors, config, [CallContext](crate::context::CallContext) and runtime traits.
//! - `strand-rpc-codec`: Provides codecs for serialization, such as `msgpack`.
//! - `strand-rpc-tokio`: A runtime adapter for the `tokio` runtime.
//! - `strand-rpc-smol`: A runtime adapter for the `smol` runtime.
//!
//! ## Layout
//!
//! - [proto]: the frame and its wire header
//! - [transport]: how frames travel, in-memory or over a unix/tcp socket
//! - [stream]: the typed per-call stream
//! - [client] and [server]: the two ends of a connection

#[macro_use]
extern crate captains_log;

pub mod client;
pub mod conn;
pub mod proto;
pub mod server;
pub mod stream;
pub mod table;
pub mod transport;

pub use conn::ConnFacts;
pub use strand_rpc_core::{ClientConfig, RecvErrPolicy, ServerConfig};
pub use strand_rpc_core::{context, error};
