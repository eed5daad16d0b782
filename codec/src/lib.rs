#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # strand-rpc-codec
//!
//! This crate provides [strand_rpc_core::Codec] implementations for `strand-rpc-stream`.
//! It supports different serialization formats, such as `msgpack`.

pub use strand_rpc_core::Codec;
#[cfg(feature = "msgpack")]
mod msgpack;
#[cfg(feature = "msgpack")]
pub use msgpack::*;
