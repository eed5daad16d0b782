//! # strand-rpc-core
//!
//! This crate provides the core utilities for `strand-rpc`.
//! It includes the error taxonomy, the codec interface, configuration, the call-scoped
//! [CallContext](crate::context::CallContext) and the runtime adaptor traits shared by the other
//! crates in the workspace.

mod codec;
pub use codec::Codec;
mod config;
pub use config::*;
pub mod context;
pub mod error;
pub mod io;
pub mod runtime;
