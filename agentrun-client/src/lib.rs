//! # agentrun-client
//!
//! Client library for agentrun.
//!
//! This crate provides:
//! - A run supervisor driving one WebSocket connection through auth, the ready
//!   gate and streaming
//! - Ordered dispatch of output frames to a caller-supplied [`RunHandler`]
//! - Concurrent servicing of the server's bidirectional data requests
//! - Cooperative cancellation with a bounded grace window
//! - Optional TLS configuration for `wss` endpoints

pub mod client;
pub mod connection;
mod dispatch;
pub mod error;
pub mod handler;
pub mod provider;
pub mod responder;
pub mod state;
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

pub use client::RunClient;
pub use connection::{ClientConfig, TlsClientConfig};
pub use error::{AuthError, ClientError, DataError, RunError};
pub use handler::{NoopHandler, RunHandler};
pub use provider::{
    AttachmentPages, AuthTokenProvider, DataProvider, ItemKind, LibraryItem, ReferenceResolver,
    StaticToken,
};
pub use responder::{BidirectionalRequest, Responder};
pub use state::{ConnectionState, ModelIdentity, RunContext};
