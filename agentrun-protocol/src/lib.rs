//! # agentrun-protocol
//!
//! Wire protocol for agentrun, the streaming agent-run connection.
//!
//! This crate provides:
//! - Server-to-client frames (`event` discriminant), including the bidirectional
//!   data requests the server issues mid-stream
//! - Client-to-server frames (`type` discriminant): auth, run request, cancel and
//!   the correlated responses
//! - A JSON codec that never panics on untrusted input and classifies every
//!   failure
//! - Close codes used by the connection

pub mod client;
pub mod codec;
pub mod error;
pub mod server;
pub mod types;

pub use client::{ClientFrame, ModelSelection, RunRequest, UserPrompt};
pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use server::{EventKind, ServerFrame};
pub use types::{MessagePart, StreamPosition, ZoteroItemReference};

/// Close code for a normal close, including cancellation.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code used when the server reported a fatal `error` frame.
pub const CLOSE_SERVER_ERROR: u16 = 1011;

/// Default path of the agent-run WebSocket endpoint.
pub const DEFAULT_WS_PATH: &str = "/api/v1/agent/ws";
