//! Client error types.
//!
//! Setup-phase failures come back from `RunClient::connect` as [`ClientError`].
//! Everything after the ready gate reaches the run handler as a [`RunError`].

use agentrun_protocol::{EventKind, ProtocolError};
use serde_json::Value;
use thiserror::Error;

/// Errors returned by `RunClient` operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("connection setup failed: {0}")]
    ConnectionSetup(String),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("timed out waiting for ready")]
    ReadyTimeout,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

impl ClientError {
    /// Returns whether this error happened before the ready gate.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Auth(_)
                | ClientError::ConnectionSetup(_)
                | ClientError::ConnectTimeout
                | ClientError::ReadyTimeout
        )
    }
}

/// Failure to obtain a bearer token.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("no token available")]
    MissingToken,

    #[error("token provider failed: {0}")]
    Provider(String),
}

/// Failure reported by a data collaborator.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("failed to load item: {0}")]
    Load(String),

    #[error("failed to serialize item: {0}")]
    Serialize(String),

    #[error("failed to resolve reference: {0}")]
    Resolve(String),
}

/// Kind reported for transport failures after setup.
pub const CONNECTION_ERROR: &str = "connection_error";

/// Errors delivered to `RunHandler::on_error`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    /// An explicit `error` frame. Always ends the run.
    #[error("server error ({error_type}): {message}")]
    Server {
        error_type: String,
        message: String,
        details: Option<Value>,
    },

    /// A frame that could not be decoded or handled.
    #[error("{kind}: {message}")]
    Protocol { kind: &'static str, message: String },

    /// A bidirectional request that could not be serviced locally.
    #[error("{kind} for request {request_id}: {message}")]
    RequestServicing {
        kind: &'static str,
        request_id: String,
        message: String,
    },

    /// The connection failed after setup.
    #[error("connection error: {0}")]
    Transport(String),
}

impl RunError {
    /// Returns the wire-style kind of this error, e.g. `llm_rate_limit`,
    /// `parse_error` or `zotero_data_failed`.
    pub fn kind(&self) -> &str {
        match self {
            RunError::Server { error_type, .. } => error_type,
            RunError::Protocol { kind, .. } => kind,
            RunError::RequestServicing { kind, .. } => kind,
            RunError::Transport(_) => CONNECTION_ERROR,
        }
    }

    /// Returns whether this error ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunError::Server { .. })
    }

    pub(crate) fn from_protocol(err: &ProtocolError) -> Self {
        RunError::Protocol {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn request_failed(
        request: EventKind,
        request_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        RunError::RequestServicing {
            kind: servicing_failure_kind(request),
            request_id: request_id.into(),
            message: message.into(),
        }
    }
}

/// Maps a bidirectional request kind to its `_failed` error kind.
pub fn servicing_failure_kind(request: EventKind) -> &'static str {
    match request {
        EventKind::AttachmentContentRequest => "attachment_content_failed",
        EventKind::ExternalReferenceCheckRequest => "external_reference_check_failed",
        EventKind::ZoteroDataRequest => "zotero_data_failed",
        _ => "request_failed",
    }
}
