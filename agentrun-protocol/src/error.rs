//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding frames.
///
/// Decoding never panics: every failure on untrusted input maps to one of
/// these variants.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing '{0}' discriminant")]
    MissingDiscriminant(&'static str),

    #[error("unknown frame discriminant: {0}")]
    UnknownDiscriminant(String),

    #[error("invalid payload for '{name}': {message}")]
    InvalidPayload { name: String, message: String },

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Wire-style kind for an unparseable frame.
pub const PARSE_ERROR: &str = "parse_error";

/// Wire-style kind for a frame whose discriminant is known but whose payload
/// could not be handled.
pub const EVENT_HANDLING_ERROR: &str = "event_handling_error";

impl ProtocolError {
    /// Returns the wire-style error kind reported to the run handler.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::InvalidPayload { .. } => EVENT_HANDLING_ERROR,
            _ => PARSE_ERROR,
        }
    }

    /// Returns the discriminant of the offending frame, if it was readable.
    pub fn frame_name(&self) -> Option<&str> {
        match self {
            ProtocolError::UnknownDiscriminant(name) => Some(name),
            ProtocolError::InvalidPayload { name, .. } => Some(name),
            _ => None,
        }
    }
}
