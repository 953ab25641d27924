//! JSON codec for agentrun frames.
//!
//! One frame per WebSocket text message. Encoded frames are compact JSON and
//! never contain a newline, so captured sessions can be stored one frame per
//! line.

use crate::client::ClientFrame;
use crate::error::ProtocolError;
use crate::server::{EventKind, ServerFrame};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Encodes frames into wire text.
pub struct Encoder;

impl Encoder {
    /// Encodes a client frame.
    pub fn encode_client(frame: &ClientFrame) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(frame)?)
    }

    /// Encodes a server frame.
    pub fn encode_server(frame: &ServerFrame) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(frame)?)
    }
}

/// Decodes wire text into frames.
pub struct Decoder;

impl Decoder {
    /// Decodes a server frame.
    ///
    /// Unrecognized `event` names are rejected rather than ignored.
    pub fn decode_server(text: &str) -> Result<ServerFrame, ProtocolError> {
        decode_tagged(text, "event", |name| EventKind::from_name(name).is_some())
    }

    /// Decodes a client frame.
    pub fn decode_client(text: &str) -> Result<ClientFrame, ProtocolError> {
        decode_tagged(text, "type", |name| {
            matches!(
                name,
                "auth"
                    | "chat"
                    | "cancel"
                    | "attachment_content"
                    | "external_reference_check"
                    | "zotero_data"
            )
        })
    }
}

fn decode_tagged<T: DeserializeOwned>(
    text: &str,
    tag: &'static str,
    is_known: impl Fn(&str) -> bool,
) -> Result<T, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    let name = object
        .get(tag)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingDiscriminant(tag))?;

    if !is_known(name) {
        return Err(ProtocolError::UnknownDiscriminant(name.to_string()));
    }
    let name = name.to_string();

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        name,
        message: e.to_string(),
    })
}
