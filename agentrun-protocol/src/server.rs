//! Server-to-client frames.
//!
//! Every frame is a JSON object whose `event` field names the variant.
//! Three variants are bidirectional requests: the server expects a response
//! frame carrying the same `request_id`.

use crate::types::{MessagePart, StreamPosition, ZoteroItemReference};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerFrame {
    Ready(ReadyEvent),
    RequestAck(RequestAckEvent),
    Part(PartEvent),
    ToolReturn(ToolReturnEvent),
    ToolCallProgress(ToolCallProgressEvent),
    RunComplete(RunCompleteEvent),
    Done(DoneEvent),
    Thread(ThreadEvent),
    Error(ErrorEvent),
    Warning(WarningEvent),
    Retry(RetryEvent),
    AgentActions(AgentActionsEvent),
    AttachmentContentRequest(AttachmentContentRequest),
    ExternalReferenceCheckRequest(ExternalReferenceCheckRequest),
    ZoteroDataRequest(ZoteroDataRequest),
}

impl ServerFrame {
    /// Returns the discriminant of this frame.
    pub fn kind(&self) -> EventKind {
        match self {
            ServerFrame::Ready(_) => EventKind::Ready,
            ServerFrame::RequestAck(_) => EventKind::RequestAck,
            ServerFrame::Part(_) => EventKind::Part,
            ServerFrame::ToolReturn(_) => EventKind::ToolReturn,
            ServerFrame::ToolCallProgress(_) => EventKind::ToolCallProgress,
            ServerFrame::RunComplete(_) => EventKind::RunComplete,
            ServerFrame::Done(_) => EventKind::Done,
            ServerFrame::Thread(_) => EventKind::Thread,
            ServerFrame::Error(_) => EventKind::Error,
            ServerFrame::Warning(_) => EventKind::Warning,
            ServerFrame::Retry(_) => EventKind::Retry,
            ServerFrame::AgentActions(_) => EventKind::AgentActions,
            ServerFrame::AttachmentContentRequest(_) => EventKind::AttachmentContentRequest,
            ServerFrame::ExternalReferenceCheckRequest(_) => {
                EventKind::ExternalReferenceCheckRequest
            }
            ServerFrame::ZoteroDataRequest(_) => EventKind::ZoteroDataRequest,
        }
    }

    /// Returns the correlation id of a bidirectional request.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ServerFrame::AttachmentContentRequest(r) => Some(&r.request_id),
            ServerFrame::ExternalReferenceCheckRequest(r) => Some(&r.request_id),
            ServerFrame::ZoteroDataRequest(r) => Some(&r.request_id),
            _ => None,
        }
    }
}

/// Discriminant of a server frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    RequestAck,
    Part,
    ToolReturn,
    ToolCallProgress,
    RunComplete,
    Done,
    Thread,
    Error,
    Warning,
    Retry,
    AgentActions,
    AttachmentContentRequest,
    ExternalReferenceCheckRequest,
    ZoteroDataRequest,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::Ready,
        EventKind::RequestAck,
        EventKind::Part,
        EventKind::ToolReturn,
        EventKind::ToolCallProgress,
        EventKind::RunComplete,
        EventKind::Done,
        EventKind::Thread,
        EventKind::Error,
        EventKind::Warning,
        EventKind::Retry,
        EventKind::AgentActions,
        EventKind::AttachmentContentRequest,
        EventKind::ExternalReferenceCheckRequest,
        EventKind::ZoteroDataRequest,
    ];

    /// Wire name of the discriminant.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ready => "ready",
            EventKind::RequestAck => "request_ack",
            EventKind::Part => "part",
            EventKind::ToolReturn => "tool_return",
            EventKind::ToolCallProgress => "tool_call_progress",
            EventKind::RunComplete => "run_complete",
            EventKind::Done => "done",
            EventKind::Thread => "thread",
            EventKind::Error => "error",
            EventKind::Warning => "warning",
            EventKind::Retry => "retry",
            EventKind::AgentActions => "agent_actions",
            EventKind::AttachmentContentRequest => "attachment_content_request",
            EventKind::ExternalReferenceCheckRequest => "external_reference_check_request",
            EventKind::ZoteroDataRequest => "zotero_data_request",
        }
    }

    /// Looks up a discriminant by wire name.
    pub fn from_name(name: &str) -> Option<EventKind> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Output frames
// ============================================================================

/// Sent once the server accepted the auth frame and can take a run request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadyEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing_complete: Option<bool>,
}

/// Acknowledges the run request and names the model serving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestAckEvent {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_type: Option<String>,
}

/// One incremental output fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartEvent {
    pub run_id: String,
    pub message_index: u32,
    pub part_index: u32,
    pub part: MessagePart,
}

impl PartEvent {
    pub fn position(&self) -> StreamPosition {
        StreamPosition::new(self.message_index, self.part_index)
    }
}

/// Result of a server-side tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturnEvent {
    pub run_id: String,
    pub message_index: u32,
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub content: Value,
}

/// Progress notice for a long-running tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallProgressEvent {
    pub run_id: String,
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Final accounting for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompleteEvent {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub usage: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// The server will send nothing more for this run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoneEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Names the thread the run belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub thread_id: String,
}

/// Fatal server error. Ends the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Informational notice. Never ends the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningEvent {
    #[serde(rename = "type")]
    pub warning_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The server is retrying a failed upstream call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEvent {
    pub run_id: String,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// Actions the agent proposes to apply to the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActionsEvent {
    pub run_id: String,
    #[serde(default)]
    pub actions: Vec<Value>,
}

// ============================================================================
// Bidirectional requests
// ============================================================================

/// Asks for the text content of an attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentContentRequest {
    pub request_id: String,
    pub attachment: ZoteroItemReference,
    /// 1-based page numbers. `None` asks for the whole attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_numbers: Option<Vec<u32>>,
}

/// Bibliographic descriptor of a reference found outside the library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    /// Creator surnames.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creators: Vec<String>,
}

/// Asks which external references already exist in the local library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalReferenceCheckRequest {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<i64>,
    pub items: Vec<ExternalReference>,
}

/// Asks for serialized item and attachment records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoteroDataRequest {
    pub request_id: String,
    pub items: Vec<ZoteroItemReference>,
    #[serde(default)]
    pub include_attachments: bool,
    #[serde(default)]
    pub include_parents: bool,
}
