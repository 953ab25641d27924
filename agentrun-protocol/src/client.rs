//! Client-to-server frames.
//!
//! Every frame is a JSON object whose `type` field names the variant. The
//! `auth` frame must be the first frame on a connection and `chat` is sent
//! exactly once, after the server's `ready`.

use crate::types::ZoteroItemReference;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
    Chat(RunRequest),
    Cancel,
    AttachmentContent(AttachmentContentResponse),
    ExternalReferenceCheck(ExternalReferenceCheckResponse),
    ZoteroData(ZoteroDataResponse),
}

impl ClientFrame {
    /// Wire name of the discriminant.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientFrame::Auth { .. } => "auth",
            ClientFrame::Chat(_) => "chat",
            ClientFrame::Cancel => "cancel",
            ClientFrame::AttachmentContent(_) => "attachment_content",
            ClientFrame::ExternalReferenceCheck(_) => "external_reference_check",
            ClientFrame::ZoteroData(_) => "zotero_data",
        }
    }

    /// Returns the correlation id echoed by a response frame.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientFrame::AttachmentContent(r) => Some(&r.request_id),
            ClientFrame::ExternalReferenceCheck(r) => Some(&r.request_id),
            ClientFrame::ZoteroData(r) => Some(&r.request_id),
            _ => None,
        }
    }
}

// ============================================================================
// Run request
// ============================================================================

/// The user's message for this run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPrompt {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ZoteroItemReference>,
}

impl UserPrompt {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, reference: ZoteroItemReference) -> Self {
        self.attachments.push(reference);
        self
    }
}

/// How the run selects its model: platform credentials or a custom model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSelection {
    Platform { access_id: String, api_key: String },
    Custom { custom_model: Value },
}

/// The run request (`chat` frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_id: String,
    /// `None` starts a new thread; serialized as `null`.
    pub thread_id: Option<String>,
    pub user_prompt: UserPrompt,
    #[serde(flatten)]
    pub model: ModelSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message_id: Option<String>,
}

impl RunRequest {
    pub fn new(run_id: impl Into<String>, user_prompt: UserPrompt, model: ModelSelection) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id: None,
            user_prompt,
            model,
            retry_run_id: None,
            custom_instructions: None,
            assistant_message_id: None,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_retry_of(mut self, run_id: impl Into<String>) -> Self {
        self.retry_run_id = Some(run_id.into());
        self
    }

    pub fn with_custom_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.custom_instructions = Some(instructions.into());
        self
    }

    pub fn with_assistant_message_id(mut self, id: impl Into<String>) -> Self {
        self.assistant_message_id = Some(id.into());
        self
    }
}

// ============================================================================
// Responses to bidirectional requests
// ============================================================================

/// Text of one attachment page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub page_number: u32,
    pub content: String,
}

/// Answer to `attachment_content_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentContentResponse {
    pub request_id: String,
    pub attachment: ZoteroItemReference,
    pub pages: Vec<PageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Match result for one external reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalReferenceResult {
    pub id: String,
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ZoteroItemReference>,
}

impl ExternalReferenceResult {
    pub fn found(id: impl Into<String>, item: ZoteroItemReference) -> Self {
        Self {
            id: id.into(),
            exists: true,
            item: Some(item),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exists: false,
            item: None,
        }
    }
}

/// Answer to `external_reference_check_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalReferenceCheckResponse {
    pub request_id: String,
    pub results: Vec<ExternalReferenceResult>,
}

/// Why a reference is missing from a `zotero_data` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataErrorCode {
    NotFound,
    LoadFailed,
    NotAvailable,
}

impl std::fmt::Display for DataErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataErrorCode::NotFound => write!(f, "not_found"),
            DataErrorCode::LoadFailed => write!(f, "load_failed"),
            DataErrorCode::NotAvailable => write!(f, "not_available"),
        }
    }
}

/// Per-reference failure inside a `zotero_data` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoteroDataError {
    pub reference: ZoteroItemReference,
    pub error: String,
    pub error_code: DataErrorCode,
}

impl ZoteroDataError {
    pub fn new(
        reference: ZoteroItemReference,
        error_code: DataErrorCode,
        error: impl Into<String>,
    ) -> Self {
        Self {
            reference,
            error: error.into(),
            error_code,
        }
    }
}

/// Answer to `zotero_data_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoteroDataResponse {
    pub request_id: String,
    pub items: Vec<Value>,
    pub attachments: Vec<Value>,
    pub errors: Vec<ZoteroDataError>,
}
