//! Value types shared by server and client frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Reference to an item or attachment in the local library.
///
/// Items are unique by `(library_id, zotero_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoteroItemReference {
    pub library_id: i64,
    pub zotero_key: String,
}

impl ZoteroItemReference {
    pub fn new(library_id: i64, zotero_key: impl Into<String>) -> Self {
        Self {
            library_id,
            zotero_key: zotero_key.into(),
        }
    }
}

impl fmt::Display for ZoteroItemReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.library_id, self.zotero_key)
    }
}

/// Position of a streamed part within the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamPosition {
    pub message_index: u32,
    pub part_index: u32,
}

impl StreamPosition {
    pub fn new(message_index: u32, part_index: u32) -> Self {
        Self {
            message_index,
            part_index,
        }
    }

    /// Returns whether `self` may be dispatched after `previous`.
    ///
    /// Within a message, part indices strictly increase. Message indices
    /// never go backwards; a new message may start at any part index.
    pub fn follows(&self, previous: &StreamPosition) -> bool {
        match self.message_index.cmp(&previous.message_index) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.part_index > previous.part_index,
            std::cmp::Ordering::Less => false,
        }
    }
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.message_index, self.part_index)
    }
}

/// Incremental fragment of assistant output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        content: String,
    },
    Thinking {
        content: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: Value,
    },
}

impl MessagePart {
    /// Returns the textual content for text and thinking parts.
    pub fn content(&self) -> Option<&str> {
        match self {
            MessagePart::Text { content } | MessagePart::Thinking { content } => Some(content),
            MessagePart::ToolCall { .. } => None,
        }
    }
}
