//! Collaborators injected into the client.
//!
//! The client never reaches into global state: the token source, the local
//! item store and the reference matcher are passed to `RunClient::new`.

use crate::error::{AuthError, DataError};
use agentrun_protocol::client::PageContent;
use agentrun_protocol::server::ExternalReference;
use agentrun_protocol::ZoteroItemReference;
use async_trait::async_trait;
use serde_json::Value;

/// Supplies the bearer token sent in the `auth` frame.
#[async_trait]
pub trait AuthTokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl AuthTokenProvider for StaticToken {
    async fn token(&self) -> Result<String, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::MissingToken);
        }
        Ok(self.0.clone())
    }
}

/// What kind of record a library item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Regular,
    Attachment,
    Note,
}

/// An item as loaded from the local store, with its relations.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryItem {
    pub reference: ZoteroItemReference,
    pub kind: ItemKind,
    /// Key of the parent item, for attachments and child notes.
    pub parent_key: Option<String>,
    /// Keys of child attachments, for regular items.
    pub attachment_keys: Vec<String>,
}

impl LibraryItem {
    pub fn new(reference: ZoteroItemReference, kind: ItemKind) -> Self {
        Self {
            reference,
            kind,
            parent_key: None,
            attachment_keys: Vec::new(),
        }
    }

    pub fn with_parent(mut self, key: impl Into<String>) -> Self {
        self.parent_key = Some(key.into());
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>) -> Self {
        self.attachment_keys.push(key.into());
        self
    }

    pub fn is_attachment(&self) -> bool {
        self.kind == ItemKind::Attachment
    }

    /// Reference to the parent item in the same library.
    pub fn parent_reference(&self) -> Option<ZoteroItemReference> {
        self.parent_key
            .as_ref()
            .map(|key| ZoteroItemReference::new(self.reference.library_id, key.clone()))
    }

    /// References to child attachments in the same library.
    pub fn attachment_references(&self) -> impl Iterator<Item = ZoteroItemReference> + '_ {
        self.attachment_keys
            .iter()
            .map(|key| ZoteroItemReference::new(self.reference.library_id, key.clone()))
    }
}

/// Extracted text of an attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentPages {
    pub pages: Vec<PageContent>,
    pub total_pages: Option<u32>,
}

/// Resolves item and attachment references to serializable records.
///
/// Implementations must tolerate concurrent calls for unrelated references.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Loads an item. `Ok(None)` means no such item exists.
    async fn load_item(
        &self,
        reference: &ZoteroItemReference,
    ) -> Result<Option<LibraryItem>, DataError>;

    /// Serializes a regular item (or note) for the server.
    async fn serialize_item(&self, item: &LibraryItem) -> Result<Value, DataError>;

    /// Serializes an attachment. `Ok(None)` means its file is not available
    /// locally.
    async fn serialize_attachment(&self, attachment: &LibraryItem)
        -> Result<Option<Value>, DataError>;

    /// Returns page text for an attachment. `Ok(None)` means content
    /// extraction is not supported by this store.
    async fn attachment_pages(
        &self,
        _attachment: &ZoteroItemReference,
        _page_numbers: Option<&[u32]>,
    ) -> Result<Option<AttachmentPages>, DataError> {
        Ok(None)
    }
}

/// Matches external bibliographic descriptors against the local store.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Returns the matching local item, if any.
    async fn resolve(
        &self,
        library_id: Option<i64>,
        reference: &ExternalReference,
    ) -> Result<Option<ZoteroItemReference>, DataError>;
}
