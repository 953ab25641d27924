//! Bidirectional request responder.
//!
//! Answers the data requests the server issues mid-stream. The responder
//! keeps no state between calls; every lookup is scoped to one request and
//! fanned out in parallel. Per-reference failures degrade to per-reference
//! entries in the response instead of failing the request.

use crate::error::DataError;
use crate::provider::{DataProvider, LibraryItem, ReferenceResolver};
use agentrun_protocol::client::{
    AttachmentContentResponse, DataErrorCode, ExternalReferenceCheckResponse,
    ExternalReferenceResult, PageContent, ZoteroDataError, ZoteroDataResponse,
};
use agentrun_protocol::server::{
    AttachmentContentRequest, ExternalReferenceCheckRequest, ZoteroDataRequest,
};
use agentrun_protocol::{ClientFrame, EventKind, ServerFrame, ZoteroItemReference};
use futures_util::future::{join, join_all};
use std::collections::HashSet;
use std::sync::Arc;

/// Error text for references with no local item.
pub const NOT_FOUND_MESSAGE: &str = "Item not found in local database";

/// Error text for attachments whose file is not stored locally.
pub const NOT_AVAILABLE_MESSAGE: &str = "Attachment file is not available locally";

/// Page text sent when the data provider cannot extract attachment content.
pub const CONTENT_UNAVAILABLE_PLACEHOLDER: &str =
    "[Attachment content extraction is not implemented for this library]";

/// A server frame that requires a correlated response.
#[derive(Debug, Clone, PartialEq)]
pub enum BidirectionalRequest {
    AttachmentContent(AttachmentContentRequest),
    ExternalReferenceCheck(ExternalReferenceCheckRequest),
    ZoteroData(ZoteroDataRequest),
}

impl BidirectionalRequest {
    /// Splits bidirectional requests from other frames.
    pub fn from_frame(frame: ServerFrame) -> Result<Self, ServerFrame> {
        match frame {
            ServerFrame::AttachmentContentRequest(r) => Ok(Self::AttachmentContent(r)),
            ServerFrame::ExternalReferenceCheckRequest(r) => Ok(Self::ExternalReferenceCheck(r)),
            ServerFrame::ZoteroDataRequest(r) => Ok(Self::ZoteroData(r)),
            other => Err(other),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::AttachmentContent(r) => &r.request_id,
            Self::ExternalReferenceCheck(r) => &r.request_id,
            Self::ZoteroData(r) => &r.request_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::AttachmentContent(_) => EventKind::AttachmentContentRequest,
            Self::ExternalReferenceCheck(_) => EventKind::ExternalReferenceCheckRequest,
            Self::ZoteroData(_) => EventKind::ZoteroDataRequest,
        }
    }
}

/// Services bidirectional requests against the injected collaborators.
pub struct Responder {
    data: Arc<dyn DataProvider>,
    resolver: Arc<dyn ReferenceResolver>,
}

impl Responder {
    pub fn new(data: Arc<dyn DataProvider>, resolver: Arc<dyn ReferenceResolver>) -> Self {
        Self { data, resolver }
    }

    /// Produces the response frame for `request`. The response always echoes
    /// the request's `request_id`.
    pub async fn respond(&self, request: &BidirectionalRequest) -> Result<ClientFrame, DataError> {
        tracing::debug!(
            request_id = request.request_id(),
            "servicing {}",
            request.kind()
        );
        let frame = match request {
            BidirectionalRequest::AttachmentContent(r) => {
                ClientFrame::AttachmentContent(self.attachment_content(r).await?)
            }
            BidirectionalRequest::ExternalReferenceCheck(r) => {
                ClientFrame::ExternalReferenceCheck(self.check_external_references(r).await)
            }
            BidirectionalRequest::ZoteroData(r) => ClientFrame::ZoteroData(self.zotero_data(r).await),
        };
        Ok(frame)
    }

    async fn attachment_content(
        &self,
        request: &AttachmentContentRequest,
    ) -> Result<AttachmentContentResponse, DataError> {
        let pages = self
            .data
            .attachment_pages(&request.attachment, request.page_numbers.as_deref())
            .await?;

        let response = match pages {
            Some(pages) => AttachmentContentResponse {
                request_id: request.request_id.clone(),
                attachment: request.attachment.clone(),
                pages: pages.pages,
                total_pages: pages.total_pages,
                error: None,
            },
            None => {
                tracing::debug!(
                    attachment = %request.attachment,
                    "content extraction unsupported, sending placeholder"
                );
                let numbers = request.page_numbers.clone().unwrap_or_else(|| vec![1]);
                AttachmentContentResponse {
                    request_id: request.request_id.clone(),
                    attachment: request.attachment.clone(),
                    pages: numbers
                        .into_iter()
                        .map(|page_number| PageContent {
                            page_number,
                            content: CONTENT_UNAVAILABLE_PLACEHOLDER.to_string(),
                        })
                        .collect(),
                    total_pages: None,
                    error: None,
                }
            }
        };
        Ok(response)
    }

    async fn check_external_references(
        &self,
        request: &ExternalReferenceCheckRequest,
    ) -> ExternalReferenceCheckResponse {
        let lookups = request.items.iter().map(|reference| async move {
            match self.resolver.resolve(request.library_id, reference).await {
                Ok(Some(item)) => ExternalReferenceResult::found(&reference.id, item),
                Ok(None) => ExternalReferenceResult::not_found(&reference.id),
                Err(e) => {
                    tracing::warn!(reference = %reference.id, "reference lookup failed: {}", e);
                    ExternalReferenceResult::not_found(&reference.id)
                }
            }
        });

        let results = join_all(lookups).await;
        tracing::debug!(
            request_id = %request.request_id,
            "checked {} external references ({} found)",
            results.len(),
            results.iter().filter(|r| r.exists).count()
        );

        ExternalReferenceCheckResponse {
            request_id: request.request_id.clone(),
            results,
        }
    }

    async fn zotero_data(&self, request: &ZoteroDataRequest) -> ZoteroDataResponse {
        let collected = self.collect(request).await;
        let (items, attachments, mut errors) = self.serialize(&collected).await;

        let mut all_errors = collected.errors;
        all_errors.append(&mut errors);

        tracing::debug!(
            request_id = %request.request_id,
            "serialized {} items, {} attachments, {} errors",
            items.len(),
            attachments.len(),
            all_errors.len()
        );

        ZoteroDataResponse {
            request_id: request.request_id.clone(),
            items,
            attachments,
            errors: all_errors,
        }
    }

    /// Phase 1: load the requested references and, depending on the flags,
    /// their parents and attachments. Every item is collected once.
    async fn collect(&self, request: &ZoteroDataRequest) -> Collected {
        let mut collected = Collected::default();

        let requested = dedup(request.items.iter().cloned(), &HashSet::new());
        let loaded = self.load_all(&requested).await;

        let mut related = Vec::new();
        for (reference, result) in requested.iter().zip(loaded) {
            let Some(item) = collected.accept(reference, result) else {
                continue;
            };
            if item.is_attachment() {
                if request.include_parents {
                    related.extend(item.parent_reference());
                }
            } else if request.include_attachments {
                related.extend(item.attachment_references());
            }
        }

        let related = dedup(related.into_iter(), &collected.attempted);
        let loaded = self.load_all(&related).await;
        for (reference, result) in related.iter().zip(loaded) {
            collected.accept(reference, result);
        }

        collected
    }

    async fn load_all(
        &self,
        references: &[ZoteroItemReference],
    ) -> Vec<Result<Option<LibraryItem>, DataError>> {
        join_all(references.iter().map(|r| self.data.load_item(r))).await
    }

    /// Phase 2: serialize every collected item and attachment in parallel.
    async fn serialize(
        &self,
        collected: &Collected,
    ) -> (Vec<serde_json::Value>, Vec<serde_json::Value>, Vec<ZoteroDataError>) {
        let (item_results, attachment_results) = join(
            join_all(collected.items.iter().map(|i| self.data.serialize_item(i))),
            join_all(
                collected
                    .attachments
                    .iter()
                    .map(|a| self.data.serialize_attachment(a)),
            ),
        )
        .await;

        let mut items = Vec::new();
        let mut attachments = Vec::new();
        let mut errors = Vec::new();

        for (item, result) in collected.items.iter().zip(item_results) {
            match result {
                Ok(value) => items.push(value),
                Err(e) => errors.push(ZoteroDataError::new(
                    item.reference.clone(),
                    DataErrorCode::LoadFailed,
                    e.to_string(),
                )),
            }
        }

        for (attachment, result) in collected.attachments.iter().zip(attachment_results) {
            match result {
                Ok(Some(value)) => attachments.push(value),
                Ok(None) => errors.push(ZoteroDataError::new(
                    attachment.reference.clone(),
                    DataErrorCode::NotAvailable,
                    NOT_AVAILABLE_MESSAGE,
                )),
                Err(e) => errors.push(ZoteroDataError::new(
                    attachment.reference.clone(),
                    DataErrorCode::LoadFailed,
                    e.to_string(),
                )),
            }
        }

        (items, attachments, errors)
    }

    /// Builds an error-shaped response for a request that could not be
    /// serviced, echoing its `request_id`.
    pub fn degraded(request: &BidirectionalRequest, message: &str) -> ClientFrame {
        match request {
            BidirectionalRequest::AttachmentContent(r) => {
                ClientFrame::AttachmentContent(AttachmentContentResponse {
                    request_id: r.request_id.clone(),
                    attachment: r.attachment.clone(),
                    pages: Vec::new(),
                    total_pages: None,
                    error: Some(message.to_string()),
                })
            }
            BidirectionalRequest::ExternalReferenceCheck(r) => {
                ClientFrame::ExternalReferenceCheck(ExternalReferenceCheckResponse {
                    request_id: r.request_id.clone(),
                    results: r
                        .items
                        .iter()
                        .map(|reference| ExternalReferenceResult::not_found(&reference.id))
                        .collect(),
                })
            }
            BidirectionalRequest::ZoteroData(r) => ClientFrame::ZoteroData(ZoteroDataResponse {
                request_id: r.request_id.clone(),
                items: Vec::new(),
                attachments: Vec::new(),
                errors: r
                    .items
                    .iter()
                    .map(|reference| {
                        ZoteroDataError::new(reference.clone(), DataErrorCode::LoadFailed, message)
                    })
                    .collect(),
            }),
        }
    }
}

/// Items gathered in phase 1, unique by `(library_id, zotero_key)`.
#[derive(Default)]
struct Collected {
    items: Vec<LibraryItem>,
    attachments: Vec<LibraryItem>,
    errors: Vec<ZoteroDataError>,
    seen: HashSet<ZoteroItemReference>,
    /// Every reference loaded so far, found or not.
    attempted: HashSet<ZoteroItemReference>,
}

impl Collected {
    /// Records a load result. Returns the item if it was newly collected.
    fn accept(
        &mut self,
        reference: &ZoteroItemReference,
        result: Result<Option<LibraryItem>, DataError>,
    ) -> Option<LibraryItem> {
        self.attempted.insert(reference.clone());
        match result {
            Ok(Some(item)) => {
                if !self.seen.insert(item.reference.clone()) {
                    return None;
                }
                if item.is_attachment() {
                    self.attachments.push(item.clone());
                } else {
                    self.items.push(item.clone());
                }
                Some(item)
            }
            Ok(None) => {
                self.errors.push(ZoteroDataError::new(
                    reference.clone(),
                    DataErrorCode::NotFound,
                    NOT_FOUND_MESSAGE,
                ));
                None
            }
            Err(e) => {
                tracing::warn!(reference = %reference, "failed to load item: {}", e);
                self.errors.push(ZoteroDataError::new(
                    reference.clone(),
                    DataErrorCode::LoadFailed,
                    e.to_string(),
                ));
                None
            }
        }
    }
}

/// Removes duplicates and anything in `exclude`, keeping first occurrences.
fn dedup(
    references: impl Iterator<Item = ZoteroItemReference>,
    exclude: &HashSet<ZoteroItemReference>,
) -> Vec<ZoteroItemReference> {
    let mut seen = HashSet::new();
    references
        .filter(|r| !exclude.contains(r) && seen.insert(r.clone()))
        .collect()
}
