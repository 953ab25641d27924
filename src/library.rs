//! Local library file backing data requests.
//!
//! The file is a JSON object with an `items` array. Each item names its
//! library, key and type; attachments name their parent and may carry page
//! text.

use agentrun_client::{
    AttachmentPages, DataError, DataProvider, ItemKind, LibraryItem, ReferenceResolver,
};
use agentrun_protocol::client::PageContent;
use agentrun_protocol::server::ExternalReference;
use agentrun_protocol::ZoteroItemReference;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to read library file '{0}': {1}")]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse library file '{0}': {1}")]
    Parse(PathBuf, serde_json::Error),
}

/// One record of the library file.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRecord {
    pub library_id: i64,
    pub key: String,
    #[serde(default = "default_item_type")]
    pub item_type: String,
    #[serde(default)]
    pub parent_key: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    /// Extra fields sent to the server as-is.
    #[serde(default)]
    pub data: Value,
    /// Page text, for attachments.
    #[serde(default)]
    pub pages: Option<Vec<String>>,
    #[serde(default = "default_file_available")]
    pub file_available: bool,
}

fn default_item_type() -> String {
    "journalArticle".to_string()
}

fn default_file_available() -> bool {
    true
}

impl ItemRecord {
    fn reference(&self) -> ZoteroItemReference {
        ZoteroItemReference::new(self.library_id, self.key.clone())
    }

    fn kind(&self) -> ItemKind {
        match self.item_type.as_str() {
            "attachment" => ItemKind::Attachment,
            "note" => ItemKind::Note,
            _ => ItemKind::Regular,
        }
    }

    fn to_library_item(&self) -> LibraryItem {
        let mut item = LibraryItem::new(self.reference(), self.kind());
        item.parent_key = self.parent_key.clone();
        item.attachment_keys = self.attachments.clone();
        item
    }

    fn matches(&self, reference: &ExternalReference) -> bool {
        if let (Some(a), Some(b)) = (&self.doi, &reference.doi) {
            if normalize_doi(a) == normalize_doi(b) {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.isbn, &reference.isbn) {
            if normalize_isbn(a) == normalize_isbn(b) {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.title, &reference.title) {
            if a.trim().eq_ignore_ascii_case(b.trim()) {
                return true;
            }
        }
        false
    }
}

#[derive(Debug, Default, Deserialize)]
struct LibraryFile {
    #[serde(default)]
    items: Vec<ItemRecord>,
}

/// Library loaded from a JSON file.
#[derive(Debug, Default)]
pub struct JsonLibrary {
    items: HashMap<ZoteroItemReference, ItemRecord>,
}

impl JsonLibrary {
    /// An empty library: every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| LibraryError::Io(path.to_path_buf(), e))?;
        Self::from_json(&content).map_err(|e| LibraryError::Parse(path.to_path_buf(), e))
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let file: LibraryFile = serde_json::from_str(content)?;
        let items = file
            .items
            .into_iter()
            .map(|record| (record.reference(), record))
            .collect();
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn record(&self, reference: &ZoteroItemReference) -> Result<&ItemRecord, DataError> {
        self.items
            .get(reference)
            .ok_or_else(|| DataError::Load(format!("{} is not in the library", reference)))
    }
}

#[async_trait]
impl DataProvider for JsonLibrary {
    async fn load_item(
        &self,
        reference: &ZoteroItemReference,
    ) -> Result<Option<LibraryItem>, DataError> {
        Ok(self.items.get(reference).map(ItemRecord::to_library_item))
    }

    async fn serialize_item(&self, item: &LibraryItem) -> Result<Value, DataError> {
        let record = self.record(&item.reference)?;
        Ok(json!({
            "library_id": record.library_id,
            "zotero_key": record.key,
            "item_type": record.item_type,
            "title": record.title,
            "doi": record.doi,
            "isbn": record.isbn,
            "attachments": record.attachments,
            "data": record.data,
        }))
    }

    async fn serialize_attachment(&self, attachment: &LibraryItem) -> Result<Option<Value>, DataError> {
        let record = self.record(&attachment.reference)?;
        if !record.file_available {
            return Ok(None);
        }
        Ok(Some(json!({
            "library_id": record.library_id,
            "zotero_key": record.key,
            "parent_key": record.parent_key,
            "title": record.title,
            "page_count": record.pages.as_ref().map(Vec::len),
            "data": record.data,
        })))
    }

    async fn attachment_pages(
        &self,
        attachment: &ZoteroItemReference,
        page_numbers: Option<&[u32]>,
    ) -> Result<Option<AttachmentPages>, DataError> {
        let Some(pages) = self.items.get(attachment).and_then(|r| r.pages.as_ref()) else {
            return Ok(None);
        };
        let total = pages.len() as u32;
        let wanted: Vec<u32> = match page_numbers {
            Some(numbers) => numbers.to_vec(),
            None => (1..=total).collect(),
        };
        let pages = wanted
            .into_iter()
            .filter_map(|number| {
                let index = number.checked_sub(1)? as usize;
                pages.get(index).map(|content| PageContent {
                    page_number: number,
                    content: content.clone(),
                })
            })
            .collect();
        Ok(Some(AttachmentPages {
            pages,
            total_pages: Some(total),
        }))
    }
}

#[async_trait]
impl ReferenceResolver for JsonLibrary {
    async fn resolve(
        &self,
        library_id: Option<i64>,
        reference: &ExternalReference,
    ) -> Result<Option<ZoteroItemReference>, DataError> {
        let mut matches: Vec<&ItemRecord> = self
            .items
            .values()
            .filter(|r| r.kind() != ItemKind::Attachment)
            .filter(|r| library_id.map_or(true, |id| r.library_id == id))
            .filter(|r| r.matches(reference))
            .collect();
        // Deterministic pick when several items match.
        matches.sort_by(|a, b| a.reference().cmp(&b.reference()));
        Ok(matches.first().map(|r| r.reference()))
    }
}

fn normalize_doi(doi: &str) -> String {
    let doi = doi.trim().to_lowercase();
    doi.trim_start_matches("https://doi.org/")
        .trim_start_matches("doi:")
        .to_string()
}

fn normalize_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
