//! Test fixtures: an in-process agent server, an in-memory library and a
//! recording run handler.

use crate::error::{DataError, RunError};
use crate::handler::RunHandler;
use crate::provider::{
    AttachmentPages, DataProvider, ItemKind, LibraryItem, ReferenceResolver,
};
use agentrun_protocol::client::PageContent;
use agentrun_protocol::server::{
    AgentActionsEvent, DoneEvent, ExternalReference, PartEvent, ReadyEvent, RequestAckEvent,
    RetryEvent, RunCompleteEvent, ThreadEvent, ToolCallProgressEvent, ToolReturnEvent,
    WarningEvent,
};
use agentrun_protocol::{ClientFrame, Decoder, Encoder, ServerFrame, ZoteroItemReference};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Mock server
// ============================================================================

/// What the server saw from the client.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Received {
    Frame(ClientFrame),
    Close(Option<u16>),
    Disconnected,
}

enum ServerAction {
    Send(ServerFrame),
    SendRaw(String),
    Close(u16),
    Drop,
}

/// Agent server accepting a single WebSocket connection on localhost.
pub(crate) struct MockServer {
    addr: SocketAddr,
    actions: mpsc::UnboundedSender<ServerAction>,
    received: mpsc::UnboundedReceiver<Received>,
}

impl MockServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (actions, mut action_rx) = mpsc::unbounded_channel();
        let (received_tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let Ok(socket) = tokio_tungstenite::accept_async(tcp).await else {
                return;
            };
            let (mut sink, mut stream) = socket.split();

            loop {
                tokio::select! {
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let frame = Decoder::decode_client(text.as_str())
                                .expect("client sent an undecodable frame");
                            let _ = received_tx.send(Received::Frame(frame));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code));
                            let _ = received_tx.send(Received::Close(code));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => {
                            let _ = received_tx.send(Received::Disconnected);
                            break;
                        }
                    },
                    action = action_rx.recv() => match action {
                        Some(ServerAction::Send(frame)) => {
                            let text = Encoder::encode_server(&frame).unwrap();
                            let _ = sink.send(Message::Text(text.into())).await;
                        }
                        Some(ServerAction::SendRaw(text)) => {
                            let _ = sink.send(Message::Text(text.into())).await;
                        }
                        Some(ServerAction::Close(code)) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "".into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                        }
                        Some(ServerAction::Drop) | None => {
                            let _ = received_tx.send(Received::Disconnected);
                            break;
                        }
                    },
                }
            }
        });

        Self {
            addr,
            actions,
            received,
        }
    }

    /// Base URL clients should connect to.
    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn send(&self, frame: ServerFrame) {
        let _ = self.actions.send(ServerAction::Send(frame));
    }

    pub(crate) fn send_raw(&self, text: impl Into<String>) {
        let _ = self.actions.send(ServerAction::SendRaw(text.into()));
    }

    pub(crate) fn close(&self, code: u16) {
        let _ = self.actions.send(ServerAction::Close(code));
    }

    /// Drops the TCP connection without a close handshake.
    pub(crate) fn drop_connection(&self) {
        let _ = self.actions.send(ServerAction::Drop);
    }

    pub(crate) fn ready(&self) {
        self.send(ServerFrame::Ready(ReadyEvent {
            subscription_status: Some("active".to_string()),
            processing_mode: Some("FRONTEND".to_string()),
            indexing_complete: Some(true),
        }));
    }

    pub(crate) async fn recv(&mut self) -> Received {
        tokio::time::timeout(RECV_TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for the client")
            .unwrap_or(Received::Disconnected)
    }

    pub(crate) async fn recv_frame(&mut self) -> ClientFrame {
        match self.recv().await {
            Received::Frame(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    /// Returns the next event if one arrives within `wait`.
    pub(crate) async fn try_recv(&mut self, wait: Duration) -> Option<Received> {
        tokio::time::timeout(wait, self.received.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// ============================================================================
// Recording handler
// ============================================================================

/// Run handler that records a short line per callback.
#[derive(Debug, Default)]
pub(crate) struct RecordingHandler {
    events: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

impl RunHandler for RecordingHandler {
    fn on_open(&self) {
        self.push("open");
    }

    fn on_ready(&self, _ready: &ReadyEvent) {
        self.push("ready");
    }

    fn on_request_ack(&self, ack: &RequestAckEvent) {
        self.push(format!("ack:{}", ack.run_id));
    }

    fn on_part(&self, part: &PartEvent) {
        self.push(format!("part:{}", part.part.content().unwrap_or_default()));
    }

    fn on_tool_return(&self, tool_return: &ToolReturnEvent) {
        self.push(format!("tool_return:{}", tool_return.tool_call_id));
    }

    fn on_tool_call_progress(&self, progress: &ToolCallProgressEvent) {
        self.push(format!("tool_call_progress:{}", progress.tool_call_id));
    }

    fn on_run_complete(&self, _complete: &RunCompleteEvent) {
        self.push("run_complete");
    }

    fn on_done(&self, _done: &DoneEvent) {
        self.push("done");
    }

    fn on_thread(&self, thread: &ThreadEvent) {
        self.push(format!("thread:{}", thread.thread_id));
    }

    fn on_warning(&self, warning: &WarningEvent) {
        self.push(format!("warning:{}", warning.warning_type));
    }

    fn on_retry(&self, retry: &RetryEvent) {
        self.push(format!("retry:{}", retry.attempt));
    }

    fn on_agent_actions(&self, actions: &AgentActionsEvent) {
        self.push(format!("agent_actions:{}", actions.actions.len()));
    }

    fn on_error(&self, error: &RunError) {
        self.push(format!("error:{}", error.kind()));
    }

    fn on_close(&self, code: Option<u16>, _reason: &str) {
        match code {
            Some(code) => self.push(format!("close:{}", code)),
            None => self.push("close"),
        }
    }
}

// ============================================================================
// In-memory library
// ============================================================================

#[derive(Debug, Clone)]
struct StoredItem {
    item: LibraryItem,
    file_available: bool,
}

/// Data provider and reference resolver over a fixed set of items.
#[derive(Debug, Default)]
pub(crate) struct MemoryLibrary {
    items: HashMap<ZoteroItemReference, StoredItem>,
    failing: HashSet<ZoteroItemReference>,
    pages: HashMap<ZoteroItemReference, Vec<String>>,
    failing_pages: HashSet<ZoteroItemReference>,
    dois: HashMap<String, ZoteroItemReference>,
    failing_dois: HashSet<String>,
}

impl MemoryLibrary {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_regular(mut self, library_id: i64, key: &str, attachments: &[&str]) -> Self {
        let mut item = LibraryItem::new(ZoteroItemReference::new(library_id, key), ItemKind::Regular);
        for attachment in attachments {
            item = item.with_attachment(*attachment);
        }
        self.insert(item, true);
        self
    }

    pub(crate) fn with_attachment(
        mut self,
        library_id: i64,
        key: &str,
        parent: &str,
        file_available: bool,
    ) -> Self {
        let item = LibraryItem::new(ZoteroItemReference::new(library_id, key), ItemKind::Attachment)
            .with_parent(parent);
        self.insert(item, file_available);
        self
    }

    pub(crate) fn with_pages(mut self, library_id: i64, key: &str, pages: &[&str]) -> Self {
        self.pages.insert(
            ZoteroItemReference::new(library_id, key),
            pages.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub(crate) fn with_doi(mut self, doi: &str, library_id: i64, key: &str) -> Self {
        self.dois
            .insert(doi.to_string(), ZoteroItemReference::new(library_id, key));
        self
    }

    pub(crate) fn failing_load(mut self, library_id: i64, key: &str) -> Self {
        self.failing.insert(ZoteroItemReference::new(library_id, key));
        self
    }

    pub(crate) fn failing_pages(mut self, library_id: i64, key: &str) -> Self {
        self.failing_pages
            .insert(ZoteroItemReference::new(library_id, key));
        self
    }

    pub(crate) fn failing_resolve(mut self, doi: &str) -> Self {
        self.failing_dois.insert(doi.to_string());
        self
    }

    fn insert(&mut self, item: LibraryItem, file_available: bool) {
        self.items.insert(
            item.reference.clone(),
            StoredItem {
                item,
                file_available,
            },
        );
    }
}

#[async_trait]
impl DataProvider for MemoryLibrary {
    async fn load_item(
        &self,
        reference: &ZoteroItemReference,
    ) -> Result<Option<LibraryItem>, DataError> {
        if self.failing.contains(reference) {
            return Err(DataError::Load(format!("database locked reading {}", reference)));
        }
        Ok(self.items.get(reference).map(|stored| stored.item.clone()))
    }

    async fn serialize_item(&self, item: &LibraryItem) -> Result<Value, DataError> {
        Ok(json!({
            "library_id": item.reference.library_id,
            "key": item.reference.zotero_key,
            "item_type": "journalArticle",
        }))
    }

    async fn serialize_attachment(&self, attachment: &LibraryItem) -> Result<Option<Value>, DataError> {
        let available = self
            .items
            .get(&attachment.reference)
            .map(|stored| stored.file_available)
            .unwrap_or(false);
        if !available {
            return Ok(None);
        }
        Ok(Some(json!({
            "library_id": attachment.reference.library_id,
            "key": attachment.reference.zotero_key,
            "parent_key": attachment.parent_key,
            "content_type": "application/pdf",
        })))
    }

    async fn attachment_pages(
        &self,
        attachment: &ZoteroItemReference,
        page_numbers: Option<&[u32]>,
    ) -> Result<Option<AttachmentPages>, DataError> {
        if self.failing_pages.contains(attachment) {
            return Err(DataError::Load(format!("cannot read {}", attachment)));
        }
        let Some(pages) = self.pages.get(attachment) else {
            return Ok(None);
        };
        let total = pages.len() as u32;
        let wanted: Vec<u32> = match page_numbers {
            Some(numbers) => numbers.to_vec(),
            None => (1..=total).collect(),
        };
        Ok(Some(AttachmentPages {
            pages: wanted
                .into_iter()
                .filter_map(|n| {
                    pages.get(n.checked_sub(1)? as usize).map(|content| PageContent {
                        page_number: n,
                        content: content.clone(),
                    })
                })
                .collect(),
            total_pages: Some(total),
        }))
    }
}

#[async_trait]
impl ReferenceResolver for MemoryLibrary {
    async fn resolve(
        &self,
        _library_id: Option<i64>,
        reference: &ExternalReference,
    ) -> Result<Option<ZoteroItemReference>, DataError> {
        let Some(doi) = reference.doi.as_deref() else {
            return Ok(None);
        };
        if self.failing_dois.contains(doi) {
            return Err(DataError::Resolve(format!("index unavailable for {}", doi)));
        }
        Ok(self.dois.get(doi).cloned())
    }
}

/// Library whose item loads wait until the gate is opened.
pub(crate) struct GatedLibrary {
    inner: MemoryLibrary,
    gate: Arc<Notify>,
}

impl GatedLibrary {
    pub(crate) fn new(inner: MemoryLibrary) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                inner,
                gate: gate.clone(),
            },
            gate,
        )
    }
}

#[async_trait]
impl DataProvider for GatedLibrary {
    async fn load_item(
        &self,
        reference: &ZoteroItemReference,
    ) -> Result<Option<LibraryItem>, DataError> {
        self.gate.notified().await;
        self.gate.notify_one();
        self.inner.load_item(reference).await
    }

    async fn serialize_item(&self, item: &LibraryItem) -> Result<Value, DataError> {
        self.inner.serialize_item(item).await
    }

    async fn serialize_attachment(&self, attachment: &LibraryItem) -> Result<Option<Value>, DataError> {
        self.inner.serialize_attachment(attachment).await
    }
}

#[async_trait]
impl ReferenceResolver for GatedLibrary {
    async fn resolve(
        &self,
        library_id: Option<i64>,
        reference: &ExternalReference,
    ) -> Result<Option<ZoteroItemReference>, DataError> {
        self.inner.resolve(library_id, reference).await
    }
}
