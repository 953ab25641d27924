//! Run supervisor.
//!
//! [`RunClient`] owns at most one connection at a time and drives it through
//! open, auth, ready, run request and streaming. `connect` completes at the
//! ready gate; everything after that reaches the caller through the run
//! handler.

use crate::connection::{open_socket, write_loop, ClientConfig, OutboundSender, Socket};
use crate::dispatch::{Dispatch, Dispatcher};
use crate::error::{ClientError, RunError};
use crate::handler::RunHandler;
use crate::provider::{AuthTokenProvider, DataProvider, ReferenceResolver};
use crate::responder::Responder;
use crate::state::{ConnectionState, RunContext, Session};
use agentrun_protocol::{ClientFrame, Decoder, RunRequest, ServerFrame, CLOSE_NORMAL};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Socket tasks of the current run.
struct RunIo {
    outbound: OutboundSender,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Client for agent runs.
pub struct RunClient {
    config: ClientConfig,
    auth: Arc<dyn AuthTokenProvider>,
    responder: Arc<Responder>,
    limiter: Option<Arc<Semaphore>>,
    session: Mutex<Option<Arc<Session>>>,
    io: Mutex<Option<RunIo>>,
}

impl RunClient {
    /// Creates a client. No connection is made until [`RunClient::connect`].
    pub fn new(
        config: ClientConfig,
        auth: Arc<dyn AuthTokenProvider>,
        data: Arc<dyn DataProvider>,
        resolver: Arc<dyn ReferenceResolver>,
    ) -> Self {
        let limiter = config
            .max_concurrent_requests
            .map(|limit| Arc::new(Semaphore::new(limit)));
        Self {
            config,
            auth,
            responder: Arc::new(Responder::new(data, resolver)),
            limiter,
            session: Mutex::new(None),
            io: Mutex::new(None),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Starts a run.
    ///
    /// Closes any previous run, opens the socket, sends `auth` and waits for
    /// `ready`. The run request is sent right after `ready`, and this returns
    /// once it is queued. Any failure before that is returned here and never
    /// reaches the handler's `on_close`.
    pub async fn connect(
        &self,
        request: RunRequest,
        handler: Arc<dyn RunHandler>,
    ) -> Result<(), ClientError> {
        self.close(CLOSE_NORMAL, "superseded").await;

        let session = Arc::new(Session::new(handler, RunContext::new(&request)));
        *self.session.lock() = Some(session.clone());
        session.transition(ConnectionState::Connecting);
        tracing::info!(run_id = %request.run_id, "starting run");

        let token = match self.auth.token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!("auth token unavailable: {}", e);
                session.transition(ConnectionState::Failed);
                return Err(e.into());
            }
        };

        let socket = match open_socket(&self.config).await {
            Ok(socket) => socket,
            Err(e) => {
                session.transition(ConnectionState::Failed);
                return Err(e);
            }
        };

        session.transition(ConnectionState::AwaitingReady);
        session.with_handler(|h| h.on_open());

        let (sink, stream) = socket.split();
        let (outbound, rx) = OutboundSender::channel();
        // Queued before the writer starts, so it is always the first frame.
        outbound.send(ClientFrame::Auth { token });
        let writer = tokio::spawn(write_loop(sink, rx));

        let (setup_tx, setup_rx) = oneshot::channel();
        let dispatcher = Dispatcher::new(
            session.clone(),
            self.responder.clone(),
            outbound.clone(),
            self.limiter.clone(),
            self.config.respond_on_servicing_failure,
        );
        let reader = tokio::spawn(read_loop(
            stream,
            session.clone(),
            dispatcher,
            outbound.clone(),
            request,
            setup_tx,
        ));

        *self.io.lock() = Some(RunIo {
            outbound,
            reader,
            writer,
        });

        let setup = match self.config.ready_timeout {
            Some(limit) => match tokio::time::timeout(limit, setup_rx).await {
                Ok(setup) => setup,
                Err(_) => {
                    tracing::warn!("no ready within {:?}", limit);
                    self.shutdown(CLOSE_NORMAL, "ready timeout", ConnectionState::Failed)
                        .await;
                    return Err(ClientError::ReadyTimeout);
                }
            },
            None => setup_rx.await,
        };

        let err = match setup {
            Ok(Ok(())) => {
                tracing::debug!("run request sent");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => ClientError::ConnectionSetup("connection task stopped".to_string()),
        };
        tracing::debug!("connection setup failed: {}", err);
        self.shutdown(CLOSE_NORMAL, "setup failed", ConnectionState::Failed)
            .await;
        Err(err)
    }

    /// Closes the current run. The handler receives nothing after this
    /// starts. Does nothing if no run is open.
    pub async fn close(&self, code: u16, reason: &str) {
        self.shutdown(code, reason, ConnectionState::Closed).await;
    }

    /// Asks the server to stop the run, waits up to `grace` (or the configured
    /// default) for it to close, then closes with a normal code.
    pub async fn cancel(&self, grace: Option<Duration>) {
        let grace = grace.unwrap_or(self.config.cancel_grace);
        let session = self.session.lock().clone();
        let outbound = self.io.lock().as_ref().map(|io| io.outbound.clone());

        if let (Some(session), Some(outbound)) = (session, outbound) {
            if session.state().accepts_dispatch() && outbound.send(ClientFrame::Cancel) {
                tracing::debug!("cancel sent, waiting up to {:?}", grace);
                if tokio::time::timeout(grace, session.wait_finished())
                    .await
                    .is_ok()
                {
                    tracing::debug!("server closed within grace window");
                }
            }
        }

        self.close(CLOSE_NORMAL, "cancelled").await;
    }

    /// Current connection state. `Idle` before the first run.
    pub fn state(&self) -> ConnectionState {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(ConnectionState::Idle)
    }

    /// Identity of the current or last run.
    pub fn run_context(&self) -> Option<RunContext> {
        self.session.lock().as_ref().map(|s| s.context())
    }

    /// Waits until the current connection has stopped reading. Returns at
    /// once if the run already ended, including a connect that failed before
    /// the socket opened.
    pub async fn wait_closed(&self) {
        let session = self.session.lock().clone();
        if let Some(session) = session {
            if session.state().is_terminal() {
                return;
            }
            session.wait_finished().await;
        }
    }

    async fn shutdown(&self, code: u16, reason: &str, final_state: ConnectionState) {
        let Some(io) = self.io.lock().take() else {
            return;
        };
        let session = self.session.lock().clone();
        let RunIo {
            outbound,
            mut reader,
            writer,
        } = io;

        if let Some(ref session) = session {
            session.seal(ConnectionState::Closing);
        }
        tracing::debug!("closing connection: {} ({})", code, reason);
        outbound.close(code, reason);

        if tokio::time::timeout(self.config.close_timeout, &mut reader)
            .await
            .is_err()
        {
            tracing::debug!("close handshake timed out, dropping socket");
        }
        reader.abort();
        writer.abort();

        if let Some(session) = session {
            session.transition(final_state);
            session.mark_finished();
        }
    }
}

impl Drop for RunClient {
    fn drop(&mut self) {
        if let Some(io) = self.io.get_mut().take() {
            io.reader.abort();
            io.writer.abort();
        }
    }
}

/// Reads frames until the socket ends.
///
/// Handles the ready gate itself and hands every other frame to the
/// dispatcher. `setup` is completed at the ready gate or when the socket ends
/// first.
async fn read_loop(
    mut stream: SplitStream<Socket>,
    session: Arc<Session>,
    mut dispatcher: Dispatcher,
    outbound: OutboundSender,
    request: RunRequest,
    setup: oneshot::Sender<Result<(), ClientError>>,
) {
    tracing::debug!("read_loop started");
    let mut setup = Some(setup);
    let mut request = Some(request);
    let mut close_code = None;
    let mut close_reason = String::new();
    let mut transport_error = None;

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame {
                    close_code = Some(u16::from(frame.code));
                    close_reason = frame.reason.as_str().to_string();
                }
                tracing::debug!("read_loop: close received ({:?})", close_code);
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("read_loop: socket error: {}", e);
                transport_error = Some(e.to_string());
                break;
            }
        };

        let frame = match Decoder::decode_server(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                dispatcher.on_decode_error(&e);
                continue;
            }
        };

        if let ServerFrame::Ready(ref ready) = frame {
            if let Some(run_request) = request.take() {
                let passed = session.with_handler(|h| {
                    session.transition(ConnectionState::Streaming);
                    h.on_ready(ready);
                    outbound.send(ClientFrame::Chat(run_request))
                });
                if let Some(tx) = setup.take() {
                    let result = match passed {
                        Some(true) => Ok(()),
                        _ => Err(ClientError::ConnectionSetup(
                            "run closed before ready".to_string(),
                        )),
                    };
                    let _ = tx.send(result);
                }
                continue;
            }
        }

        if let Dispatch::Fatal { code, reason } = dispatcher.on_frame(frame) {
            if let Some(tx) = setup.take() {
                let _ = tx.send(Err(ClientError::ConnectionSetup(format!(
                    "server error before ready: {}",
                    reason
                ))));
            }
            outbound.close(code, reason);
        }
    }

    if let Some(tx) = setup.take() {
        session.seal(ConnectionState::Failed);
        let reason = transport_error.unwrap_or_else(|| "connection closed before ready".to_string());
        let _ = tx.send(Err(ClientError::ConnectionSetup(reason)));
    } else {
        session.with_handler(|h| {
            if let Some(ref e) = transport_error {
                h.on_error(&RunError::Transport(e.clone()));
            }
            h.on_close(close_code, &close_reason);
        });
        session.seal(ConnectionState::Closed);
    }

    session.mark_finished();
    tracing::debug!("read_loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticToken;
    use crate::testing::{
        wait_until, GatedLibrary, MemoryLibrary, MockServer, Received, RecordingHandler,
    };
    use agentrun_protocol::client::DataErrorCode;
    use agentrun_protocol::server::{
        AttachmentContentRequest, ErrorEvent, PartEvent, RequestAckEvent, ThreadEvent,
        ZoteroDataRequest,
    };
    use agentrun_protocol::{MessagePart, ModelSelection, UserPrompt, ZoteroItemReference};

    fn run_request() -> RunRequest {
        RunRequest::new(
            "r1",
            UserPrompt::new("Summarize my reading list"),
            ModelSelection::Platform {
                access_id: "acc".to_string(),
                api_key: "key".to_string(),
            },
        )
    }

    fn client_for(config: ClientConfig, library: MemoryLibrary) -> Arc<RunClient> {
        let library = Arc::new(library);
        Arc::new(RunClient::new(
            config,
            Arc::new(StaticToken::new("jwt")),
            library.clone(),
            library,
        ))
    }

    fn part(part_index: u32, text: &str) -> ServerFrame {
        ServerFrame::Part(PartEvent {
            run_id: "r1".to_string(),
            message_index: 0,
            part_index,
            part: MessagePart::Text {
                content: text.to_string(),
            },
        })
    }

    /// Runs the handshake against `server` and returns the streaming client.
    async fn connected(
        server: &mut MockServer,
        client: Arc<RunClient>,
        handler: Arc<RecordingHandler>,
    ) -> Arc<RunClient> {
        let connect = {
            let client = client.clone();
            tokio::spawn(async move { client.connect(run_request(), handler).await })
        };

        assert_eq!(
            server.recv_frame().await,
            ClientFrame::Auth {
                token: "jwt".to_string()
            }
        );
        server.ready();
        assert!(matches!(server.recv_frame().await, ClientFrame::Chat(_)));
        connect.await.unwrap().unwrap();
        client
    }

    #[tokio::test]
    async fn test_handshake_order() {
        let mut server = MockServer::start().await;
        let handler = Arc::new(RecordingHandler::default());
        let client = client_for(ClientConfig::new(server.url()), MemoryLibrary::new());

        let connect = {
            let client = client.clone();
            let handler = handler.clone();
            tokio::spawn(async move { client.connect(run_request(), handler).await })
        };

        assert!(matches!(server.recv_frame().await, ClientFrame::Auth { .. }));
        // Nothing else before ready.
        assert_eq!(server.try_recv(Duration::from_millis(100)).await, None);
        assert_eq!(client.state(), ConnectionState::AwaitingReady);

        server.ready();
        match server.recv_frame().await {
            ClientFrame::Chat(request) => {
                assert_eq!(request.run_id, "r1");
                assert_eq!(request.thread_id, None);
            }
            other => panic!("expected chat, got {:?}", other),
        }
        connect.await.unwrap().unwrap();
        assert_eq!(client.state(), ConnectionState::Streaming);
        assert_eq!(handler.events(), vec!["open", "ready"]);

        client.close(CLOSE_NORMAL, "done").await;
    }

    #[tokio::test]
    async fn test_request_ack_and_thread_update_context() {
        let mut server = MockServer::start().await;
        let handler = Arc::new(RecordingHandler::default());
        let url = server.url();
        let client = connected(
            &mut server,
            client_for(ClientConfig::new(url), MemoryLibrary::new()),
            handler.clone(),
        )
        .await;

        server.send(ServerFrame::RequestAck(RequestAckEvent {
            run_id: "r1".to_string(),
            model_id: Some("gpt".to_string()),
            model_name: Some("GPT".to_string()),
            charge_type: Some("credits".to_string()),
        }));
        server.send(ServerFrame::Thread(ThreadEvent {
            thread_id: "t1".to_string(),
        }));
        wait_until(|| handler.count("thread:") == 1).await;

        assert_eq!(handler.events(), vec!["open", "ready", "ack:r1", "thread:t1"]);
        let ctx = client.run_context().unwrap();
        assert_eq!(ctx.run_id, "r1");
        assert_eq!(ctx.thread_id.as_deref(), Some("t1"));
        assert_eq!(ctx.model.unwrap().model_name.as_deref(), Some("GPT"));
    }

    #[tokio::test]
    async fn test_close_before_ready_rejects_connect() {
        let mut server = MockServer::start().await;
        let handler = Arc::new(RecordingHandler::default());
        let client = client_for(ClientConfig::new(server.url()), MemoryLibrary::new());

        let connect = {
            let client = client.clone();
            let handler = handler.clone();
            tokio::spawn(async move { client.connect(run_request(), handler).await })
        };

        assert!(matches!(server.recv_frame().await, ClientFrame::Auth { .. }));
        server.drop_connection();
        assert_eq!(server.recv().await, Received::Disconnected);

        let result = connect.await.unwrap();
        assert!(matches!(result, Err(ClientError::ConnectionSetup(_))));
        assert_eq!(client.state(), ConnectionState::Failed);
        // No close callback for setup failures.
        assert_eq!(handler.events(), vec!["open"]);
    }

    #[tokio::test]
    async fn test_ready_timeout() {
        let mut server = MockServer::start().await;
        let client = client_for(
            ClientConfig::new(server.url()).with_ready_timeout(Duration::from_millis(100)),
            MemoryLibrary::new(),
        );

        let result = client
            .connect(run_request(), Arc::new(RecordingHandler::default()))
            .await;
        assert!(matches!(result, Err(ClientError::ReadyTimeout)));
        assert_eq!(client.state(), ConnectionState::Failed);

        assert!(matches!(server.recv_frame().await, ClientFrame::Auth { .. }));
        assert_eq!(server.recv().await, Received::Close(Some(CLOSE_NORMAL)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(
            ClientConfig::new(format!("http://{}", addr)),
            MemoryLibrary::new(),
        );
        let result = client
            .connect(run_request(), Arc::new(RecordingHandler::default()))
            .await;
        assert!(matches!(result, Err(ClientError::ConnectionSetup(_))));
        assert_eq!(client.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let client = RunClient::new(
            ClientConfig::new("http://127.0.0.1:9"),
            Arc::new(StaticToken::new("")),
            Arc::new(MemoryLibrary::new()),
            Arc::new(MemoryLibrary::new()),
        );
        let result = client
            .connect(run_request(), Arc::new(RecordingHandler::default()))
            .await;
        assert!(matches!(result, Err(ClientError::Auth(_))));
        assert_eq!(client.state(), ConnectionState::Failed);

        // No socket was opened, so there is nothing to wait for.
        tokio::time::timeout(Duration::from_secs(1), client.wait_closed())
            .await
            .expect("wait_closed hung after a failed connect");
    }

    #[tokio::test]
    async fn test_response_echoes_request_id() {
        let mut server = MockServer::start().await;
        let library = MemoryLibrary::new().with_regular(1, "AAA", &[]);
        let handler = Arc::new(RecordingHandler::default());
        let url = server.url();
        let _client = connected(
            &mut server,
            client_for(ClientConfig::new(url), library),
            handler,
        )
        .await;

        server.send(ServerFrame::ZoteroDataRequest(ZoteroDataRequest {
            request_id: "q1".to_string(),
            items: vec![
                ZoteroItemReference::new(1, "AAA"),
                ZoteroItemReference::new(1, "BBB"),
            ],
            include_attachments: false,
            include_parents: false,
        }));

        match server.recv_frame().await {
            ClientFrame::ZoteroData(response) => {
                assert_eq!(response.request_id, "q1");
                assert_eq!(response.items.len(), 1);
                assert_eq!(response.errors.len(), 1);
                assert_eq!(response.errors[0].error_code, DataErrorCode::NotFound);
            }
            other => panic!("expected zotero_data, got {:?}", other),
        }
        // Exactly one response.
        assert_eq!(server.try_recv(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn test_requests_do_not_block_output_frames() {
        let mut server = MockServer::start().await;
        let (library, gate) = GatedLibrary::new(MemoryLibrary::new().with_regular(1, "AAA", &[]));
        let library = Arc::new(library);
        let client = Arc::new(RunClient::new(
            ClientConfig::new(server.url()),
            Arc::new(StaticToken::new("jwt")),
            library.clone(),
            library,
        ));
        let handler = Arc::new(RecordingHandler::default());
        let _client = connected(&mut server, client, handler.clone()).await;

        server.send(ServerFrame::ZoteroDataRequest(ZoteroDataRequest {
            request_id: "slow".to_string(),
            items: vec![ZoteroItemReference::new(1, "AAA")],
            include_attachments: false,
            include_parents: false,
        }));
        server.send(part(0, "first"));
        server.send(part(1, "second"));

        wait_until(|| handler.count("part:") == 2).await;
        assert_eq!(server.try_recv(Duration::from_millis(50)).await, None);

        gate.notify_one();
        match server.recv_frame().await {
            ClientFrame::ZoteroData(response) => assert_eq!(response.request_id, "slow"),
            other => panic!("expected zotero_data, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_servicing_failure_keeps_run_open() {
        let mut server = MockServer::start().await;
        let library = MemoryLibrary::new().failing_pages(1, "PDF1");
        let handler = Arc::new(RecordingHandler::default());
        let url = server.url();
        let client = connected(
            &mut server,
            client_for(ClientConfig::new(url), library),
            handler.clone(),
        )
        .await;

        server.send(ServerFrame::AttachmentContentRequest(AttachmentContentRequest {
            request_id: "a1".to_string(),
            attachment: ZoteroItemReference::new(1, "PDF1"),
            page_numbers: None,
        }));
        wait_until(|| handler.count("error:") == 1).await;
        assert!(handler
            .events()
            .contains(&"error:attachment_content_failed".to_string()));

        server.send(part(0, "still streaming"));
        wait_until(|| handler.count("part:") == 1).await;
        assert_eq!(client.state(), ConnectionState::Streaming);
        // No response by default.
        assert_eq!(server.try_recv(Duration::from_millis(50)).await, None);
    }

    #[tokio::test]
    async fn test_servicing_failure_degraded_response() {
        let mut server = MockServer::start().await;
        let library = MemoryLibrary::new().failing_pages(1, "PDF1");
        let config = ClientConfig::new(server.url()).with_respond_on_servicing_failure(true);
        let _client = connected(
            &mut server,
            client_for(config, library),
            Arc::new(RecordingHandler::default()),
        )
        .await;

        server.send(ServerFrame::AttachmentContentRequest(AttachmentContentRequest {
            request_id: "a1".to_string(),
            attachment: ZoteroItemReference::new(1, "PDF1"),
            page_numbers: None,
        }));
        match server.recv_frame().await {
            ClientFrame::AttachmentContent(response) => {
                assert_eq!(response.request_id, "a1");
                assert!(response.pages.is_empty());
                assert!(response.error.is_some());
            }
            other => panic!("expected attachment_content, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_frame_is_fatal() {
        let mut server = MockServer::start().await;
        let handler = Arc::new(RecordingHandler::default());
        let url = server.url();
        let client = connected(
            &mut server,
            client_for(ClientConfig::new(url), MemoryLibrary::new()),
            handler.clone(),
        )
        .await;

        server.send(ServerFrame::Error(ErrorEvent {
            error_type: "llm_rate_limit".to_string(),
            message: "Rate limit exceeded".to_string(),
            run_id: Some("r1".to_string()),
            details: None,
        }));
        server.send(part(0, "straggler"));

        assert_eq!(server.recv().await, Received::Close(Some(1011)));
        wait_until(|| client.state() == ConnectionState::Closed).await;

        assert_eq!(handler.count("error:llm_rate_limit"), 1);
        assert_eq!(handler.count("part:"), 0);
        assert_eq!(handler.count("close"), 0);

        // Idempotent.
        client.close(CLOSE_NORMAL, "done").await;
        client.close(CLOSE_NORMAL, "done").await;
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_cancel_closes_after_grace() {
        let mut server = MockServer::start().await;
        let handler = Arc::new(RecordingHandler::default());
        let url = server.url();
        let client = connected(
            &mut server,
            client_for(ClientConfig::new(url), MemoryLibrary::new()),
            handler.clone(),
        )
        .await;

        client.cancel(Some(Duration::from_millis(100))).await;

        assert_eq!(server.recv_frame().await, ClientFrame::Cancel);
        assert_eq!(server.recv().await, Received::Close(Some(CLOSE_NORMAL)));
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(handler.count("close"), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_connection_is_a_close() {
        let client = client_for(ClientConfig::new("http://127.0.0.1:9"), MemoryLibrary::new());
        client.cancel(None).await;
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_server_close_reaches_handler() {
        let mut server = MockServer::start().await;
        let handler = Arc::new(RecordingHandler::default());
        let url = server.url();
        let client = connected(
            &mut server,
            client_for(ClientConfig::new(url), MemoryLibrary::new()),
            handler.clone(),
        )
        .await;

        server.send(part(0, "all done"));
        server.close(CLOSE_NORMAL);
        client.wait_closed().await;

        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(
            handler.events(),
            vec!["open", "ready", "part:all done", "close:1000"]
        );
    }

    #[tokio::test]
    async fn test_malformed_frames_are_reported_and_skipped() {
        let mut server = MockServer::start().await;
        let handler = Arc::new(RecordingHandler::default());
        let url = server.url();
        let client = connected(
            &mut server,
            client_for(ClientConfig::new(url), MemoryLibrary::new()),
            handler.clone(),
        )
        .await;

        server.send_raw("{not json");
        server.send_raw(r#"{"event":"telemetry","x":1}"#);
        server.send_raw(r#"{"event":"part","run_id":"r1"}"#);
        server.send(part(0, "ok"));
        wait_until(|| handler.count("part:") == 1).await;

        assert_eq!(
            handler.events(),
            vec![
                "open",
                "ready",
                "error:parse_error",
                "error:parse_error",
                "error:event_handling_error",
                "part:ok"
            ]
        );
        assert_eq!(client.state(), ConnectionState::Streaming);
    }
}
