//! Frame dispatch.
//!
//! Output frames go to the run handler synchronously and in wire order.
//! Bidirectional requests are handed to the responder on their own tasks so a
//! slow lookup never holds up later frames. An `error` frame seals the run.

use crate::connection::OutboundSender;
use crate::error::RunError;
use crate::responder::{BidirectionalRequest, Responder};
use crate::state::{ConnectionState, Session};
use agentrun_protocol::{ProtocolError, ServerFrame, StreamPosition, CLOSE_SERVER_ERROR};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// What the reader task should do after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Continue,
    /// The run ended with a server error. Close with this code.
    Fatal { code: u16, reason: String },
}

pub(crate) struct Dispatcher {
    session: Arc<Session>,
    responder: Arc<Responder>,
    outbound: OutboundSender,
    limiter: Option<Arc<Semaphore>>,
    respond_on_failure: bool,
    last_position: Option<StreamPosition>,
}

impl Dispatcher {
    pub(crate) fn new(
        session: Arc<Session>,
        responder: Arc<Responder>,
        outbound: OutboundSender,
        limiter: Option<Arc<Semaphore>>,
        respond_on_failure: bool,
    ) -> Self {
        Self {
            session,
            responder,
            outbound,
            limiter,
            respond_on_failure,
            last_position: None,
        }
    }

    /// Routes one decoded frame.
    pub(crate) fn on_frame(&mut self, frame: ServerFrame) -> Dispatch {
        let frame = match BidirectionalRequest::from_frame(frame) {
            Ok(request) => {
                self.spawn_request(request);
                return Dispatch::Continue;
            }
            Err(frame) => frame,
        };

        match frame {
            ServerFrame::Ready(_) => {
                tracing::debug!("ignoring repeated ready");
            }
            ServerFrame::RequestAck(ack) => {
                self.session.update_context(|ctx| ctx.record_ack(&ack));
                self.session.with_handler(|h| h.on_request_ack(&ack));
            }
            ServerFrame::Part(part) => {
                let position = part.position();
                if let Some(previous) = self.last_position {
                    if !position.follows(&previous) {
                        tracing::warn!(
                            "part at {}/{} does not follow {}/{}",
                            position.message_index,
                            position.part_index,
                            previous.message_index,
                            previous.part_index
                        );
                    }
                }
                self.last_position = Some(position);
                self.session.with_handler(|h| h.on_part(&part));
            }
            ServerFrame::ToolReturn(tool_return) => {
                self.session.with_handler(|h| h.on_tool_return(&tool_return));
            }
            ServerFrame::ToolCallProgress(progress) => {
                self.session
                    .with_handler(|h| h.on_tool_call_progress(&progress));
            }
            ServerFrame::RunComplete(complete) => {
                self.session.with_handler(|h| h.on_run_complete(&complete));
            }
            ServerFrame::Done(done) => {
                self.session.with_handler(|h| h.on_done(&done));
            }
            ServerFrame::Thread(thread) => {
                self.session
                    .update_context(|ctx| ctx.record_thread(&thread.thread_id));
                self.session.with_handler(|h| h.on_thread(&thread));
            }
            ServerFrame::Warning(warning) => {
                self.session.with_handler(|h| h.on_warning(&warning));
            }
            ServerFrame::Retry(retry) => {
                self.session.with_handler(|h| h.on_retry(&retry));
            }
            ServerFrame::AgentActions(actions) => {
                self.session.with_handler(|h| h.on_agent_actions(&actions));
            }
            ServerFrame::Error(event) => {
                tracing::warn!("server error ({}): {}", event.error_type, event.message);
                let error = RunError::Server {
                    error_type: event.error_type.clone(),
                    message: event.message.clone(),
                    details: event.details.clone(),
                };
                self.session
                    .with_handler_then_seal(ConnectionState::Closing, |h| h.on_error(&error));
                return Dispatch::Fatal {
                    code: CLOSE_SERVER_ERROR,
                    reason: event.error_type,
                };
            }
            ServerFrame::AttachmentContentRequest(_)
            | ServerFrame::ExternalReferenceCheckRequest(_)
            | ServerFrame::ZoteroDataRequest(_) => {
                // Split off above.
            }
        }

        Dispatch::Continue
    }

    /// Reports a frame that failed to decode. The stream continues.
    pub(crate) fn on_decode_error(&self, err: &ProtocolError) {
        tracing::warn!("dropping frame: {}", err);
        let error = RunError::from_protocol(err);
        self.session.with_handler(|h| h.on_error(&error));
    }

    fn spawn_request(&self, request: BidirectionalRequest) {
        let session = self.session.clone();
        let responder = self.responder.clone();
        let outbound = self.outbound.clone();
        let limiter = self.limiter.clone();
        let respond_on_failure = self.respond_on_failure;

        tracing::debug!(
            request_id = request.request_id(),
            "received {}",
            request.kind()
        );

        tokio::spawn(async move {
            let _permit = match limiter {
                Some(limiter) => match limiter.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            let request = Arc::new(request);
            // Run the responder on its own task so a panic is contained.
            let result = {
                let request = request.clone();
                tokio::spawn(async move { responder.respond(&request).await }).await
            };

            let message = match result {
                Ok(Ok(frame)) => {
                    if !session.state().accepts_dispatch() {
                        tracing::debug!(
                            request_id = request.request_id(),
                            "run ended, dropping response"
                        );
                    } else {
                        outbound.send(frame);
                    }
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("responder task failed: {}", e),
            };

            tracing::warn!(
                request_id = request.request_id(),
                "failed to service {}: {}",
                request.kind(),
                message
            );
            let error = RunError::request_failed(request.kind(), request.request_id(), &message);
            session.with_handler(|h| h.on_error(&error));

            if respond_on_failure && session.state().accepts_dispatch() {
                outbound.send(Responder::degraded(&request, &message));
            }
        });
    }
}
