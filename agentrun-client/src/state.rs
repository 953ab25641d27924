//! Connection state machine and per-run context.

use crate::handler::RunHandler;
use agentrun_protocol::server::RequestAckEvent;
use agentrun_protocol::RunRequest;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of one run connection.
///
/// Transitions only move forward, except that `Streaming` may repeat while
/// frames arrive. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingReady,
    Streaming,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    fn rank(&self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::AwaitingReady => 2,
            ConnectionState::Streaming => 3,
            ConnectionState::Closing => 4,
            ConnectionState::Closed | ConnectionState::Failed => 5,
        }
    }

    /// Returns whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        if *self == ConnectionState::Streaming && next == ConnectionState::Streaming {
            return true;
        }
        next.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Returns whether frames may still reach the run handler.
    pub fn accepts_dispatch(&self) -> bool {
        matches!(
            self,
            ConnectionState::AwaitingReady | ConnectionState::Streaming
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingReady => "awaiting_ready",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Model negotiated for the run, from `request_ack`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelIdentity {
    pub model_id: Option<String>,
    pub model_name: Option<String>,
    pub charge_type: Option<String>,
}

/// Identity of the run in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub thread_id: Option<String>,
    /// Set once by the first `request_ack`.
    pub model: Option<ModelIdentity>,
}

impl RunContext {
    pub fn new(request: &RunRequest) -> Self {
        Self {
            run_id: request.run_id.clone(),
            thread_id: request.thread_id.clone(),
            model: None,
        }
    }

    /// Records the acknowledged model. Later acks do not overwrite it.
    pub(crate) fn record_ack(&mut self, ack: &RequestAckEvent) -> bool {
        if self.model.is_some() {
            return false;
        }
        self.model = Some(ModelIdentity {
            model_id: ack.model_id.clone(),
            model_name: ack.model_name.clone(),
            charge_type: ack.charge_type.clone(),
        });
        true
    }

    /// Records the thread id if the run started without one.
    pub(crate) fn record_thread(&mut self, thread_id: &str) -> bool {
        if self.thread_id.is_some() {
            return false;
        }
        self.thread_id = Some(thread_id.to_string());
        true
    }
}

/// State shared by the supervisor, the reader task and responder tasks of one
/// connection.
///
/// Handler calls happen under `dispatch`, and so does sealing the state, so a
/// handler call can never start after the run was closed.
pub(crate) struct Session {
    state: Mutex<ConnectionState>,
    context: Mutex<RunContext>,
    handler: Arc<dyn RunHandler>,
    dispatch: Mutex<()>,
    finished: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(handler: Arc<dyn RunHandler>, context: RunContext) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            state: Mutex::new(ConnectionState::Idle),
            context: Mutex::new(context),
            handler,
            dispatch: Mutex::new(()),
            finished,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Moves to `next` if legal. Returns whether the state changed.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            tracing::debug!("ignoring transition {} -> {}", *state, next);
            return false;
        }
        if *state != next {
            tracing::debug!("connection state {} -> {}", *state, next);
        }
        *state = next;
        true
    }

    /// Calls `f` with the handler if the run still accepts dispatch.
    pub(crate) fn with_handler<R>(&self, f: impl FnOnce(&dyn RunHandler) -> R) -> Option<R> {
        let _guard = self.dispatch.lock();
        if !self.state().accepts_dispatch() {
            return None;
        }
        Some(f(self.handler.as_ref()))
    }

    /// Calls `f` with the handler (if still live), then moves to `next` before
    /// any other handler call can start.
    pub(crate) fn with_handler_then_seal(
        &self,
        next: ConnectionState,
        f: impl FnOnce(&dyn RunHandler),
    ) {
        let _guard = self.dispatch.lock();
        if self.state().accepts_dispatch() {
            f(self.handler.as_ref());
        }
        self.transition(next);
    }

    /// Moves to `next` once no handler call is in progress.
    pub(crate) fn seal(&self, next: ConnectionState) -> bool {
        let _guard = self.dispatch.lock();
        self.transition(next)
    }

    pub(crate) fn context(&self) -> RunContext {
        self.context.lock().clone()
    }

    pub(crate) fn update_context<R>(&self, f: impl FnOnce(&mut RunContext) -> R) -> R {
        f(&mut self.context.lock())
    }

    /// Marks the reader task as finished.
    pub(crate) fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    /// Waits until the reader task has finished.
    pub(crate) async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        let _ = rx.wait_for(|finished| *finished).await;
    }
}
