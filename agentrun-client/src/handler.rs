//! Run handler: the caller's callback table.

use crate::error::RunError;
use agentrun_protocol::server::{
    AgentActionsEvent, DoneEvent, PartEvent, ReadyEvent, RequestAckEvent, RetryEvent,
    RunCompleteEvent, ThreadEvent, ToolCallProgressEvent, ToolReturnEvent, WarningEvent,
};

/// Receives the frames of one run.
///
/// Methods are called from the connection's reader task in wire order and
/// must not block. Every method has a no-op default. Once the run is closed,
/// by the caller or by a server `error` frame, no method is called again.
pub trait RunHandler: Send + Sync {
    /// The socket opened. The `auth` frame is sent right after.
    fn on_open(&self) {}

    /// The ready gate passed. The run request is sent right after.
    fn on_ready(&self, _ready: &ReadyEvent) {}

    fn on_request_ack(&self, _ack: &RequestAckEvent) {}

    fn on_part(&self, _part: &PartEvent) {}

    fn on_tool_return(&self, _tool_return: &ToolReturnEvent) {}

    fn on_tool_call_progress(&self, _progress: &ToolCallProgressEvent) {}

    fn on_run_complete(&self, _complete: &RunCompleteEvent) {}

    fn on_done(&self, _done: &DoneEvent) {}

    fn on_thread(&self, _thread: &ThreadEvent) {}

    fn on_warning(&self, _warning: &WarningEvent) {}

    fn on_retry(&self, _retry: &RetryEvent) {}

    fn on_agent_actions(&self, _actions: &AgentActionsEvent) {}

    fn on_error(&self, _error: &RunError) {}

    /// The server closed the connection after the ready gate.
    fn on_close(&self, _code: Option<u16>, _reason: &str) {}
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl RunHandler for NoopHandler {}
