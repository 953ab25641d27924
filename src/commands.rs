//! Command execution.

use crate::config::AppConfig;
use crate::library::JsonLibrary;
use crate::RunArgs;
use agentrun_client::{RunClient, RunError, RunHandler, StaticToken};
use agentrun_protocol::server::{
    DoneEvent, PartEvent, ReadyEvent, RequestAckEvent, RetryEvent, RunCompleteEvent,
    ThreadEvent, ToolReturnEvent, WarningEvent,
};
use agentrun_protocol::{
    Decoder, MessagePart, ModelSelection, RunRequest, UserPrompt, CLOSE_NORMAL,
};
use colored::Colorize;
use serde_json::Value;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Renders a run in the terminal.
#[derive(Default)]
struct TerminalHandler {
    failed: AtomicBool,
    finished: Notify,
}

impl TerminalHandler {
    fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

impl RunHandler for TerminalHandler {
    fn on_ready(&self, ready: &ReadyEvent) {
        tracing::info!(
            "ready (subscription: {}, mode: {})",
            ready.subscription_status.as_deref().unwrap_or("?"),
            ready.processing_mode.as_deref().unwrap_or("?")
        );
    }

    fn on_request_ack(&self, ack: &RequestAckEvent) {
        if let Some(ref name) = ack.model_name {
            eprintln!("{}", format!("[{}]", name).dimmed());
        }
    }

    fn on_part(&self, part: &PartEvent) {
        match &part.part {
            MessagePart::Text { content } => {
                print!("{}", content);
                let _ = std::io::stdout().flush();
            }
            MessagePart::Thinking { content } => {
                print!("{}", content.dimmed());
                let _ = std::io::stdout().flush();
            }
            MessagePart::ToolCall { tool_name, .. } => {
                eprintln!("\n{} {}", "->".cyan(), tool_name.cyan());
            }
        }
    }

    fn on_tool_return(&self, tool_return: &ToolReturnEvent) {
        eprintln!(
            "{} {}",
            "<-".cyan(),
            tool_return
                .tool_name
                .as_deref()
                .unwrap_or(&tool_return.tool_call_id)
                .dimmed()
        );
    }

    fn on_run_complete(&self, complete: &RunCompleteEvent) {
        if let Some(cost) = complete.cost {
            eprintln!("\n{}", format!("cost: {:.4}", cost).dimmed());
        }
    }

    fn on_done(&self, _done: &DoneEvent) {
        println!();
        self.finished.notify_one();
    }

    fn on_thread(&self, thread: &ThreadEvent) {
        tracing::info!("thread {}", thread.thread_id);
    }

    fn on_warning(&self, warning: &WarningEvent) {
        eprintln!("{}: {}", "Warning".yellow(), warning.message);
    }

    fn on_retry(&self, retry: &RetryEvent) {
        eprintln!(
            "{}: attempt {}{}",
            "Retrying".yellow(),
            retry.attempt,
            retry
                .reason
                .as_ref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default()
        );
    }

    fn on_error(&self, error: &RunError) {
        eprintln!("\n{}: {}", "Error".red(), error);
        if error.is_fatal() {
            self.failed.store(true, Ordering::SeqCst);
            self.finished.notify_one();
        }
    }

    fn on_close(&self, code: Option<u16>, reason: &str) {
        tracing::debug!("server closed ({:?}): {}", code, reason);
        self.finished.notify_one();
    }
}

/// Runs one agent turn. Returns whether it finished without a server error.
pub async fn run(
    config: &AppConfig,
    token: Option<String>,
    args: RunArgs,
) -> Result<bool, Box<dyn std::error::Error>> {
    let library = match args.library.as_ref().or(config.library.as_ref()) {
        Some(path) => {
            let library = JsonLibrary::load(path)?;
            tracing::info!("loaded {} library items from {}", library.len(), path.display());
            library
        }
        None => JsonLibrary::empty(),
    };
    let library = Arc::new(library);

    let request = build_request(config, &args)?;
    let client = RunClient::new(
        config.client_config(),
        Arc::new(StaticToken::new(token.unwrap_or_default())),
        library.clone(),
        library,
    );
    let handler = Arc::new(TerminalHandler::default());

    client.connect(request, handler.clone()).await?;

    tokio::select! {
        _ = handler.finished.notified() => {}
        _ = client.wait_closed() => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{}", "Cancelling...".dimmed());
            client.cancel(None).await;
            return Ok(false);
        }
    }

    client.close(CLOSE_NORMAL, "done").await;
    Ok(!handler.failed())
}

/// Builds the run request from flags and configured credentials.
fn build_request(
    config: &AppConfig,
    args: &RunArgs,
) -> Result<RunRequest, Box<dyn std::error::Error>> {
    let model = match args.model {
        Some(ref model) => ModelSelection::Custom {
            custom_model: parse_json_arg(model)?,
        },
        None => match (&config.model.access_id, &config.model.api_key) {
            (Some(access_id), Some(api_key)) => ModelSelection::Platform {
                access_id: access_id.clone(),
                api_key: api_key.clone(),
            },
            _ => {
                return Err(
                    "no model configured: set model.access_id and model.api_key, or pass --model"
                        .into(),
                )
            }
        },
    };

    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut request = RunRequest::new(run_id, UserPrompt::new(&args.prompt), model);
    if let Some(ref thread_id) = args.thread_id {
        request = request.with_thread_id(thread_id);
    }
    if let Some(ref retry) = args.retry_of {
        request = request.with_retry_of(retry);
    }
    if let Some(ref instructions) = args.custom_instructions {
        request = request.with_custom_instructions(instructions);
    }
    Ok(request)
}

/// Decodes captured wire frames, one per line, into a short summary per line.
pub fn decode_lines(input: &str) -> Vec<String> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| match Decoder::decode_server(line) {
            Ok(frame) => match frame.request_id() {
                Some(id) => format!("{}: {} (request_id {})", index + 1, frame.kind(), id),
                None => format!("{}: {}", index + 1, frame.kind()),
            },
            Err(e) => format!("{}: {} {}", index + 1, e.kind(), e),
        })
        .collect()
}

/// Reads `path` (or stdin for `-`) and prints the decoded summary.
pub fn decode(path: &str) -> Result<String, Box<dyn std::error::Error>> {
    let input = if path == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path)?
    };
    let lines = decode_lines(&input);
    if lines.is_empty() {
        return Ok("No frames".yellow().to_string());
    }
    Ok(lines.join("\n"))
}

/// Parses a JSON argument (or @file.json).
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}
