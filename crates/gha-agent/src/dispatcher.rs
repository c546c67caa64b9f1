//! Sequential, failure-isolated execution of one turn's tool calls.

use std::sync::Arc;
use std::time::Duration;

use gha_core::config::ToolsConfig;
use gha_core::error::ErrorKind;
use gha_core::types::{ToolInvocationRecord, ToolOutput, ToolTrace};
use serde_json::Value;

use crate::tool::{ToolCall, ToolContext, ToolRegistry};

/// A call together with its untruncated result, as handed back to the
/// reasoning engine for summarization.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCall {
    pub call: ToolCall,
    pub output: ToolOutput,
}

/// Outcome of a batch: the trace to persist and the full results.
#[derive(Debug, Clone, Default)]
pub struct Dispatch {
    pub trace: ToolTrace,
    pub executed: Vec<ExecutedCall>,
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    call_timeout: Duration,
    output_limit: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, call_timeout: Duration, output_limit: usize) -> Self {
        Self {
            registry,
            call_timeout,
            output_limit,
        }
    }

    pub fn from_config(registry: Arc<ToolRegistry>, config: &ToolsConfig) -> Self {
        Self::new(
            registry,
            Duration::from_secs(config.call_timeout_secs),
            config.output_limit,
        )
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run `calls` strictly in order.
    ///
    /// Every call yields exactly one trace entry: a failing, unknown or
    /// timed-out call is recorded as an error and the batch moves on.
    pub async fn dispatch(&self, calls: &[ToolCall], ctx: &ToolContext) -> Dispatch {
        let mut dispatch = Dispatch::default();

        for (idx, call) in calls.iter().enumerate() {
            let started = std::time::Instant::now();
            let result = tokio::time::timeout(
                self.call_timeout,
                self.registry.execute(&call.name, call.arguments.clone(), ctx),
            )
            .await;

            let output = match result {
                Ok(Ok(value)) => ToolOutput::Success(value),
                Ok(Err(e)) => ToolOutput::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                },
                Err(_) => ToolOutput::Error {
                    kind: ErrorKind::Timeout,
                    message: format!(
                        "`{}` did not finish within {}s",
                        call.name,
                        self.call_timeout.as_secs_f64()
                    ),
                },
            };

            match &output {
                ToolOutput::Success(_) => tracing::info!(
                    tool = %call.name,
                    index = idx,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool call succeeded"
                ),
                ToolOutput::Error { kind, message } => tracing::warn!(
                    tool = %call.name,
                    index = idx,
                    %kind,
                    error = %message,
                    "tool call failed"
                ),
            }

            dispatch.trace.push(ToolInvocationRecord {
                tool_name: call.name.clone(),
                input: call.arguments.clone(),
                output: truncate_output(&output, self.output_limit),
            });
            dispatch.executed.push(ExecutedCall {
                call: call.clone(),
                output,
            });
        }

        dispatch
    }
}

/// Shorten a recorded output to `limit` characters plus a `...` marker.
pub fn truncate_output(output: &ToolOutput, limit: usize) -> ToolOutput {
    match output {
        ToolOutput::Success(Value::String(s)) => {
            ToolOutput::Success(Value::String(truncate_chars(s, limit)))
        }
        ToolOutput::Success(value) => {
            let rendered = value.to_string();
            if rendered.chars().count() > limit {
                ToolOutput::Success(Value::String(truncate_chars(&rendered, limit)))
            } else {
                output.clone()
            }
        }
        ToolOutput::Error { kind, message } => ToolOutput::Error {
            kind: *kind,
            message: truncate_chars(message, limit),
        },
    }
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
