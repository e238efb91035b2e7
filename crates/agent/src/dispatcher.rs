//! Concurrent tool-call dispatch.
//!
//! Every call in a batch runs as its own tokio task. The batch is joined
//! with a fan-in barrier and results come back in request order. Nothing a
//! tool does (an `Err`, bad arguments, a panic) escapes as anything other
//! than a failed [`ToolResult`].

use std::sync::Arc;
use futures::future::join_all;
use tooloop_core::message::MessageToolCall;
use tooloop_core::stream_event::{AgentStreamEvent, EventSender};
use tooloop_core::tool::{ToolCall, ToolContext, ToolRegistry, ToolResult};
use tooloop_core::trace::TraceStage;
use tracing::{debug, info, warn};

/// Per-request facts handed to every tool in a batch.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub api_key: Option<String>,
    pub conversation_id: String,
    pub sink: Option<EventSender>,
}

impl DispatchContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            api_key: None,
            conversation_id: conversation_id.into(),
            sink: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_sink(mut self, sink: EventSender) -> Self {
        self.sink = Some(sink);
        self
    }

    fn emit(&self, event: AgentStreamEvent) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }
}

/// Runs batches of tool calls against a registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute every call concurrently and wait for all of them.
    ///
    /// Returns exactly one result per call, in the order given.
    pub async fn dispatch(&self, calls: &[MessageToolCall], ctx: &DispatchContext) -> Vec<ToolResult> {
        info!(
            conversation_id = %ctx.conversation_id,
            count = calls.len(),
            "Dispatching tool calls"
        );

        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let registry = self.registry.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { run_call(&registry, call, &ctx).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(calls)
            .map(|(joined, call)| match joined {
                Ok(result) => result,
                Err(e) => {
                    let reason = if e.is_panic() {
                        "the tool crashed while running"
                    } else {
                        "the tool task was cancelled"
                    };
                    warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool task did not complete");
                    let result = ToolResult::failure(&call.id, &call.name, format!("Error: {reason}"));
                    ctx.emit(result_event(&result));
                    result
                }
            })
            .collect()
    }
}

fn result_event(result: &ToolResult) -> AgentStreamEvent {
    AgentStreamEvent::ToolResult {
        id: result.call_id.clone(),
        name: result.name.clone(),
        output: result.output.clone(),
        success: result.success,
    }
}

/// Decode argument text. Empty text means no arguments.
fn decode_arguments(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
}

async fn run_call(registry: &ToolRegistry, call: MessageToolCall, ctx: &DispatchContext) -> ToolResult {
    let stage = match &ctx.sink {
        Some(sink) => TraceStage::open(sink.clone(), &call.id, &call.name),
        None => TraceStage::detached(&call.name),
    };

    let arguments = match decode_arguments(&call.arguments) {
        Ok(value) => value,
        Err(e) => {
            warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool arguments are not valid JSON");
            return finish(ctx, &stage, ToolResult::failure(
                &call.id,
                &call.name,
                format!("Error: arguments for '{}' are not valid JSON: {e}", call.name),
            ));
        }
    };

    ctx.emit(AgentStreamEvent::ToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        input: arguments.clone(),
    });

    let tool = match registry.resolve(&call.name) {
        Ok(tool) => tool,
        Err(e) => {
            warn!(tool = %call.name, call_id = %call.id, "Model asked for an unknown tool");
            return finish(ctx, &stage, ToolResult::failure(&call.id, &call.name, format!("Error: {e}")));
        }
    };

    let visible = tool.trace_visible();
    if visible {
        let pretty = serde_json::to_string_pretty(&arguments).unwrap_or_else(|_| call.arguments.clone());
        stage.append("## Request arguments: \n");
        stage.append(format!("```json\n{pretty}\n```\n"));
        stage.append("## Response: \n");
    }

    let tool_call = ToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments,
    };
    let tool_ctx = ToolContext {
        api_key: ctx.api_key.clone(),
        conversation_id: ctx.conversation_id.clone(),
        stage,
    };

    let start = std::time::Instant::now();
    let result = match tool.execute(&tool_call, &tool_ctx).await {
        Ok(mut result) => {
            // The back-reference always matches the request.
            result.call_id = call.id.clone();
            result.name = call.name.clone();
            result
        }
        Err(e) => {
            warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
            ToolResult::failure(&call.id, &call.name, format!("Error: {e}"))
        }
    };
    debug!(
        tool = %call.name,
        call_id = %call.id,
        success = result.success,
        duration_ms = start.elapsed().as_millis() as u64,
        "Tool finished"
    );

    if visible {
        tool_ctx.stage.append(result.output.clone());
        for attachment in &result.attachments {
            tool_ctx.stage.add_attachment(attachment.clone());
        }
    }

    finish(ctx, &tool_ctx.stage, result)
}

fn finish(ctx: &DispatchContext, stage: &TraceStage, result: ToolResult) -> ToolResult {
    stage.close(result.success);
    ctx.emit(result_event(&result));
    result
}
