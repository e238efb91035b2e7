//! Shared test helpers: a scripted streaming provider and stub tools.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use async_trait::async_trait;
use tooloop_core::error::{ProviderError, ToolError};
use tooloop_core::message::MessageToolCall;
use tooloop_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallDelta, Usage,
};
use tooloop_core::tool::{Tool, ToolCall, ToolContext, ToolResult};

type Script = Vec<Result<StreamChunk, ProviderError>>;

/// A provider that replays one scripted fragment sequence per call.
///
/// Panics if more calls are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("scripted provider only streams".into()))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no script for call #{n}"));

        let (tx, rx) = tokio::sync::mpsc::channel(script.len().max(1));
        for item in script {
            tx.send(item).await.unwrap();
        }
        Ok(rx)
    }
}

/// Fragments for a plain text answer, split into pieces.
pub fn text_script(pieces: &[&str]) -> Script {
    let mut script: Script = pieces.iter().map(|p| Ok(StreamChunk::text(*p))).collect();
    script.push(Ok(StreamChunk {
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        ..StreamChunk::default()
    }));
    script
}

/// Fragments opening each call, then streaming its arguments in two halves.
pub fn tool_call_script(thought: &str, calls: &[(&str, &str, serde_json::Value)]) -> Script {
    let mut script: Script = Vec::new();
    if !thought.is_empty() {
        script.push(Ok(StreamChunk::text(thought)));
    }
    for (i, (id, name, _)) in calls.iter().enumerate() {
        script.push(Ok(StreamChunk::tool_calls(vec![ToolCallDelta::start(i as u32, *id, *name)])));
    }
    for (i, (_, _, args)) in calls.iter().enumerate() {
        let text = args.to_string();
        let (head, tail) = text.split_at(text.len() / 2);
        script.push(Ok(StreamChunk::tool_calls(vec![ToolCallDelta::continuation(i as u32, head)])));
        script.push(Ok(StreamChunk::tool_calls(vec![ToolCallDelta::continuation(i as u32, tail)])));
    }
    script
}

pub fn make_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

/// Echoes `text`, optionally after sleeping `delay_ms`.
pub struct SlowEchoTool {
    name: &'static str,
    visible: bool,
}

impl SlowEchoTool {
    pub fn new(name: &'static str) -> Self {
        Self { name, visible: false }
    }

    pub fn visible(name: &'static str) -> Self {
        Self { name, visible: true }
    }
}

#[async_trait]
impl Tool for SlowEchoTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Echoes the text back"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "delay_ms": { "type": "integer" }
            },
            "required": ["text"]
        })
    }

    fn trace_visible(&self) -> bool {
        self.visible
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        if let Some(ms) = call.arguments["delay_ms"].as_u64() {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
        let text = call.arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))?;
        Ok(ToolResult::success(call, text))
    }
}

/// Always returns an execution error.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: call.name.clone(),
            reason: "backend exploded".into(),
        })
    }
}

/// Panics mid-execution.
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panic"
    }

    fn description(&self) -> &str {
        "Panics"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        ctx.stage.append("about to fall over");
        panic!("tool bug");
    }
}
