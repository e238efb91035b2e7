//! Code interpreter backed by an MCP server's execution tool.
//!
//! The tool borrows its name, description and schema from the server. Each
//! call writes the submitted code to the trace stage, runs it remotely and
//! trims every captured output entry before handing the result back. Files
//! the code produces are fetched from the server, uploaded with the
//! caller's credential and attached to both the stage and the result.

use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tooloop_core::error::ToolError;
use tooloop_core::message::Attachment;
use tooloop_core::tool::{Tool, ToolCall, ToolContext, ToolResult};
use tracing::debug;
use crate::file_store::FileStore;
use crate::mcp::{McpClient, McpSession, McpToolSpec};

/// Longest output entry returned to the model, in characters.
pub const MAX_OUTPUT_CHARS: usize = 1000;

/// What the execution server reports back.
#[derive(Debug, Serialize, Deserialize)]
struct ExecutionResult {
    #[serde(default)]
    output: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    files: Vec<GeneratedFile>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment>,

    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// A file left behind by the executed code, served as an MCP resource.
#[derive(Debug, Serialize, Deserialize)]
struct GeneratedFile {
    name: String,
    mime_type: String,
    uri: String,
}

pub struct CodeInterpreterTool {
    session: Arc<dyn McpSession>,
    spec: McpToolSpec,
    files: Arc<dyn FileStore>,
}

impl std::fmt::Debug for CodeInterpreterTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeInterpreterTool")
            .field("server", &self.session.server_name())
            .field("tool", &self.spec.name)
            .finish()
    }
}

impl CodeInterpreterTool {
    pub fn new(session: Arc<dyn McpSession>, spec: McpToolSpec, files: Arc<dyn FileStore>) -> Self {
        Self { session, spec, files }
    }

    /// Connect to the server at `url` and adopt its `tool_name` tool.
    pub async fn connect(url: &str, tool_name: &str, files: Arc<dyn FileStore>) -> Result<Self, ToolError> {
        let client = McpClient::connect("code-interpreter", url).await?;
        let spec = client
            .list_tools()
            .await?
            .into_iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| ToolError::Unavailable(format!("code interpreter at {url} has no '{tool_name}' tool")))?;
        Ok(Self::new(Arc::new(client), spec, files))
    }

    /// Move one generated file into the caller's file store.
    async fn publish(&self, file: &GeneratedFile, api_key: Option<&str>) -> Result<Attachment, ToolError> {
        let data = self.session.read_resource(&file.uri).await?.into_bytes()?;
        let url = self.files.upload(api_key, &file.name, data, &file.mime_type).await?;
        Ok(Attachment {
            url,
            mime_type: file.mime_type.clone(),
            title: Some(file.name.clone()),
        })
    }
}

#[async_trait]
impl Tool for CodeInterpreterTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.spec.parameters.clone()
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let code = call.arguments["code"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'code' argument".into()))?;

        let stage = &ctx.stage;
        stage.append("## Request arguments: \n");
        stage.append(format!("```python\n\r{code}\n\r```\n\r"));
        match session_id(&call.arguments["session_id"]) {
            Some(id) => stage.append(format!("**session_id**: {id}\n\r")),
            None => stage.append("New session will be created\n\r"),
        }

        let raw = self.session.call_tool(&self.spec.name, call.arguments.clone()).await?;
        let mut result: ExecutionResult = serde_json::from_str(&raw).map_err(|e| ToolError::ExecutionFailed {
            tool_name: call.name.clone(),
            reason: format!("unexpected execution result: {e}"),
        })?;

        let mut attachments = Vec::with_capacity(result.files.len());
        for file in &result.files {
            let attachment = self.publish(file, ctx.api_key.as_deref()).await?;
            stage.add_attachment(attachment.clone());
            attachments.push(attachment);
        }
        result.attachments.extend(attachments.iter().cloned());

        for entry in &mut result.output {
            truncate_chars(entry, MAX_OUTPUT_CHARS);
        }
        debug!(
            tool = %call.name,
            outputs = result.output.len(),
            files = attachments.len(),
            "Code executed"
        );

        let pretty = serde_json::to_string_pretty(&result).unwrap_or_default();
        stage.append(format!("```json\n\r{pretty}\n\r```\n\r"));

        let compact = serde_json::to_string(&result).map_err(|e| ToolError::ExecutionFailed {
            tool_name: call.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(ToolResult::success(call, compact).with_attachments(attachments))
    }
}

/// A session id worth showing: present, not null, not zero, not blank.
fn session_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn truncate_chars(s: &mut String, max: usize) {
    if let Some((cut, _)) = s.char_indices().nth(max) {
        s.truncate(cut);
    }
}
