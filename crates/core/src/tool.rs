//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! generate images, read files, run code, call MCP servers, etc.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ToolError;
use crate::message::{Attachment, Message};
use crate::provider::ToolDefinition;
use crate::trace::TraceStage;

/// A request to execute a tool, with its arguments already decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that produced it
    pub name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Files or images produced by the tool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            success: true,
            output: output.into(),
            attachments: Vec::new(),
            data: None,
        }
    }

    /// A failed call. The diagnostic becomes the tool message content.
    pub fn failure(call_id: impl Into<String>, name: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            success: false,
            output: diagnostic.into(),
            attachments: Vec::new(),
            data: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Convert into the tool-role message appended to the conversation.
    pub fn into_message(self) -> Message {
        let mut msg = Message::tool_result(self.call_id, self.name, self.output);
        msg.attachments = self.attachments;
        msg
    }
}

/// What a tool gets to know about the request it serves.
#[derive(Debug)]
pub struct ToolContext {
    /// The caller's credential, forwarded to downstream services
    pub api_key: Option<String>,

    /// Correlation id of the conversation
    pub conversation_id: String,

    /// This call's trace stage
    pub stage: TraceStage,
}

impl ToolContext {
    /// A context with no credential and a detached stage, for tests and
    /// one-off invocations.
    pub fn detached(conversation_id: impl Into<String>) -> Self {
        Self {
            api_key: None,
            conversation_id: conversation_id.into(),
            stage: TraceStage::detached("detached"),
        }
    }
}

/// The core Tool trait.
///
/// Each capability implements this trait and is registered in the
/// ToolRegistry. Implementations should turn their own failures into
/// `Err(ToolError)` rather than panic; the dispatcher contains both.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "image_generation").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether the dispatcher should echo arguments and response into the
    /// call's trace stage.
    fn trace_visible(&self) -> bool {
        false
    }

    /// Execute the tool.
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Built once at startup. The agent loop uses it to:
/// 1. Get tool definitions to send to the LLM
/// 2. Resolve tool names the LLM asks for
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Build a registry from a fixed list, rejecting duplicate names.
    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> std::result::Result<Self, ToolError> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool. A second tool with the same name is a configuration error.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Resolve a tool by name.
    pub fn resolve(&self, name: &str) -> std::result::Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM), in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.to_definition())
            .collect()
    }

    /// List all registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
