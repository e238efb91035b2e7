//! MCP-backed tools.
//!
//! [`McpClient`] holds a streamable-HTTP session with one MCP server. Each
//! tool the server lists is exposed to the model as an [`McpTool`] that
//! forwards calls unchanged.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use base64::Engine as _;
use rmcp::model::{CallToolRequestParam, RawContent, ReadResourceRequestParam, ResourceContents};
use rmcp::service::{RoleClient, RunningService, ServiceExt as _};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use tokio::sync::Mutex;
use tooloop_core::error::ToolError;
use tooloop_core::tool::{Tool, ToolCall, ToolContext, ToolResult};
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A tool as advertised by an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Contents of an MCP resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceData {
    Text(String),
    /// Base64-encoded binary content
    Blob(String),
}

impl ResourceData {
    /// Raw bytes of the resource, decoding blobs.
    pub fn into_bytes(self) -> Result<Vec<u8>, ToolError> {
        match self {
            ResourceData::Text(text) => Ok(text.into_bytes()),
            ResourceData::Blob(blob) => base64::engine::general_purpose::STANDARD
                .decode(blob.trim())
                .map_err(|e| ToolError::Unavailable(format!("resource blob is not valid base64: {e}"))),
        }
    }
}

/// The part of an MCP session the tools depend on.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Name of the server, for logs and errors.
    fn server_name(&self) -> &str;

    /// Invoke `tool` and return its text content.
    async fn call_tool(&self, tool: &str, arguments: serde_json::Value) -> Result<String, ToolError>;

    /// Fetch the first content entry of the resource at `uri`.
    async fn read_resource(&self, uri: &str) -> Result<ResourceData, ToolError>;
}

/// Connected MCP server.
pub struct McpClient {
    service: Mutex<RunningService<RoleClient, ()>>,
    server_name: String,
}

impl McpClient {
    /// Open a streamable-HTTP session and complete the MCP handshake.
    pub async fn connect(name: &str, url: &str) -> Result<Self, ToolError> {
        let config = StreamableHttpClientTransportConfig::with_uri(url);
        let transport = StreamableHttpClientTransport::with_client(reqwest::Client::new(), config);
        let service = tokio::time::timeout(CONNECT_TIMEOUT, ().serve(transport))
            .await
            .map_err(|_| ToolError::Unavailable(format!("MCP server '{name}' at {url}: handshake timed out")))?
            .map_err(|e| ToolError::Unavailable(format!("MCP server '{name}' at {url}: handshake failed: {e}")))?;

        info!(server = name, url, "Connected to MCP server");
        Ok(Self {
            service: Mutex::new(service),
            server_name: name.to_string(),
        })
    }

    /// Every tool the server offers.
    pub async fn list_tools(&self) -> Result<Vec<McpToolSpec>, ToolError> {
        let tools = self
            .service
            .lock()
            .await
            .list_all_tools()
            .await
            .map_err(|e| ToolError::Unavailable(format!("list_tools failed on {}: {e}", self.server_name)))?;

        Ok(tools
            .into_iter()
            .map(|tool| McpToolSpec {
                name: tool.name.to_string(),
                description: tool.description.as_deref().unwrap_or("").to_string(),
                parameters: serde_json::to_value(&*tool.input_schema)
                    .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
            })
            .collect())
    }
}

#[async_trait]
impl McpSession for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn call_tool(&self, tool: &str, arguments: serde_json::Value) -> Result<String, ToolError> {
        let arguments = match arguments {
            serde_json::Value::Object(map) => Some(map),
            serde_json::Value::Null => None,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "MCP arguments must be an object, got {other}"
                )));
            }
        };

        debug!(server = %self.server_name, tool, "Calling MCP tool");
        let result = self
            .service
            .lock()
            .await
            .call_tool(CallToolRequestParam {
                name: Cow::Owned(tool.to_string()),
                arguments,
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: tool.to_string(),
                reason: format!("MCP server {}: {e}", self.server_name),
            })?;

        let text = result
            .content
            .into_iter()
            .filter_map(|c| match c.raw {
                RawContent::Text(t) => Some(t.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error.unwrap_or(false) {
            return Err(ToolError::ExecutionFailed {
                tool_name: tool.to_string(),
                reason: text,
            });
        }
        Ok(text)
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceData, ToolError> {
        debug!(server = %self.server_name, uri, "Reading MCP resource");
        let result = self
            .service
            .lock()
            .await
            .read_resource(ReadResourceRequestParam { uri: uri.to_string() })
            .await
            .map_err(|e| ToolError::Unavailable(format!("read_resource {uri} failed on {}: {e}", self.server_name)))?;

        match result.contents.into_iter().next() {
            Some(ResourceContents::TextResourceContents { text, .. }) => Ok(ResourceData::Text(text)),
            Some(ResourceContents::BlobResourceContents { blob, .. }) => Ok(ResourceData::Blob(blob)),
            None => Err(ToolError::Unavailable(format!(
                "resource {uri} on {} has no contents",
                self.server_name
            ))),
        }
    }
}

/// A remote MCP tool exposed to the model under its own name.
pub struct McpTool {
    session: Arc<dyn McpSession>,
    spec: McpToolSpec,
}

impl McpTool {
    pub fn new(session: Arc<dyn McpSession>, spec: McpToolSpec) -> Self {
        Self { session, spec }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.spec.parameters.clone()
    }

    fn trace_visible(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let output = self.session.call_tool(&self.spec.name, call.arguments.clone()).await?;
        Ok(ToolResult::success(call, output))
    }
}

/// Connect to `url` and wrap every tool it lists.
pub async fn discover(name: &str, url: &str) -> Result<Vec<McpTool>, ToolError> {
    let client = McpClient::connect(name, url).await?;
    let specs = client.list_tools().await?;
    let session: Arc<dyn McpSession> = Arc::new(client);
    info!(server = name, count = specs.len(), "Discovered MCP tools");
    Ok(specs
        .into_iter()
        .map(|spec| McpTool::new(session.clone(), spec))
        .collect())
}
