//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of fragments.
//!
//! Streamed fragments are delivered raw: tool-call pieces keep their
//! positional `index` and only the first piece of each call carries its
//! identifier. Reassembly is the agent's job, not the provider's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use crate::error::ProviderError;
use crate::message::{Attachment, Message};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model or deployment to use (e.g., "gpt-4o", "dall-e-3")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Deployment-specific options forwarded verbatim (e.g. image size)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<serde_json::Value>,

    /// Caller credential that takes precedence over the provider's own key
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// A streaming request with default sampling settings.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            tools: Vec::new(),
            stream: true,
            custom_fields: None,
            api_key: None,
        }
    }

    /// Authenticate this request with `api_key` instead of the provider's key.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if api_key.is_some() {
            self.api_key = api_key;
        }
        self
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One piece of a tool call as it arrives on the wire.
///
/// The first piece for a given `index` carries `id` (and usually `name`);
/// later pieces for the same index omit `id` and carry argument text only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call within the response, stable for one stream
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Partial JSON argument text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// The opening piece of a call.
    pub fn start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: None,
        }
    }

    /// A continuation piece carrying more argument text.
    pub fn continuation(index: u32, arguments: impl Into<String>) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments: Some(arguments.into()),
        }
    }
}

/// A single fragment in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool call deltas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,

    /// Attachments emitted by the backend (e.g. generated images)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// A text-only fragment.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A fragment carrying tool-call pieces only.
    pub fn tool_calls(deltas: Vec<ToolCallDelta>) -> Self {
        Self {
            tool_calls: deltas,
            ..Self::default()
        }
    }
}

/// Receiving half of a provider stream.
///
/// The stream is exhausted when the channel closes.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The agent loop calls `stream()`
/// without knowing which backend is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response fragments.
    ///
    /// Default implementation calls `complete()` and replays the result as a
    /// single fragment, with each tool call delivered whole at its position.
    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let tool_calls = response
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| ToolCallDelta {
                index: i as u32,
                id: Some(tc.id),
                name: Some(tc.name),
                arguments: Some(tc.arguments),
            })
            .collect();
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.message.content),
                tool_calls,
                attachments: response.message.attachments,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageToolCall;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let mut message = Message::assistant("checking");
            message.tool_calls = vec![
                MessageToolCall {
                    id: "call_a".into(),
                    name: "search".into(),
                    arguments: r#"{"q":"rust"}"#.into(),
                },
                MessageToolCall {
                    id: "call_b".into(),
                    name: "calc".into(),
                    arguments: "{}".into(),
                },
            ];
            Ok(ProviderResponse {
                message,
                usage: None,
                model: request.model,
            })
        }
    }

    #[test]
    fn provider_request_defaults() {
        let req = ProviderRequest::new("gpt-4o", vec![]);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.stream);
        assert!(req.custom_fields.is_none());
    }

    #[test]
    fn caller_key_is_kept_out_of_serialized_requests() {
        let req = ProviderRequest::new("dall-e-3", vec![]).with_api_key(Some("sk-caller".into()));
        assert_eq!(req.api_key.as_deref(), Some("sk-caller"));
        assert!(!serde_json::to_string(&req).unwrap().contains("sk-caller"));

        let unchanged = req.with_api_key(None);
        assert_eq!(unchanged.api_key.as_deref(), Some("sk-caller"));
    }

    #[test]
    fn tool_call_delta_skips_absent_fields() {
        let json = serde_json::to_string(&ToolCallDelta::continuation(2, "{\"a\"")).unwrap();
        assert!(json.contains(r#""index":2"#));
        assert!(!json.contains("\"id\""));
        assert!(!json.contains("\"name\""));
    }

    #[tokio::test]
    async fn default_stream_replays_complete_as_indexed_deltas() {
        let mut rx = FixedProvider
            .stream(ProviderRequest::new("m", vec![]))
            .await
            .unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("checking"));
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[1].index, 1);
        assert_eq!(chunk.tool_calls[1].id.as_deref(), Some("call_b"));
        assert!(rx.recv().await.is_none());
    }
}
