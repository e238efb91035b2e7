//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, Azure-style gateways that expose
//! `/chat/completions`, Ollama, vLLM and any other compatible endpoint.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling, streamed as raw indexed fragments
//! - Backend attachments under `custom_content.attachments`
//! - Deployment-specific `custom_fields`

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tooloop_core::error::ProviderError;
use tooloop_core::message::{Attachment, Message, MessageToolCall, Role};
use tooloop_core::provider::*;
use tracing::{debug, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", Some(api_key.into()))
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), None)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
                name: m.name.clone(),
                custom_content: if m.attachments.is_empty() {
                    None
                } else {
                    Some(ApiCustomContent {
                        attachments: m.attachments.clone(),
                    })
                },
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if let Some(fields) = &request.custom_fields {
            body["custom_fields"] = fields.clone();
        }

        body
    }

    /// A JSON POST authenticated with the request's own key when it has
    /// one, else with the provider's.
    fn post(&self, url: &str, request: &ProviderRequest) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        match request.api_key.as_ref().or(self.api_key.as_ref()) {
            Some(key) => builder
                .header("Authorization", format!("Bearer {key}"))
                .header("api-key", key),
            None => builder,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .post(&url, &request)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        message.tool_calls = tool_calls;
        message.attachments = choice
            .message
            .custom_content
            .map(|c| c.attachments)
            .unwrap_or_default();

        let usage = api_response.usage.map(ApiUsage::into_usage);

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .post(&url, &request)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLineBuffer::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in lines.push(&bytes) {
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(StreamChunk { done: true, ..StreamChunk::default() })).await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(&data) {
                        Ok(stream_resp) => {
                            if let Some(chunk) = stream_resp.into_chunk() {
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }
                        }
                        Err(e) => {
                            warn!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Malformed SSE payload, ending stream"
                            );
                            let _ = tx
                                .send(Err(ProviderError::StreamInterrupted(format!(
                                    "malformed SSE payload: {e}"
                                ))))
                                .await;
                            return;
                        }
                    }
                }
            }

            // Stream ended without [DONE]; closing the channel is enough.
            debug!(provider = %provider_name, "SSE stream closed without [DONE]");
        });

        Ok(rx)
    }
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes may split a line anywhere, even inside a multi-byte character,
/// so raw bytes are held until their newline arrives and only whole lines
/// are decoded.
#[derive(Debug, Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let decoded = String::from_utf8_lossy(&raw[..line_end]);
            let line = decoded.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim().to_string());
            }
        }
        payloads
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom_content: Option<ApiCustomContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiCustomContent {
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
    #[serde(default)]
    custom_content: Option<ApiCustomContent>,
}

/// A tool call delta. Arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl StreamResponse {
    /// Map one SSE payload onto a [`StreamChunk`], forwarding tool-call
    /// pieces as they came. Returns `None` when the payload carries nothing.
    fn into_chunk(self) -> Option<StreamChunk> {
        let usage = self.usage.map(ApiUsage::into_usage);
        let mut chunk = StreamChunk {
            usage,
            ..StreamChunk::default()
        };

        if let Some(choice) = self.choices.into_iter().next() {
            let delta = choice.delta;
            chunk.content = delta.content.filter(|c| !c.is_empty());
            chunk.tool_calls = delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| {
                    let (name, arguments) = match tc.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    ToolCallDelta {
                        index: tc.index,
                        id: tc.id,
                        name,
                        arguments,
                    }
                })
                .collect();
            chunk.attachments = delta
                .custom_content
                .map(|c| c.attachments)
                .unwrap_or_default();
            if choice.finish_reason.is_some() && chunk.usage.is_some() {
                chunk.done = true;
            }
        }

        let empty = chunk.content.is_none()
            && chunk.tool_calls.is_empty()
            && chunk.attachments.is_empty()
            && chunk.usage.is_none();
        if empty { None } else { Some(chunk) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("dial", "http://localhost:8080/v1/", None).unwrap();
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "file_content_extraction".into(),
            description: "Read a file".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "file_content_extraction");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn request_body_forwards_custom_fields() {
        let mut request = ProviderRequest::new("dall-e-3", vec![Message::user("a cat")]);
        request.custom_fields = Some(serde_json::json!({"size": "1024x1024"}));
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["custom_fields"]["size"], "1024x1024");
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let mut msg = Message::assistant("thinking...");
        msg.tool_calls = vec![MessageToolCall {
            id: "call_1".into(),
            name: "execute_code".into(),
            arguments: r#"{"code":"print(1)"}"#.into(),
        }];
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].function.name, "execute_code");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "execute_code", "result data");
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api_msgs[0].name.as_deref(), Some("execute_code"));
    }

    // --- SSE parsing tests ---

    #[test]
    fn sse_buffer_handles_split_lines() {
        let mut lines = SseLineBuffer::default();
        assert!(lines.push(b"data: {\"choi").is_empty());
        let out = lines.push(b"ces\":[]}\r\n\r\n: keep-alive\ndata: [DONE]\n");
        assert_eq!(out, vec![r#"{"choices":[]}"#.to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn sse_buffer_keeps_characters_split_across_reads() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let cut = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut lines = SseLineBuffer::default();
        assert!(lines.push(&line[..cut]).is_empty());
        let out = lines.push(&line[cut..]);
        assert_eq!(out.len(), 1);

        let chunk = serde_json::from_str::<StreamResponse>(&out[0]).unwrap().into_chunk().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("café"));
    }

    #[test]
    fn content_delta_becomes_text_chunk() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let chunk = serde_json::from_str::<StreamResponse>(data).unwrap().into_chunk().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hello"));
        assert!(chunk.tool_calls.is_empty());
        assert!(!chunk.done);
    }

    #[test]
    fn empty_delta_is_skipped() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":null}]}"#;
        assert!(serde_json::from_str::<StreamResponse>(data).unwrap().into_chunk().is_none());
    }

    #[test]
    fn tool_call_pieces_are_forwarded_raw() {
        let first = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"execute_code","arguments":""}}]},"finish_reason":null}]}"#;
        let chunk = serde_json::from_str::<StreamResponse>(first).unwrap().into_chunk().unwrap();
        assert_eq!(chunk.tool_calls[0].index, 0);
        assert_eq!(chunk.tool_calls[0].id.as_deref(), Some("call_abc"));
        assert_eq!(chunk.tool_calls[0].name.as_deref(), Some("execute_code"));

        let next = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"code\""}}]},"finish_reason":null}]}"#;
        let chunk = serde_json::from_str::<StreamResponse>(next).unwrap().into_chunk().unwrap();
        assert_eq!(chunk.tool_calls[0], ToolCallDelta::continuation(0, "{\"code\""));
    }

    #[test]
    fn parallel_tool_calls_keep_their_indices() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"search","arguments":""}},{"index":1,"id":"call_b","function":{"name":"calc","arguments":""}}]},"finish_reason":null}]}"#;
        let chunk = serde_json::from_str::<StreamResponse>(data).unwrap().into_chunk().unwrap();
        let indices: Vec<u32> = chunk.tool_calls.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn custom_content_attachments_are_forwarded() {
        let data = r#"{"choices":[{"delta":{"custom_content":{"attachments":[{"url":"files/a.png","type":"image/png","title":"img"}]}},"finish_reason":null}]}"#;
        let chunk = serde_json::from_str::<StreamResponse>(data).unwrap().into_chunk().unwrap();
        assert_eq!(chunk.attachments.len(), 1);
        assert!(chunk.attachments[0].is_image());
    }

    #[test]
    fn usage_chunk_is_forwarded() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let chunk = serde_json::from_str::<StreamResponse>(data).unwrap().into_chunk().unwrap();
        let usage = chunk.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn complete_response_parses_attachments() {
        let data = r#"{"choices":[{"message":{"role":"assistant","content":"","custom_content":{"attachments":[{"url":"u","type":"image/jpeg"}]}}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert!(parsed.model.is_none());
        let attachments = parsed.choices[0].message.custom_content.as_ref().unwrap();
        assert_eq!(attachments.attachments[0].mime_type, "image/jpeg");
    }

    // --- Streaming against a local server ---

    /// Serve one HTTP response whose body is `body`, handing back the raw
    /// request once it has been read in full.
    async fn serve_once(body: String) -> (String, tokio::sync::oneshot::Receiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                    continue;
                };
                let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + length {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            let _ = seen_tx.send(String::from_utf8_lossy(&request).into_owned());
        });

        (format!("http://{addr}/v1"), seen_rx)
    }

    fn sse(payloads: &[&str]) -> String {
        payloads.iter().map(|p| format!("data: {p}\n\n")).collect()
    }

    async fn collect(mut rx: ChunkReceiver) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn malformed_payload_ends_the_stream_with_an_error() {
        let body = sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"calc","arguments":"{\"expr\":\"2"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"+2"}}]}}]}garbage"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"}"}}]}}]}"#,
            "[DONE]",
        ]);
        let (url, _seen) = serve_once(body).await;
        let provider = OpenAiCompatProvider::new("local", url, None).unwrap();

        let rx = provider.stream(ProviderRequest::new("gpt-4o", vec![Message::user("2+2?")])).await.unwrap();
        let items = collect(rx).await;

        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.tool_calls[0].id.as_deref(), Some("call_1"));
        assert!(matches!(&items[1], Err(ProviderError::StreamInterrupted(m)) if m.contains("malformed")));
    }

    #[tokio::test]
    async fn well_formed_stream_reaches_done() {
        let body = sse(&[r#"{"choices":[{"delta":{"content":"Hi"}}]}"#, "[DONE]"]);
        let (url, _seen) = serve_once(body).await;
        let provider = OpenAiCompatProvider::new("local", url, None).unwrap();

        let items = collect(provider.stream(ProviderRequest::new("gpt-4o", vec![])).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("Hi"));
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn request_key_overrides_provider_key() {
        let (url, seen) = serve_once(sse(&["[DONE]"])).await;
        let provider = OpenAiCompatProvider::new("local", url, Some("sk-config".into())).unwrap();

        let request = ProviderRequest::new("dall-e-3", vec![]).with_api_key(Some("sk-caller".into()));
        collect(provider.stream(request).await.unwrap()).await;

        let raw = seen.await.unwrap().to_ascii_lowercase();
        assert!(raw.contains("authorization: bearer sk-caller"));
        assert!(raw.contains("api-key: sk-caller"));
        assert!(!raw.contains("sk-config"));
        assert!(!raw.contains("\"api_key\""));
    }

    #[tokio::test]
    async fn provider_key_is_used_without_override() {
        let (url, seen) = serve_once(sse(&["[DONE]"])).await;
        let provider = OpenAiCompatProvider::new("local", url, Some("sk-config".into())).unwrap();

        collect(provider.stream(ProviderRequest::new("gpt-4o", vec![])).await.unwrap()).await;

        assert!(seen.await.unwrap().to_ascii_lowercase().contains("authorization: bearer sk-config"));
    }
}
