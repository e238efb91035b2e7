//! Delta reassembly: turns a streamed model response back into one
//! assistant message.
//!
//! Tool calls arrive as pieces keyed by a positional `index`. Only the
//! opening piece of a call carries its id, so live accumulation is keyed by
//! index and ids are attached only when the stream ends.

use std::collections::BTreeMap;
use tooloop_core::error::AgentError;
use tooloop_core::message::{Attachment, Message, MessageToolCall};
use tooloop_core::provider::{ChunkReceiver, StreamChunk, ToolCallDelta, Usage};
use tooloop_core::stream_event::{AgentStreamEvent, EventSender};
use tracing::{debug, warn};

/// Something odd the reassembler tolerated but the caller should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyDiagnostic {
    /// A continuation piece arrived for an index no call was opened at.
    /// The piece was dropped.
    OrphanContinuation { index: u32 },
}

impl std::fmt::Display for ReassemblyDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrphanContinuation { index } => {
                write!(f, "dropped tool-call continuation for unknown index {index}")
            }
        }
    }
}

/// The outcome of one streamed model response.
#[derive(Debug, Clone)]
pub struct ReassembledMessage {
    /// Assistant message with text, attachments and tool calls in index order
    pub message: Message,

    pub usage: Option<Usage>,

    pub diagnostics: Vec<ReassemblyDiagnostic>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Single-pass accumulator over [`StreamChunk`]s.
pub struct Reassembler {
    text: String,
    calls: BTreeMap<u32, PendingCall>,
    attachments: Vec<Attachment>,
    usage: Option<Usage>,
    diagnostics: Vec<ReassemblyDiagnostic>,
    sink: Option<EventSender>,
}

impl Reassembler {
    /// Text is forwarded to `sink` as it arrives.
    pub fn new(sink: Option<EventSender>) -> Self {
        Self {
            text: String::new(),
            calls: BTreeMap::new(),
            attachments: Vec::new(),
            usage: None,
            diagnostics: Vec::new(),
            sink,
        }
    }

    /// Fold one fragment in. Text and tool-call data on the same fragment
    /// are both processed.
    pub fn push(&mut self, chunk: StreamChunk) {
        if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
            if let Some(sink) = &self.sink {
                let _ = sink.send(AgentStreamEvent::Chunk {
                    content: content.clone(),
                });
            }
            self.text.push_str(&content);
        }

        for delta in chunk.tool_calls {
            self.push_delta(delta);
        }

        self.attachments.extend(chunk.attachments);

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
    }

    fn push_delta(&mut self, delta: ToolCallDelta) {
        match delta.id.filter(|id| !id.is_empty()) {
            Some(id) => {
                debug!(index = delta.index, call_id = %id, "Tool call opened");
                self.calls.insert(
                    delta.index,
                    PendingCall {
                        id,
                        name: delta.name.unwrap_or_default(),
                        arguments: delta.arguments.unwrap_or_default(),
                    },
                );
            }
            None => match self.calls.get_mut(&delta.index) {
                Some(call) => {
                    if call.name.is_empty() {
                        if let Some(name) = delta.name {
                            call.name = name;
                        }
                    }
                    if let Some(arguments) = delta.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
                None => {
                    warn!(index = delta.index, "Dropping tool-call continuation with no opening fragment");
                    self.diagnostics
                        .push(ReassemblyDiagnostic::OrphanContinuation { index: delta.index });
                }
            },
        }
    }

    /// Close the stream and build the assistant message.
    ///
    /// Every call's argument text must be valid JSON; an empty buffer
    /// becomes `{}`.
    pub fn finish(self) -> Result<ReassembledMessage, AgentError> {
        let mut tool_calls = Vec::with_capacity(self.calls.len());
        for (_, call) in self.calls {
            let arguments = if call.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                call.arguments
            };
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&arguments) {
                return Err(AgentError::MalformedArguments {
                    call_id: call.id,
                    tool_name: call.name,
                    reason: e.to_string(),
                });
            }
            tool_calls.push(MessageToolCall {
                id: call.id,
                name: call.name,
                arguments,
            });
        }

        let mut message = Message::assistant(self.text);
        message.tool_calls = tool_calls;
        message.attachments = self.attachments;

        Ok(ReassembledMessage {
            message,
            usage: self.usage,
            diagnostics: self.diagnostics,
        })
    }
}

/// Drain a provider stream through a [`Reassembler`].
///
/// Transport errors end the round. The stream is done when the channel
/// closes or a fragment is marked `done`.
pub async fn reassemble(
    stream: &mut ChunkReceiver,
    sink: Option<EventSender>,
) -> Result<ReassembledMessage, AgentError> {
    let mut reassembler = Reassembler::new(sink);
    while let Some(item) = stream.recv().await {
        let chunk = item.map_err(AgentError::Provider)?;
        let done = chunk.done;
        reassembler.push(chunk);
        if done {
            break;
        }
    }
    reassembler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tooloop_core::error::ProviderError;
    use tooloop_core::stream_event::event_channel;
    use tokio::sync::mpsc;

    fn run(chunks: Vec<StreamChunk>) -> Result<ReassembledMessage, AgentError> {
        let mut r = Reassembler::new(None);
        for chunk in chunks {
            r.push(chunk);
        }
        r.finish()
    }

    #[test]
    fn text_only_stream_concatenates_in_order() {
        let out = run(vec![
            StreamChunk::text("Hel"),
            StreamChunk::text("lo, "),
            StreamChunk::text("world"),
        ])
        .unwrap();
        assert_eq!(out.message.content, "Hello, world");
        assert!(!out.message.has_tool_calls());
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn continuations_join_by_index_not_id() {
        let out = run(vec![
            StreamChunk::tool_calls(vec![
                ToolCallDelta::start(0, "call_a", "search"),
                ToolCallDelta::start(1, "call_b", "calc"),
            ]),
            StreamChunk::tool_calls(vec![ToolCallDelta::continuation(1, "{\"expr\":")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::continuation(0, "{\"q\":\"rust\"}")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::continuation(1, "\"2+2\"}")]),
        ])
        .unwrap();

        let calls = &out.message.tool_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, "{\"q\":\"rust\"}");
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].arguments, "{\"expr\":\"2+2\"}");
    }

    #[test]
    fn calls_are_emitted_in_index_order() {
        let out = run(vec![
            StreamChunk::tool_calls(vec![ToolCallDelta::start(2, "call_c", "c")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::start(0, "call_a", "a")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::start(1, "call_b", "b")]),
        ])
        .unwrap();
        let ids: Vec<_> = out.message.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b", "call_c"]);
    }

    #[test]
    fn orphan_continuation_is_dropped_and_diagnosed() {
        let out = run(vec![
            StreamChunk::tool_calls(vec![ToolCallDelta::continuation(3, "{\"lost\":true}")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::start(0, "call_a", "a")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::continuation(0, "{}")]),
        ])
        .unwrap();
        assert_eq!(out.message.tool_calls.len(), 1);
        assert_eq!(
            out.diagnostics,
            vec![ReassemblyDiagnostic::OrphanContinuation { index: 3 }]
        );
    }

    #[test]
    fn new_id_at_same_index_overwrites() {
        let out = run(vec![
            StreamChunk::tool_calls(vec![ToolCallDelta::start(0, "call_old", "a")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::continuation(0, "{\"x\":")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::start(0, "call_new", "b")]),
        ])
        .unwrap();
        assert_eq!(out.message.tool_calls.len(), 1);
        assert_eq!(out.message.tool_calls[0].id, "call_new");
        assert_eq!(out.message.tool_calls[0].arguments, "{}");
    }

    #[test]
    fn empty_arguments_normalize_to_empty_object() {
        let out = run(vec![StreamChunk::tool_calls(vec![ToolCallDelta::start(0, "call_a", "now")])]).unwrap();
        assert_eq!(out.message.tool_calls[0].arguments, "{}");
    }

    #[test]
    fn malformed_arguments_are_turn_fatal() {
        let err = run(vec![
            StreamChunk::tool_calls(vec![ToolCallDelta::start(0, "call_a", "search")]),
            StreamChunk::tool_calls(vec![ToolCallDelta::continuation(0, "{\"q\": ")]),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            AgentError::MalformedArguments { ref call_id, ref tool_name, .. }
                if call_id == "call_a" && tool_name == "search"
        ));
    }

    #[test]
    fn text_and_tool_data_on_one_fragment_are_both_kept() {
        let out = run(vec![StreamChunk {
            content: Some("Let me check.".into()),
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some("call_a".into()),
                name: Some("search".into()),
                arguments: Some("{\"q\":\"tides\"}".into()),
            }],
            ..StreamChunk::default()
        }])
        .unwrap();
        assert_eq!(out.message.content, "Let me check.");
        assert_eq!(out.message.tool_calls[0].arguments, "{\"q\":\"tides\"}");
    }

    #[test]
    fn empty_id_counts_as_continuation() {
        let out = run(vec![
            StreamChunk::tool_calls(vec![ToolCallDelta::start(0, "call_a", "search")]),
            StreamChunk::tool_calls(vec![ToolCallDelta {
                index: 0,
                id: Some(String::new()),
                name: None,
                arguments: Some("{}".into()),
            }]),
        ])
        .unwrap();
        assert_eq!(out.message.tool_calls[0].id, "call_a");
        assert_eq!(out.message.tool_calls[0].arguments, "{}");
    }

    #[tokio::test]
    async fn text_is_forwarded_to_sink_as_it_arrives() {
        let (tx, mut rx) = event_channel();
        let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
        chunk_tx.send(Ok(StreamChunk::text("a"))).await.unwrap();
        chunk_tx.send(Ok(StreamChunk::text("b"))).await.unwrap();
        drop(chunk_tx);

        let out = reassemble(&mut chunk_rx, Some(tx)).await.unwrap();
        assert_eq!(out.message.content, "ab");

        let mut forwarded = Vec::new();
        while let Ok(AgentStreamEvent::Chunk { content }) = rx.try_recv() {
            forwarded.push(content);
        }
        assert_eq!(forwarded, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn transport_error_ends_the_round() {
        let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
        chunk_tx.send(Ok(StreamChunk::text("partial"))).await.unwrap();
        chunk_tx
            .send(Err(ProviderError::StreamInterrupted("reset".into())))
            .await
            .unwrap();
        drop(chunk_tx);

        let err = reassemble(&mut chunk_rx, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(ProviderError::StreamInterrupted(_))));
    }
}
