//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what a host receives while a request is being
//! served: answer text as it arrives, tool-call progress, and the contents
//! of each tool call's trace stage.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use crate::message::Attachment;
use crate::provider::Usage;

/// Sending half of a host's live output sink.
pub type EventSender = mpsc::UnboundedSender<AgentStreamEvent>;

/// Receiving half of a host's live output sink.
pub type EventReceiver = mpsc::UnboundedReceiver<AgentStreamEvent>;

/// Create a connected sink pair.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted by the agent during streaming execution.
///
/// - `chunk`            partial answer text from the model
/// - `tool_call`        a tool is about to run
/// - `tool_result`      a tool finished, successfully or not
/// - `stage_*`          trace output of one tool call
/// - `done`             the request finished
/// - `error`            the request failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the LLM.
    Chunk { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// A trace stage was opened for a tool call.
    StageOpened { stage_id: String, name: String },

    /// Text appended to a trace stage.
    StageContent { stage_id: String, content: String },

    /// Attachment added to a trace stage.
    StageAttachment {
        stage_id: String,
        attachment: Attachment,
    },

    /// A trace stage was finalized.
    StageClosed { stage_id: String, success: bool },

    /// The stream is complete, with final metadata.
    Done {
        conversation_id: String,
        usage: Option<Usage>,
        rounds: usize,
        tool_calls_made: usize,
    },

    /// An error occurred mid-stream.
    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::StageOpened { .. } => "stage_opened",
            Self::StageContent { .. } => "stage_content",
            Self::StageAttachment { .. } => "stage_attachment",
            Self::StageClosed { .. } => "stage_closed",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
