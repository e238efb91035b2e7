//! Conversation history: building the initial state of a request and
//! recording the tool-calling rounds it goes through.

use serde::{Deserialize, Serialize};
use tooloop_core::message::{Conversation, ConversationId, Message, Role};
use tracing::debug;

/// A tool-role message that does not answer a pending call, or a call
/// left without its answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("tool result {call_id} does not answer any preceding tool call")]
    DanglingToolResult { call_id: String },

    #[error("tool call {call_id} has no matching tool result")]
    MissingToolResult { call_id: String },
}

/// Every assistant tool-call message and its results from one request.
///
/// The host keeps this between requests and passes it back in so the model
/// sees what its tools returned last time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCallHistory {
    messages: Vec<Message>,
}

impl ToolCallHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a snapshot, rejecting one that breaks the call/result pairing.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, HistoryError> {
        let history = Self { messages };
        history.validate()?;
        Ok(history)
    }

    /// Append one round: the assistant message followed by its results.
    pub fn record_round(&mut self, assistant: &Message, results: &[Message]) {
        self.messages.push(assistant.clone());
        self.messages.extend_from_slice(results);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Number of rounds recorded.
    pub fn rounds(&self) -> usize {
        self.messages.iter().filter(|m| m.has_tool_calls()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn validate(&self) -> Result<(), HistoryError> {
        validate_tool_messages(&self.messages)
    }
}

/// Check that every tool-role message answers a call from the assistant
/// message before it, and every call is answered before the next
/// non-tool message.
pub fn validate_tool_messages(messages: &[Message]) -> Result<(), HistoryError> {
    let mut pending: Vec<String> = Vec::new();

    for message in messages {
        match message.role {
            Role::Tool => {
                let call_id = message.tool_call_id.clone().unwrap_or_default();
                match pending.iter().position(|id| *id == call_id) {
                    Some(pos) => {
                        pending.remove(pos);
                    }
                    None => return Err(HistoryError::DanglingToolResult { call_id }),
                }
            }
            _ => {
                if let Some(call_id) = pending.first() {
                    return Err(HistoryError::MissingToolResult {
                        call_id: call_id.clone(),
                    });
                }
                pending = message.tool_calls.iter().map(|c| c.id.clone()).collect();
            }
        }
    }

    match pending.into_iter().next() {
        Some(call_id) => Err(HistoryError::MissingToolResult { call_id }),
        None => Ok(()),
    }
}

/// Build the state a request starts from.
///
/// The system prompt is always message 0; system messages supplied by the
/// caller are dropped. Carried-over tool-call history is spliced in
/// before the assistant answer that concluded the previous request (the
/// last assistant message ahead of the newest user message), or before the
/// newest user message when there is no such answer.
pub fn prepare_conversation(
    id: ConversationId,
    system_prompt: &str,
    prior: Vec<Message>,
    carried: &ToolCallHistory,
) -> Conversation {
    let mut messages: Vec<Message> = prior.into_iter().filter(|m| m.role != Role::System).collect();

    if !carried.is_empty() {
        let last_user = messages.iter().rposition(|m| m.role == Role::User);
        let splice_at = match last_user {
            Some(user) => messages[..user]
                .iter()
                .rposition(|m| m.role == Role::Assistant)
                .unwrap_or(user),
            None => messages.len(),
        };
        debug!(at = splice_at, carried = carried.messages.len(), "Splicing carried tool-call history");
        messages.splice(splice_at..splice_at, carried.messages.iter().cloned());
    }

    let mut conversation = Conversation::with_id(id);
    conversation.push(Message::system(system_prompt));
    conversation.extend(messages);
    conversation
}
