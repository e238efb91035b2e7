//! The orchestration loop.
//!
//! One call to [`AgentLoop::run`] serves one inbound request: it streams a
//! model response, reassembles it, and either returns the answer or
//! dispatches the requested tool calls, folds their results back into the
//! conversation and asks the model again.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tooloop_config::AppConfig;
use tooloop_core::error::AgentError;
use tooloop_core::message::{Conversation, ConversationId, Message, Role};
use tooloop_core::provider::{Provider, ProviderRequest, Usage};
use tooloop_core::stream_event::{AgentStreamEvent, EventSender};
use tooloop_core::tool::{ToolRegistry, ToolResult};
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatchContext, Dispatcher};
use crate::history::{ToolCallHistory, prepare_conversation};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::reassembler::{ReassembledMessage, ReassemblyDiagnostic, reassemble};

/// Where the loop is.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    /// Waiting on the next model response.
    AwaitingModel,

    /// An answer without tool calls has been produced (or the round limit
    /// was hit).
    Terminal { message: Message, outcome: TurnOutcome },
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without asking for tools.
    Completed,

    /// The round limit was reached; the answer is partial.
    RoundLimit,
}

/// Non-fatal things that happened during a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDiagnostic {
    Reassembly {
        round: u32,
        diagnostic: ReassemblyDiagnostic,
    },
    RoundLimit {
        max_rounds: u32,
    },
}

impl std::fmt::Display for TurnDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reassembly { round, diagnostic } => write!(f, "round {round}: {diagnostic}"),
            Self::RoundLimit { max_rounds } => {
                write!(f, "stopped after {max_rounds} rounds of tool calls")
            }
        }
    }
}

/// What the host hands the loop for one request.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    /// Prior turns, ending with the newest user message
    pub messages: Vec<Message>,

    /// Tool-call history carried over from the previous request
    pub tool_call_history: ToolCallHistory,

    /// Deployment override; the loop's default model otherwise
    pub model: Option<String>,

    /// The caller's credential, forwarded to tools
    pub api_key: Option<String>,

    pub conversation_id: ConversationId,
}

impl TurnInput {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Shortcut for a single user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(vec![Message::user(text)])
    }

    pub fn with_history(mut self, history: ToolCallHistory) -> Self {
        self.tool_call_history = history;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_conversation_id(mut self, id: ConversationId) -> Self {
        self.conversation_id = id;
        self
    }
}

/// What the loop hands back.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    /// The final assistant message (no tool calls)
    pub message: Message,

    pub outcome: TurnOutcome,

    /// Model calls made
    pub rounds: u32,

    pub tool_calls_made: usize,

    /// Snapshot for the host to carry into the next request
    pub tool_call_history: ToolCallHistory,

    /// The full conversation state, system prompt first
    pub conversation: Conversation,

    pub diagnostics: Vec<TurnDiagnostic>,

    /// Token usage summed over all rounds
    pub usage: Option<Usage>,
}

/// Mutable state of one request.
struct Turn {
    conversation: Conversation,
    model: String,
    dispatch: DispatchContext,
    round: u32,
    tool_calls_made: usize,
    history: ToolCallHistory,
    diagnostics: Vec<TurnDiagnostic>,
    usage: Option<Usage>,
}

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The default model to use
    model: String,

    temperature: f32,

    max_tokens: Option<u32>,

    dispatcher: Dispatcher,

    system_prompt: String,

    /// Maximum model calls per request
    max_rounds: u32,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            dispatcher: Dispatcher::new(tools),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_rounds: 10,
        }
    }

    /// Build a loop from loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
    ) -> Result<Self, tooloop_config::ConfigError> {
        let mut agent = Self::new(provider, &config.deployment, tools)
            .with_temperature(config.temperature)
            .with_max_rounds(config.agent.max_rounds);
        if let Some(max) = config.max_tokens {
            agent = agent.with_max_tokens(max);
        }
        if let Some(prompt) = config.system_prompt()? {
            agent = agent.with_system_prompt(prompt);
        }
        Ok(agent)
    }

    /// Set the maximum number of model calls per request.
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.dispatcher.registry()
    }

    /// Serve one request.
    ///
    /// Text is streamed to `sink` as it arrives, followed by tool progress
    /// and a final `done` (or `error`) event. Cancelling `cancel` stops the
    /// loop at the next model call or dispatch batch, and interrupts a
    /// model stream in flight; a batch already running completes first, so
    /// the conversation never holds a tool call without its result.
    pub async fn run(
        &self,
        input: TurnInput,
        sink: EventSender,
        cancel: CancellationToken,
    ) -> Result<TurnOutput, AgentError> {
        let conversation_id = input.conversation_id.to_string();
        match self.run_inner(input, &sink, &cancel).await {
            Ok(output) => {
                let _ = sink.send(AgentStreamEvent::Done {
                    conversation_id,
                    usage: output.usage.clone(),
                    rounds: output.rounds as usize,
                    tool_calls_made: output.tool_calls_made,
                });
                Ok(output)
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Request failed");
                let _ = sink.send(AgentStreamEvent::Error { message: e.to_string() });
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        input: TurnInput,
        sink: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<TurnOutput, AgentError> {
        let conversation = prepare_conversation(
            input.conversation_id.clone(),
            &self.system_prompt,
            input.messages,
            &input.tool_call_history,
        );

        info!(
            conversation_id = %conversation.id,
            messages = conversation.len(),
            "Processing conversation"
        );

        let mut turn = Turn {
            dispatch: DispatchContext::new(conversation.id.to_string())
                .with_api_key(input.api_key)
                .with_sink(sink.clone()),
            conversation,
            model: input.model.unwrap_or_else(|| self.model.clone()),
            round: 0,
            tool_calls_made: 0,
            history: ToolCallHistory::new(),
            diagnostics: Vec::new(),
            usage: None,
        };

        let mut state = LoopState::AwaitingModel;
        let (message, outcome) = loop {
            state = match state {
                LoopState::AwaitingModel => self.advance(&mut turn, sink, cancel).await?,
                LoopState::Terminal { message, outcome } => break (message, outcome),
            };
        };

        Ok(TurnOutput {
            message,
            outcome,
            rounds: turn.round,
            tool_calls_made: turn.tool_calls_made,
            tool_call_history: turn.history,
            conversation: turn.conversation,
            diagnostics: turn.diagnostics,
            usage: turn.usage,
        })
    }

    /// One step out of `AwaitingModel`.
    async fn advance(
        &self,
        turn: &mut Turn,
        sink: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<LoopState, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        if turn.round >= self.max_rounds {
            warn!(
                conversation_id = %turn.conversation.id,
                rounds = turn.round,
                "Round limit reached, returning partial answer"
            );
            turn.diagnostics.push(TurnDiagnostic::RoundLimit {
                max_rounds: self.max_rounds,
            });
            let message = self.partial_answer(&turn.conversation);
            let _ = sink.send(AgentStreamEvent::Chunk {
                content: message.content.clone(),
            });
            turn.conversation.push(message.clone());
            return Ok(LoopState::Terminal {
                message,
                outcome: TurnOutcome::RoundLimit,
            });
        }

        turn.round += 1;
        debug!(conversation_id = %turn.conversation.id, round = turn.round, "Agent loop round");

        let request = ProviderRequest {
            model: turn.model.clone(),
            messages: turn.conversation.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools().definitions(),
            stream: true,
            custom_fields: None,
            api_key: turn.dispatch.api_key.clone(),
        };

        let reassembled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = self.model_round(request, sink) => result?,
        };

        let ReassembledMessage {
            message,
            usage,
            diagnostics,
        } = reassembled;
        turn.diagnostics.extend(diagnostics.into_iter().map(|diagnostic| TurnDiagnostic::Reassembly {
            round: turn.round,
            diagnostic,
        }));
        turn.usage = add_usage(turn.usage.take(), usage);

        if !message.has_tool_calls() {
            turn.conversation.push(message.clone());
            return Ok(LoopState::Terminal {
                message,
                outcome: TurnOutcome::Completed,
            });
        }

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let results = self.dispatcher.dispatch(&message.tool_calls, &turn.dispatch).await;
        turn.tool_calls_made += results.len();

        let result_messages: Vec<Message> = results.into_iter().map(ToolResult::into_message).collect();
        turn.history.record_round(&message, &result_messages);
        turn.conversation.push(message);
        turn.conversation.extend(result_messages);

        Ok(LoopState::AwaitingModel)
    }

    async fn model_round(
        &self,
        request: ProviderRequest,
        sink: &EventSender,
    ) -> Result<ReassembledMessage, AgentError> {
        let mut stream = self.provider.stream(request).await?;
        reassemble(&mut stream, Some(sink.clone())).await
    }

    /// The best answer available when the round limit cuts a request short:
    /// whatever the model last said, plus a note.
    fn partial_answer(&self, conversation: &Conversation) -> Message {
        let last_text = conversation
            .messages
            .iter()
            .rev()
            .take_while(|m| m.role != Role::User)
            .find(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
            .map(|m| m.content.trim().to_string());

        let note = format!(
            "I've reached the maximum number of tool-calling rounds ({}) for this request. \
             Please provide further guidance.",
            self.max_rounds
        );
        match last_text {
            Some(text) => Message::assistant(format!("{text}\n\n{note}")),
            None => Message::assistant(note),
        }
    }
}

fn add_usage(total: Option<Usage>, round: Option<Usage>) -> Option<Usage> {
    match (total, round) {
        (Some(a), Some(b)) => Some(Usage {
            prompt_tokens: a.prompt_tokens + b.prompt_tokens,
            completion_tokens: a.completion_tokens + b.completion_tokens,
            total_tokens: a.total_tokens + b.total_tokens,
        }),
        (a, b) => a.or(b),
    }
}
