//! `tooloop chat`: interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tooloop_agent::{AgentLoop, ToolCallHistory, TurnInput, TurnOutcome, TurnOutput};
use tooloop_config::AppConfig;
use tooloop_core::error::AgentError;
use tooloop_core::message::{ConversationId, Message};
use tooloop_core::stream_event::{AgentStreamEvent, EventReceiver, event_channel};
use crate::render::{Line, render};

pub struct ChatOptions {
    pub deployment: Option<String>,
    pub events: bool,
    pub stages: bool,
}

/// What one chat carries from request to request.
///
/// Only user and final assistant messages are kept as history; the tool
/// calls of the latest request travel separately and are spliced back in
/// by the agent.
#[derive(Debug, Default)]
struct Session {
    conversation_id: ConversationId,
    messages: Vec<Message>,
    tool_call_history: ToolCallHistory,
}

impl Session {
    fn turn(&self, text: &str, config: &AppConfig, deployment: Option<&str>) -> TurnInput {
        let mut messages = self.messages.clone();
        messages.push(Message::user(text));
        let mut input = TurnInput::new(messages)
            .with_history(self.tool_call_history.clone())
            .with_conversation_id(self.conversation_id.clone());
        if let Some(key) = &config.api_key {
            input = input.with_api_key(key.clone());
        }
        if let Some(model) = deployment {
            input = input.with_model(model);
        }
        input
    }

    fn record(&mut self, text: &str, output: TurnOutput) {
        self.messages.push(Message::user(text));
        self.messages.push(output.message);
        self.tool_call_history = output.tool_call_history;
    }
}

pub async fn run(message: Option<String>, opts: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  WARNING: No API key configured.");
        eprintln!("  Set TOOLOOP_API_KEY (or OPENAI_API_KEY), or add `api_key` to");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!("  Continuing without one; this only works with open endpoints.");
        eprintln!();
    }

    let provider = tooloop_providers::build_from_config(&config)?;
    let tools = Arc::new(tooloop_tools::build_registry(&config, provider.clone()).await?);
    let agent = AgentLoop::from_config(&config, provider, tools)?;

    let mut session = Session::default();

    if let Some(text) = message {
        ask(&agent, &config, &opts, &mut session, &text).await?;
        return Ok(());
    }

    println!();
    println!("  Tooloop interactive mode");
    println!();
    println!("  Endpoint:    {}", config.endpoint);
    println!("  Deployment:  {}", opts.deployment.as_deref().unwrap_or(&config.deployment));
    println!("  Tools:       {}", agent.tools().names().join(", "));
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C cancels a running request; 'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }

        if let Err(e) = ask(&agent, &config, &opts, &mut session, text).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Run one request, streaming its events to the terminal. Ctrl+C cancels
/// the request without leaving the chat.
async fn ask(
    agent: &AgentLoop,
    config: &AppConfig,
    opts: &ChatOptions,
    session: &mut Session,
    text: &str,
) -> Result<(), AgentError> {
    let input = session.turn(text, config, opts.deployment.as_deref());
    let (tx, rx) = event_channel();
    let cancel = CancellationToken::new();

    let printer = tokio::spawn(print_events(rx, opts.events, opts.stages));

    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = agent.run(input, tx, cancel).await;
    watcher.abort();
    // The sender is gone once `run` returns, so the printer drains and ends.
    let _ = printer.await;

    match result {
        Ok(output) => {
            if output.outcome == TurnOutcome::RoundLimit {
                eprintln!("  [warn] answer is partial: the tool-call round limit was reached");
            }
            for diagnostic in &output.diagnostics {
                tracing::debug!(%diagnostic, "Request diagnostic");
            }
            session.record(text, output);
            Ok(())
        }
        Err(AgentError::Cancelled) => {
            eprintln!("  [cancelled]");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn print_events(mut rx: EventReceiver, as_json: bool, show_stages: bool) {
    let mut answered = false;
    while let Some(event) = rx.recv().await {
        if as_json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
            continue;
        }

        if matches!(event, AgentStreamEvent::Done { .. }) && answered {
            println!();
        }
        match render(&event, show_stages) {
            Some(Line::Answer(text)) => {
                if !answered {
                    print!("  Assistant > ");
                    answered = true;
                }
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            Some(Line::Status(text)) => eprintln!("{text}"),
            None => {}
        }
    }
}
