//! Terminal rendering of agent stream events.

use tooloop_core::stream_event::AgentStreamEvent;

/// Where a rendered piece of output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Answer text, printed without a trailing newline.
    Answer(String),
    /// Progress and diagnostics, one line on stderr.
    Status(String),
}

/// Render one event for a human reader. Returns `None` for events that
/// have nothing to show.
pub fn render(event: &AgentStreamEvent, show_stages: bool) -> Option<Line> {
    match event {
        AgentStreamEvent::Chunk { content } => Some(Line::Answer(content.clone())),
        AgentStreamEvent::ToolCall { name, input, .. } => {
            Some(Line::Status(format!("  [tool] {name} {input}")))
        }
        AgentStreamEvent::ToolResult { name, success, output, .. } => {
            if *success {
                Some(Line::Status(format!("  [tool] {name} done")))
            } else {
                Some(Line::Status(format!("  [tool] {name} failed: {output}")))
            }
        }
        AgentStreamEvent::StageContent { content, .. } if show_stages => {
            Some(Line::Status(content.trim_end().replace("\n\r", "\n")))
        }
        AgentStreamEvent::StageAttachment { attachment, .. } => {
            let title = attachment.title.as_deref().unwrap_or(&attachment.mime_type);
            Some(Line::Status(format!("  [attachment] {title}: {}", attachment.url)))
        }
        AgentStreamEvent::Done { usage, rounds, .. } => {
            let tokens = usage
                .as_ref()
                .map(|u| format!(", {} tokens", u.total_tokens))
                .unwrap_or_default();
            Some(Line::Status(format!("  ({rounds} model calls{tokens})")))
        }
        AgentStreamEvent::Error { message } => Some(Line::Status(format!("  [error] {message}"))),
        _ => None,
    }
}
