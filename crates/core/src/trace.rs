//! Per-call trace stages.
//!
//! Every dispatched tool call gets its own [`TraceStage`]: an append-only
//! side channel where the call's inputs, intermediate steps and output can
//! be shown to the user without becoming part of the answer. A stage is
//! finalized exactly once. Callers close it explicitly; if the handle is
//! dropped first (panic, cancellation) it closes itself as failed.

use std::sync::atomic::{AtomicBool, Ordering};
use crate::message::Attachment;
use crate::stream_event::{AgentStreamEvent, EventSender};

pub struct TraceStage {
    id: String,
    name: String,
    sink: Option<EventSender>,
    closed: AtomicBool,
}

impl TraceStage {
    /// Open a stage on the host's event sink.
    pub fn open(sink: EventSender, id: impl Into<String>, name: impl Into<String>) -> Self {
        let stage = Self {
            id: id.into(),
            name: name.into(),
            sink: Some(sink),
            closed: AtomicBool::new(false),
        };
        stage.emit(AgentStreamEvent::StageOpened {
            stage_id: stage.id.clone(),
            name: stage.name.clone(),
        });
        stage
    }

    /// A stage with nowhere to write. Used when no sink is attached.
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            sink: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append text. Ignored once the stage is closed.
    pub fn append(&self, content: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        self.emit(AgentStreamEvent::StageContent {
            stage_id: self.id.clone(),
            content: content.into(),
        });
    }

    /// Attach a file or image. Ignored once the stage is closed.
    pub fn add_attachment(&self, attachment: Attachment) {
        if self.is_closed() {
            return;
        }
        self.emit(AgentStreamEvent::StageAttachment {
            stage_id: self.id.clone(),
            attachment,
        });
    }

    /// Finalize the stage. Returns `false` if it was already closed.
    pub fn close(&self, success: bool) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.emit(AgentStreamEvent::StageClosed {
            stage_id: self.id.clone(),
            success,
        });
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: AgentStreamEvent) {
        if let Some(sink) = &self.sink {
            // A host that stopped listening is not an error for the tool.
            let _ = sink.send(event);
        }
    }
}

impl Drop for TraceStage {
    fn drop(&mut self) {
        if !self.is_closed() {
            tracing::debug!(stage = %self.id, "Trace stage dropped while open, closing as failed");
            self.close(false);
        }
    }
}

impl std::fmt::Debug for TraceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceStage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
