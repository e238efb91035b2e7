//! The tool-calling orchestration loop.
//!
//! One inbound request runs as:
//!
//! 1. **Prepare** the conversation (system prompt, prior turns, carried-over
//!    tool-call history)
//! 2. **Stream** a model response and reassemble its fragments
//! 3. **If tool calls**: dispatch them concurrently, append the assistant
//!    message and every result, loop back to step 2
//! 4. **If text only**: return the answer to the host
//!
//! The loop stops when the model answers without tools, the round limit is
//! reached, or the request is cancelled.

pub mod dispatcher;
pub mod history;
pub mod loop_runner;
pub mod prompts;
pub mod reassembler;

#[cfg(test)]
mod test_helpers;

pub use dispatcher::{DispatchContext, Dispatcher};
pub use history::{HistoryError, ToolCallHistory, prepare_conversation, validate_tool_messages};
pub use loop_runner::{AgentLoop, LoopState, TurnDiagnostic, TurnInput, TurnOutcome, TurnOutput};
pub use reassembler::{ReassembledMessage, Reassembler, ReassemblyDiagnostic, reassemble};
