//! # Tooloop Core
//!
//! Domain types, traits, and error definitions for the Tooloop agent.
//! This crate has **no framework dependencies**; it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping model backends and tools via configuration
//! - Easy testing with scripted providers and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod stream_event;
pub mod tool;
pub mod trace;

// Re-export key types at crate root for ergonomics
pub use error::{AgentError, Error, ProviderError, Result, ToolError};
pub use message::{Attachment, Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolCallDelta, ToolDefinition, Usage};
pub use stream_event::{AgentStreamEvent, EventReceiver, EventSender, event_channel};
pub use tool::{Tool, ToolCall, ToolContext, ToolRegistry, ToolResult};
pub use trace::TraceStage;
