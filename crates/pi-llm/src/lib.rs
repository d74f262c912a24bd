//! Provider-agnostic streaming chat abstraction.
//!
//! This crate owns everything spec.md §4.A/§4.B calls "in scope": the
//! canonical content-block/usage model, the normalised streaming event
//! sequence every adapter emits, cancellation, best-effort partial-JSON
//! parsing for live tool-call argument previews, and the four concrete
//! provider adapters (Anthropic, OpenAI completions, OpenAI responses,
//! Gemini). Wire mechanics (HTTP, SSE framing, auth) stay behind the
//! [`providers::Transport`] seam and are out of scope.

pub mod cancel;
pub mod error;
pub mod events;
pub mod json_partial;
pub mod model;
pub mod providers;
pub mod tool_schema;

pub use cancel::CancelSignal;
pub use error::ProviderError;
pub use events::{AssistantMessage, AssistantMessageEvent, ContentBlockToolCall, StopReason};
pub use model::{Api, ContentBlock, Provider, ReasoningEffort, Usage};
pub use providers::{
    AdapterStream, ChatProvider, PromptConfig, PromptMessage, PromptRole, RawFrameStream,
    Transport,
};
pub use tool_schema::ToolDefinition;
