//! Normalised streaming events every provider adapter emits (spec.md §4.B).

use crate::model::{Api, ContentBlock, Provider, Usage};
use serde::{Deserialize, Serialize};

/// Provider-agnostic reason a turn's assistant response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Natural end of the model's response.
    Stop,
    /// The model hit its output token cap.
    Length,
    /// The model requested one or more tool calls.
    ToolUse,
    /// The provider refused to continue (safety).
    Safety,
    /// Transport or API failure.
    Error,
    /// The local `CancelSignal` fired mid-stream.
    Aborted,
}

/// The final, accumulated assistant message a provider stream resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    pub provider: Provider,
    pub api: Api,
    pub model: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
    pub error: Option<String>,
}

impl AssistantMessage {
    pub fn tool_calls(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(ContentBlock::as_tool_call)
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCall { .. }))
    }
}

/// One event in the normalised streaming sequence a `ChatProvider` yields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantMessageEvent {
    Start { model: String, provider: Provider },
    TextStart,
    TextDelta { content: String, delta: String },
    TextEnd { content: String },
    ThinkingStart,
    ThinkingDelta { content: String, delta: String },
    ThinkingEnd { content: String },
    ToolCall { tool_call: ContentBlockToolCall },
    Done { reason: StopReason, message: AssistantMessage },
    Error { message: String },
}

/// A `ToolCall` content block surfaced through the event stream; kept as a
/// distinct struct (rather than reusing [`ContentBlock`]) so the event enum
/// can't accidentally carry a `Text`/`Thinking`/`Image` variant here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlockToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}
