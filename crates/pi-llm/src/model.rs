//! Canonical content-block and usage types shared by every provider adapter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which wire family an adapter speaks. Used to decide whether a message
/// can be replayed verbatim (same provider) or must be normalised
/// (cross-provider, see [`crate::normalize::normalize_for_provider`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
}

/// Which API shape a model is served through. Two models can share a
/// [`Provider`] but speak different `Api`s (e.g. OpenAI completions vs.
/// OpenAI responses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Api {
    Completions,
    Responses,
    Anthropic,
    Gemini,
}

/// A single content block inside a message.
///
/// `Text` and `Thinking` carry an opaque, provider-scoped `signature` that
/// MUST be replayed verbatim on the next request to the *same* provider and
/// MUST be dropped (and, for `Thinking`, rewritten to `Text`) when the next
/// request targets a different provider. See
/// [`crate::normalize::normalize_for_provider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    Image {
        data: String,
        mime_type: String,
    },
}

impl ContentBlock {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentBlock::Text {
            text: text.into(),
            signature: None,
        }
    }

    pub fn as_tool_call(&self) -> Option<(&str, &str, &Value)> {
        match self {
            ContentBlock::ToolCall {
                id,
                name,
                arguments,
            } => Some((id, name, arguments)),
            _ => None,
        }
    }

    /// Rewrite a `Thinking` block bound for a different provider into the
    /// `<thinking>...</thinking>` text form required by spec.md §4.A, and
    /// strip opaque signatures from any block crossing providers.
    pub fn for_cross_provider(&self) -> ContentBlock {
        match self {
            ContentBlock::Thinking { thinking, .. } => ContentBlock::Text {
                text: format!("<thinking>\n{thinking}\n</thinking>"),
                signature: None,
            },
            ContentBlock::Text { text, .. } => ContentBlock::Text {
                text: text.clone(),
                signature: None,
            },
            other => other.clone(),
        }
    }
}

/// Cumulative token usage for one assistant message (not per-turn, per
/// spec.md §3). Cost is provider-reported only (spec.md §1 Non-goals:
/// no client-side cost table) and lives wherever a provider adapter
/// chooses to surface it, not on this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

/// Reasoning effort, mapped per-provider by each adapter (spec.md §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Anthropic thinking-token budget table from spec.md §4.B.
    pub fn anthropic_budget_tokens(self) -> u32 {
        match self {
            ReasoningEffort::Low => 2_048,
            ReasoningEffort::Medium => 8_192,
            ReasoningEffort::High => 24_576,
        }
    }

    /// Gemini dynamic-thinking budget: -1 means "let the model decide",
    /// otherwise a proportional budget derived from the effort tier.
    pub fn gemini_budget(self) -> i64 {
        match self {
            ReasoningEffort::Low => 1_024,
            ReasoningEffort::Medium => 8_192,
            ReasoningEffort::High => -1,
        }
    }

    pub fn as_effort_str(self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}
