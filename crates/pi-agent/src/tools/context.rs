//! The tool contract and execution context (spec.md §3/§4.C), grounded in
//! the teacher's `tools/context.rs::{Tool, ToolContext, ToolError}`.

use async_trait::async_trait;
use pi_llm::{CancelSignal, ToolDefinition};
use serde_json::Value;
use std::any::Any;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One block of a tool's result content. Spec.md §4.C §3 restricts this to
/// `Text` today, with `Image` reserved for future use.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResultBlock {
    Text(String),
    Image { data: String, mime_type: String },
}

/// The structured result of executing a tool (spec.md §3 `Tool.execute`).
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    pub content: Vec<ToolResultBlock>,
    pub details: Option<Value>,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultBlock::Text(text.into())],
            details: None,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultBlock::Text(text.into())],
            details: None,
            is_error: true,
        }
    }

    /// The canonical single-string `output` spec.md §4.C.4 requires for
    /// providers that take a single string: concatenation of the first
    /// text block.
    pub fn canonical_output(&self) -> String {
        self.content
            .iter()
            .find_map(|b| match b {
                ToolResultBlock::Text(t) => Some(t.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Progress-update callback a tool may invoke during execution (spec.md
/// §4.C.3 `onUpdate(partial)`).
pub type ProgressUpdate = Box<dyn Fn(String) + Send + Sync>;

/// Execution context handed to every tool call (spec.md §4.C.3): exposes
/// UI/session identity and a spawn handle, deliberately narrower than the
/// teacher's `ToolContext` since UI rendering is out of scope here.
#[async_trait]
pub trait ToolContext: Send + Sync {
    fn session_id(&self) -> &str;
    fn cwd(&self) -> Option<&std::path::Path>;
    fn as_any(&self) -> &dyn Any;
}

/// A registered, callable tool (spec.md §3 `Tool`).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    async fn execute(
        &self,
        call_id: &str,
        args: Value,
        on_update: Option<ProgressUpdate>,
        ctx: &dyn ToolContext,
        cancel: CancelSignal,
    ) -> Result<ToolOutcome, ToolError>;
}
