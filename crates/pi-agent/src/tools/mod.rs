//! Tool registry and bounded-concurrency executor (spec.md §4.C).

pub mod context;
pub mod executor;
pub mod registry;

pub use context::{ProgressUpdate, Tool, ToolContext, ToolError, ToolOutcome, ToolResultBlock};
pub use executor::{ToolCallRequest, ToolCallResult, ToolExecutor};
pub use registry::ToolRegistry;
