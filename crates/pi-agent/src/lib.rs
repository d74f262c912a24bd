//! Agent session runtime (spec.md §1): the turn scheduler, extension
//! dispatcher, tool executor and context compactor that sit on top of
//! `pi_llm`'s provider adapters. Wire transport, model routing and CLI/UI
//! concerns stay out of scope (spec.md "Non-goals").

pub mod compaction;
pub mod config;
pub mod error;
pub mod events;
pub mod extensions;
pub mod normalize;
pub mod rpc;
pub mod scheduler;
pub mod session;
pub mod tools;
pub mod transcript;

pub use compaction::{CompactionOutcome, ContextCompactor, RetryConfig, SimpleTokenEstimator, TokenEstimator};
pub use config::{ModelConfig, QueueMode, SessionConfig};
pub use error::AgentError;
pub use events::{EventBus, SessionEvent, SharedEventBus};
pub use extensions::{
    BranchOutcome, ExtensionDispatcher, ExtensionHandler, LoadedExtension, SlashCommandDef, ToolCallBlock,
};
pub use normalize::normalize_for_provider;
pub use scheduler::{SchedulerSettings, TurnScheduler};
pub use session::{BashResult, Session};
pub use tools::{ProgressUpdate, Tool, ToolCallRequest, ToolCallResult, ToolContext, ToolError, ToolExecutor, ToolOutcome, ToolRegistry, ToolResultBlock};
pub use transcript::{Message, Transcript};
