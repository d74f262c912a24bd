//! Session configuration (spec.md §6 "Settings"), grounded in the
//! teacher's `config.rs`: a `serde`+`toml` struct with `#[serde(default)]`
//! fields and free-standing `default_*` functions per field, loadable from
//! a file or built programmatically.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_PARALLEL_TOOLS: usize = 4;
pub const DEFAULT_COMPACTION_KEEP_TAIL: usize = 4;
pub const DEFAULT_MAX_TOKENS: u32 = 4_096;

fn default_hook_timeout_ms() -> u64 {
    DEFAULT_HOOK_TIMEOUT_MS
}

fn default_max_parallel_tools() -> usize {
    DEFAULT_MAX_PARALLEL_TOOLS
}

fn default_compaction_keep_tail() -> usize {
    DEFAULT_COMPACTION_KEEP_TAIL
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_queue_mode() -> QueueMode {
    QueueMode::OneAtATime
}

/// Queueing policy for `prompt()` calls that arrive while a turn is
/// running (spec.md §4.E "Input queue").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    All,
    OneAtATime,
}

/// Which model a session talks to (spec.md §4.B), independent of the
/// provider-adapter plumbing that constructs a live `ChatProvider` from it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub reasoning_effort: Option<String>,
}

/// Top-level session configuration, loadable from `~/.pi/agent/settings.json`
/// merged with per-workspace/explicit overrides (spec.md §6 "Settings").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub model: ModelConfig,
    pub system_prompt: String,

    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,

    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    #[serde(default = "default_compaction_keep_tail")]
    pub compaction_keep_tail: usize,

    #[serde(default = "default_queue_mode")]
    pub queue_mode: QueueMode,

    /// Additional extension paths beyond the standard discovery locations
    /// (spec.md §6 "Extension discovery paths").
    #[serde(default)]
    pub additional_extension_paths: Vec<PathBuf>,
}

impl SessionConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: ModelConfig {
                provider: provider.into(),
                model: model.into(),
                max_tokens: DEFAULT_MAX_TOKENS,
                reasoning_effort: None,
            },
            system_prompt: String::new(),
            hook_timeout_ms: DEFAULT_HOOK_TIMEOUT_MS,
            max_parallel_tools: DEFAULT_MAX_PARALLEL_TOOLS,
            compaction_keep_tail: DEFAULT_COMPACTION_KEEP_TAIL,
            queue_mode: QueueMode::OneAtATime,
            additional_extension_paths: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn reasoning_effort(&self) -> Option<pi_llm::ReasoningEffort> {
        match self.model.reasoning_effort.as_deref() {
            Some("low") => Some(pi_llm::ReasoningEffort::Low),
            Some("medium") => Some(pi_llm::ReasoningEffort::Medium),
            Some("high") => Some(pi_llm::ReasoningEffort::High),
            _ => None,
        }
    }
}
