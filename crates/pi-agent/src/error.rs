//! Structured error taxonomy for the agent crate (spec.md §7), grounded in
//! the teacher's `agent/src/error.rs::AgentError` (a `thiserror` enum,
//! `Clone + Serialize + Deserialize` so it can cross the RPC boundary).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AgentError {
    #[error("transport error: {0}")]
    ProviderTransport(String),

    #[error("provider refused: {0}")]
    ProviderRefusal(String),

    #[error("busy: a turn is already in progress")]
    Busy,

    #[error("no API key configured for provider {provider}")]
    NoApiKey { provider: String },

    #[error("session hook '{handler}' timed out after {timeout_ms}ms")]
    HookTimeout { handler: String, timeout_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(e: anyhow::Error) -> Self {
        AgentError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Internal(e.to_string())
    }
}

impl From<pi_llm::ProviderError> for AgentError {
    fn from(e: pi_llm::ProviderError) -> Self {
        match e {
            pi_llm::ProviderError::Transport(msg) => AgentError::ProviderTransport(msg),
            pi_llm::ProviderError::Refusal(msg) => AgentError::ProviderRefusal(msg),
            other => AgentError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_has_expected_message() {
        assert_eq!(
            AgentError::Busy.to_string(),
            "busy: a turn is already in progress"
        );
    }

    #[test]
    fn serde_round_trip() {
        let original = AgentError::NoApiKey {
            provider: "anthropic".into(),
        };
        let json = serde_json::to_string(&original).unwrap();
        let restored: AgentError = serde_json::from_str(&json).unwrap();
        assert_eq!(original.to_string(), restored.to_string());
    }
}
