//! Structured error type for provider adapters.

use thiserror::Error;

/// Errors an adapter can raise while talking to a provider.
///
/// Every variant maps to one of the provider-agnostic stop reasons in
/// [`crate::events::StopReason`] via [`ProviderError::stop_reason`].
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider refused the request: {0}")]
    Refusal(String),

    #[error("malformed response from provider: {0}")]
    Malformed(String),

    #[error("request aborted")]
    Aborted,

    #[error("unsupported model/provider combination: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn stop_reason(&self) -> crate::events::StopReason {
        use crate::events::StopReason;
        match self {
            ProviderError::Transport(_) | ProviderError::Malformed(_) => StopReason::Error,
            ProviderError::Refusal(_) => StopReason::Safety,
            ProviderError::Aborted => StopReason::Aborted,
            ProviderError::Unsupported(_) => StopReason::Error,
        }
    }
}
