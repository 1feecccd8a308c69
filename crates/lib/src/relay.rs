//! Completion relay: one query in, one `CompletionOutcome` out.
//!
//! Every failure of the completion call (transport, status, body, empty
//! candidates, timeout) ends up as `CompletionOutcome::Failure`; nothing propagates.

use crate::config::CompletionConfig;
use crate::llm::{CompletionService, LlmError};
use std::time::Duration;

/// Why a completion produced no usable reply. Logged, never shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum CompletionFailure {
    #[error(transparent)]
    Service(#[from] LlmError),
    #[error("completion returned no candidates")]
    NoCandidates,
    #[error("first completion candidate has no text")]
    EmptyCandidate,
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug)]
pub enum CompletionOutcome {
    Success { text: String },
    Failure { cause: CompletionFailure },
}

impl CompletionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompletionOutcome::Success { .. })
    }
}

/// Fixed request shape applied to every query.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl From<&CompletionConfig> for RelaySettings {
    fn from(c: &CompletionConfig) -> Self {
        Self {
            system_prompt: c.system_prompt.clone(),
            max_tokens: c.max_tokens,
            timeout: Duration::from_secs(c.timeout_secs),
        }
    }
}

/// Built once at startup and shared with the dispatcher.
pub struct CompletionRelay<S> {
    service: S,
    settings: RelaySettings,
}

impl<S: CompletionService> CompletionRelay<S> {
    pub fn new(service: S, settings: RelaySettings) -> Self {
        Self { service, settings }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Send `query` as the single user turn. Empty queries are forwarded as-is.
    pub async fn complete(&self, query: &str) -> CompletionOutcome {
        match self.try_complete(query).await {
            Ok(text) => CompletionOutcome::Success { text },
            Err(cause) => CompletionOutcome::Failure { cause },
        }
    }

    async fn try_complete(&self, query: &str) -> Result<String, CompletionFailure> {
        let call = self.service.create_completion(
            &self.settings.system_prompt,
            query,
            self.settings.max_tokens,
        );
        let completion = tokio::time::timeout(self.settings.timeout, call)
            .await
            .map_err(|_| CompletionFailure::Timeout(self.settings.timeout))??;
        let first = completion
            .candidates
            .into_iter()
            .next()
            .ok_or(CompletionFailure::NoCandidates)?;
        match first.text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(CompletionFailure::EmptyCandidate),
        }
    }
}
