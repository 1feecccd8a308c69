//! Completion service abstraction and the OpenAI-compatible client.
//!
//! The relay only needs one call shape: a system instruction, one user turn and
//! an output ceiling. `CompletionService` is that seam so tests can swap the HTTP client out.

mod openai;

use async_trait::async_trait;

pub use openai::OpenAiClient;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion api error: {0}")]
    Api(String),
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

/// One generated alternative. `text` is None when the service returned no content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: Option<String>,
}

/// Result of a completion call, candidates in service order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub candidates: Vec<Candidate>,
}

/// A hosted language-completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn create_completion(
        &self,
        system_prompt: &str,
        user_text: &str,
        max_tokens: u32,
    ) -> Result<Completion, LlmError>;
}
