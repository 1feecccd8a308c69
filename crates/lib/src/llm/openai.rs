//! OpenAI-compatible chat completions client (`POST {base_url}/chat/completions`).
//!
//! Non-streaming only. The request is always `[system, user]` with `max_tokens` set.

use crate::llm::{Candidate, Completion, CompletionService, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for an OpenAI-compatible completion endpoint. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: Option<String>, api_key: String, model: String) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn create_completion(
        &self,
        system_prompt: &str,
        user_text: &str,
        max_tokens: u32,
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAiChatRequest {
            model: &self.model,
            messages: vec![
                OpenAiMessage::System {
                    content: system_prompt,
                },
                OpenAiMessage::User { content: user_text },
            ],
            max_tokens,
        };
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let text = res.text().await?;
        let data: OpenAiChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Malformed(e.to_string()))?;
        Ok(Completion {
            candidates: data
                .choices
                .unwrap_or_default()
                .into_iter()
                .map(|c| Candidate {
                    text: c.message.and_then(|m| m.content),
                })
                .collect(),
        })
    }
}

// --- OpenAI wire types ---

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum OpenAiMessage<'a> {
    System { content: &'a str },
    User { content: &'a str },
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Option<Vec<OpenAiChoice>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}
