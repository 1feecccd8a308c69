//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatrelay/config.json`) and environment.
//! Secrets (Telegram bot token, completion API key) may live in either; env wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Env var for the Telegram bot token.
pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
/// Env var for the completion service API key.
pub const COMPLETION_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Channel settings (Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Completion service settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Fixed reply texts (apology, /start help).
    #[serde(default)]
    pub replies: RepliesConfig,

    /// Dispatch loop behavior.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// Bot API base URL. Overridden by TELEGRAM_API_BASE env when set.
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Long-poll timeout passed to getUpdates, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Upper bound for one Bot API call, added on top of the long-poll timeout for getUpdates.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TelegramChannelConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// OpenAI-compatible chat completions endpoint and request shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// API key. Overridden by OPENAI_API_KEY env when set.
    pub api_key: Option<String>,
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Output ceiling sent as `max_tokens` on every request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// System instruction sent as the first turn of every request.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Upper bound for one completion call; expiry counts as a failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_completion_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepliesConfig {
    /// Sent instead of the model reply when the completion call fails.
    #[serde(default = "default_apology")]
    pub apology: String,
    /// Sent in answer to `/start`.
    #[serde(default = "default_help")]
    pub help: String,
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            apology: default_apology(),
            help: default_help(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Process each message in its own task instead of one at a time.
    #[serde(default)]
    pub concurrent: bool,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer concisely, in the language the user writes in.".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_apology() -> String {
    "Ошибка, попробуйте снова.".to_string()
}

fn default_help() -> String {
    "Привет! Упомяните меня, ответьте на моё сообщение или начните сообщение с команды, например /ask, и я отвечу.".to_string()
}

/// Both secrets required to run the bot.
#[derive(Clone)]
pub struct Secrets {
    pub telegram_token: String,
    pub completion_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("telegram_token", &"<redacted>")
            .field("completion_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("missing required secrets: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    non_empty_env(TELEGRAM_TOKEN_ENV).or_else(|| non_empty(config.channels.telegram.bot_token.as_ref()))
}

/// Resolve the completion API key: env OPENAI_API_KEY overrides config.
pub fn resolve_completion_key(config: &Config) -> Option<String> {
    non_empty_env(COMPLETION_KEY_ENV).or_else(|| non_empty(config.completion.api_key.as_ref()))
}

/// Resolve the Telegram API base: env TELEGRAM_API_BASE overrides config.
pub fn resolve_telegram_api_base(config: &Config) -> String {
    non_empty_env("TELEGRAM_API_BASE")
        .unwrap_or_else(|| config.channels.telegram.api_base.clone())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve both secrets; reports every missing one at once.
pub fn resolve_secrets(config: &Config) -> Result<Secrets, SecretsError> {
    secrets_from(resolve_telegram_token(config), resolve_completion_key(config))
}

fn secrets_from(
    telegram_token: Option<String>,
    completion_key: Option<String>,
) -> Result<Secrets, SecretsError> {
    match (telegram_token, completion_key) {
        (Some(telegram_token), Some(completion_key)) => Ok(Secrets {
            telegram_token,
            completion_key,
        }),
        (t, k) => {
            let mut missing = Vec::new();
            if t.is_none() {
                missing.push(TELEGRAM_TOKEN_ENV);
            }
            if k.is_none() {
                missing.push(COMPLETION_KEY_ENV);
            }
            Err(SecretsError::Missing(missing))
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATRELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatrelay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path (or CHATRELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
