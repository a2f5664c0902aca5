use std::time::Duration;

use anyhow::Context;

const DEFAULT_COMPLETION_BASE_URL: &str = "https://api.siliconflow.cn/v1";
const DEFAULT_MODEL: &str = "zai-org/GLM-4.5-Air";
const DEFAULT_SEARCH_BASE_URL: &str = "https://api.bochaai.com/v1";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
                                     Be concise, accurate, and friendly. \
                                     If you don't know something, say so.";

/// Process configuration, read once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub completion: CompletionConfig,
    pub search: SearchConfig,
    /// Store the reasoning trace next to the answer instead of dropping it.
    pub persist_thinking: bool,
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    /// Longest wait for the first response and for each body read after it.
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: String,
    pub result_count: usize,
    pub timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set (copy .env.example to .env)")?;
        let api_key = std::env::var("COMPLETION_API_KEY")
            .context("COMPLETION_API_KEY must be set")?;

        Ok(Self {
            database_url,
            port: parse_var("PORT", 8080)?,
            completion: CompletionConfig {
                base_url: var_or("COMPLETION_API_BASE_URL", DEFAULT_COMPLETION_BASE_URL),
                api_key,
                model: var_or("COMPLETION_MODEL", DEFAULT_MODEL),
                system_prompt: var_or("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
                idle_timeout: Duration::from_secs(parse_var("COMPLETION_TIMEOUT_SECS", 60)?),
            },
            search: SearchConfig {
                base_url: var_or("SEARCH_API_BASE_URL", DEFAULT_SEARCH_BASE_URL),
                api_key: var_or("SEARCH_API_KEY", ""),
                result_count: 5,
                timeout: Duration::from_secs(parse_var("SEARCH_TIMEOUT_SECS", 20)?),
            },
            persist_thinking: parse_var("PERSIST_THINKING", false)?,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}
