use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub services: ServicesConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Endpoints and tuning for the three external services.
#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    /// Base URL of the extraction/embedding service (`POST {url}/extract`).
    pub extraction_url: String,
    /// Base URL of the vector index service (`POST {url}/add_chunks`, `POST {url}/search`).
    pub index_url: String,
    /// Full URL of the chat-completion endpoint.
    pub completion_url: String,
    /// Model name sent with every completion request.
    pub completion_model: String,
    /// Server-wide fallback API key. A per-request key always wins over this.
    #[serde(default)]
    pub completion_api_key: Option<String>,
    /// Per-call timeout applied to every external request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Hard cap on chunks retrieved per query, not a similarity threshold.
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Length bound for the snippet shown in source attributions.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    /// Length bound for the context excerpt used in a degraded answer.
    #[serde(default = "default_degraded_excerpt_chars")]
    pub degraded_excerpt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            snippet_chars: default_snippet_chars(),
            degraded_excerpt_chars: default_degraded_excerpt_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_k() -> i64 {
    5
}
fn default_snippet_chars() -> usize {
    50
}
fn default_degraded_excerpt_chars() -> usize {
    500
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Environment fallback for the server-wide completion key
    if config.services.completion_api_key.is_none() {
        if let Ok(key) = std::env::var("DOCCHAT_API_KEY") {
            if !key.trim().is_empty() {
                config.services.completion_api_key = Some(key);
            }
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.snippet_chars == 0 {
        anyhow::bail!("retrieval.snippet_chars must be > 0");
    }
    if config.retrieval.degraded_excerpt_chars == 0 {
        anyhow::bail!("retrieval.degraded_excerpt_chars must be > 0");
    }
    if config.services.timeout_secs == 0 {
        anyhow::bail!("services.timeout_secs must be > 0");
    }

    for (name, url) in [
        ("services.extraction_url", &config.services.extraction_url),
        ("services.index_url", &config.services.index_url),
        ("services.completion_url", &config.services.completion_url),
    ] {
        if url.trim().is_empty() {
            anyhow::bail!("{} must not be empty", name);
        }
    }

    if config.services.completion_model.trim().is_empty() {
        anyhow::bail!("services.completion_model must not be empty");
    }

    Ok(())
}
