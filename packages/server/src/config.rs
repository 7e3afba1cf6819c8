use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub vector_rpc_url: String,
    pub vector_rpc_key: String,
    /// Public base URL images are served from. Doubles as the allow-list
    /// prefix for extracted references: nothing outside it ever reaches a
    /// client.
    pub image_base_url: String,
    pub allowed_origins: Vec<String>,
    pub suggestions_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Fails fast on anything required: a server that would silently run
    /// without an image allow-list or retrieval backend is worse than one
    /// that refuses to start.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let image_base_url = env::var("IMAGE_BASE_URL")
            .context("IMAGE_BASE_URL must be set")?;
        if !image_base_url.starts_with("http://") && !image_base_url.starts_with("https://") {
            anyhow::bail!("IMAGE_BASE_URL must be an absolute http(s) URL");
        }

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            openai_api_key: env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set")?,
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            chat_model: env::var("CHAT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            vector_rpc_url: env::var("VECTOR_RPC_URL")
                .context("VECTOR_RPC_URL must be set")?,
            vector_rpc_key: env::var("VECTOR_RPC_KEY")
                .context("VECTOR_RPC_KEY must be set")?,
            image_base_url,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|origin| origin.trim().to_string())
                        .filter(|origin| !origin.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            suggestions_enabled: env::var("SUGGESTIONS_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}
