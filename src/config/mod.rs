//! Application configuration

pub mod prompts;

use std::env;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Gemini API key. Required; startup fails without it.
    pub gemini_api_key: String,
    /// Override for the Generative Language API endpoint.
    pub gemini_base_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let gemini_api_key = env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            gemini_api_key,
            gemini_base_url: env::var("GEMINI_BASE_URL").ok(),
        })
    }
}
