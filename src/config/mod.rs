//! Application configuration

pub mod prompts;

use std::env;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_base_url: String,
    pub gemini_base_url: String,
    pub openai_model: String,
    pub gemini_model: String,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            gemini_api_key: env::var("GEMINI_API_KEY").ok(),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4.1-nano".into()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-flash-002".into()),
            supabase_url: env::var("SUPABASE_URL").ok(),
            supabase_anon_key: env::var("SUPABASE_ANON_KEY").ok(),
            environment: env::var("ETUDE_ENV").unwrap_or_else(|_| "development".into()),
        })
    }

    /// Whether 500 bodies should suppress provider detail.
    pub fn production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 3000,
            openai_api_key: None,
            gemini_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            gemini_base_url: "https://generativelanguage.googleapis.com".into(),
            openai_model: "gpt-4.1-nano".into(),
            gemini_model: "gemini-1.5-flash-002".into(),
            supabase_url: None,
            supabase_anon_key: None,
            environment: "development".into(),
        }
    }

    #[test]
    fn production_flag_follows_environment() {
        let mut config = base_config();
        assert!(!config.production());

        config.environment = "production".into();
        assert!(config.production());
    }
}
