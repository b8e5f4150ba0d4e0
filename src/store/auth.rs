//! Auth code exchange
//!
//! The email-confirmation callback hands us an authorization code; the
//! backend's auth endpoint exchanges it for a session. Nothing else about
//! auth lives in this service.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;

use super::StoreError;

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

pub struct AuthClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &Config) -> Option<Self> {
        match (&config.supabase_url, &config.supabase_anon_key) {
            (Some(url), Some(key)) => Some(Self::new(url, key)),
            _ => None,
        }
    }

    /// Exchange an authorization code for a session.
    pub async fn exchange_code(&self, code: &str) -> Result<Session, StoreError> {
        let response = self
            .client
            .post(format!(
                "{}/auth/v1/token?grant_type=pkce",
                self.base_url
            ))
            .header("apikey", &self.api_key)
            .json(&json!({ "auth_code": code }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_decodes_minimal_payload() {
        let session: Session =
            serde_json::from_str(r#"{"access_token": "jwt"}"#).unwrap();
        assert_eq!(session.access_token, "jwt");
        assert!(session.refresh_token.is_none());
    }
}
