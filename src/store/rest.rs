//! Hosted row-store client
//!
//! Thin REST client for the backend-as-a-service row API. Every operation
//! is one of `insert` (`POST /rest/v1/{table}`), `select ... eq ... order`
//! (`GET` with query filters) or `update` (`PATCH` with an `id` filter),
//! authenticated with the project API key.

use chrono::Utc;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::Config;
use crate::conversation::Conversation;

use super::{
    ConversationStore, Memory, MemoryStore, MessageRecord, NewMemory, NewMessage, StoreError,
};

use async_trait::async_trait;

pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build a store from the environment config, if the backend is
    /// configured at all.
    pub fn from_config(config: &Config) -> Option<Self> {
        match (&config.supabase_url, &config.supabase_anon_key) {
            (Some(url), Some(key)) => Some(Self::new(url, key)),
            _ => None,
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    async fn insert<T: DeserializeOwned>(&self, table: &str, row: Value) -> Result<T, StoreError> {
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row)
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

        let value: Value = serde_json::from_str(&body)?;
        Ok(serde_json::from_value(first_row(value))?)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self
            .request(Method::GET, table)
            .query(&[("select", "*")])
            .query(filters)
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

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let response = self
            .request(Method::PATCH, table)
            .query(&[("id", format!("eq.{}", id))])
            .json(&patch)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Inserts with `return=representation` come back as an array of one row.
fn first_row(value: Value) -> Value {
    match value {
        Value::Array(mut rows) if !rows.is_empty() => rows.remove(0),
        other => other,
    }
}

#[async_trait]
impl MemoryStore for RestStore {
    async fn memories_for_user(&self, user_id: &str) -> Result<Vec<Memory>, StoreError> {
        self.select(
            "memories",
            &[
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.desc".into()),
            ],
        )
        .await
    }

    async fn save_memory(&self, memory: NewMemory) -> Result<Memory, StoreError> {
        self.insert(
            "memories",
            json!({
                "user_id": memory.user_id,
                "content": memory.content,
                "type": memory.kind,
                "created_at": Utc::now(),
            }),
        )
        .await
    }
}

#[async_trait]
impl ConversationStore for RestStore {
    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        self.insert(
            "conversations",
            json!({
                "user_id": user_id,
                "created_at": now,
                "updated_at": now,
            }),
        )
        .await
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let rows: Vec<Conversation> = self
            .select("conversations", &[("id", format!("eq.{}", id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        self.select(
            "conversations",
            &[
                ("user_id", format!("eq.{}", user_id)),
                ("order", "updated_at.desc".into()),
            ],
        )
        .await
    }

    async fn touch_conversation(&self, id: &str) -> Result<(), StoreError> {
        self.update("conversations", id, json!({ "updated_at": Utc::now() }))
            .await
    }

    async fn save_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
        let mut row = json!({
            "conversation_id": message.conversation_id,
            "role": message.role,
            "content": message.content,
            "created_at": Utc::now(),
        });
        if let Some(calls) = &message.tool_calls {
            row["tool_calls"] = serde_json::to_value(calls)?;
        }
        self.insert("messages", row).await
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        self.select(
            "messages",
            &[
                ("conversation_id", format!("eq.{}", conversation_id)),
                ("order", "created_at.asc".into()),
            ],
        )
        .await
    }
}
