//! Store clients for the hosted row backend
//!
//! Persistence is delegated to a hosted backend-as-a-service. The core only
//! relies on row-level `insert`, `select ... eq ... order` and `update`
//! operations, expressed here as two narrow traits: one for user memories,
//! one for conversations and their append-only message log. `RestStore`
//! talks to the hosted backend; `InMemoryStore` backs tests and keyless
//! local runs.

pub mod auth;
pub mod memory;
pub mod rest;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{tool_calls_from_row, Conversation, Role, ToolCall};

pub use auth::{AuthClient, Session};
pub use memory::InMemoryStore;
pub use rest::RestStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend rejected the call ({status}): {body}")]
    Backend { status: u16, body: String },

    #[error("unexpected row shape: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Memory categories accepted at the schema level. Free text outside these
/// four values is rejected when tool arguments are decoded, nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Preference,
    Objectif,
    Connaissance,
    Autre,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Preference => "preference",
            MemoryKind::Objectif => "objectif",
            MemoryKind::Connaissance => "connaissance",
            MemoryKind::Autre => "autre",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored user memory. Accumulates indefinitely; there is no update or
/// dedup path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub content: String,
    pub kind: MemoryKind,
}

/// A stored message row with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, deserialize_with = "tool_calls_from_row")]
    pub tool_calls: Option<Vec<ToolCall>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Memories for a user, most recent first.
    async fn memories_for_user(&self, user_id: &str) -> Result<Vec<Memory>, StoreError>;

    async fn save_memory(&self, memory: NewMemory) -> Result<Memory, StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, StoreError>;

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Conversations for a user, most recently updated first.
    async fn conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;

    /// Bump `updated_at` after an assistant turn.
    async fn touch_conversation(&self, id: &str) -> Result<(), StoreError>;

    async fn save_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError>;

    /// Messages of a conversation, ascending by `created_at`.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError>;
}
