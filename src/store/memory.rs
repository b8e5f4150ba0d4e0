//! In-process store
//!
//! Implements both store traits over plain vectors. Used by unit tests and
//! by local runs without backend credentials. Failures can be injected to
//! exercise the degraded paths (memory fetch skipped, memory save
//! swallowed).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::conversation::Conversation;

use super::{
    ConversationStore, Memory, MemoryStore, MessageRecord, NewMemory, NewMessage, StoreError,
};

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    fail_memory_reads: AtomicBool,
    fail_memory_writes: AtomicBool,
}

#[derive(Default)]
struct Inner {
    conversations: Vec<Conversation>,
    messages: Vec<MessageRecord>,
    memories: Vec<Memory>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_memory_reads(&self, fail: bool) {
        self.fail_memory_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_memory_writes(&self, fail: bool) {
        self.fail_memory_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn memories_for_user(&self, user_id: &str) -> Result<Vec<Memory>, StoreError> {
        if self.fail_memory_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory reads are failing".into()));
        }

        let inner = self.inner.lock().expect("store lock poisoned");
        let mut memories: Vec<Memory> = inner
            .memories
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(memories)
    }

    async fn save_memory(&self, memory: NewMemory) -> Result<Memory, StoreError> {
        if self.fail_memory_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory writes are failing".into()));
        }

        let stored = Memory {
            id: Uuid::new_v4().to_string(),
            user_id: memory.user_id,
            content: memory.content,
            kind: memory.kind,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.memories.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
            title: None,
        };
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut conversations: Vec<Conversation> = inner
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn touch_conversation(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if let Some(conversation) = inner.conversations.iter_mut().find(|c| c.id == id) {
            conversation.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn save_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            tool_calls: message.tool_calls,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.messages.push(record.clone());
        Ok(record)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut messages: Vec<MessageRecord> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }
}
