//! Chat orchestrator
//!
//! The core request pipeline: load memories, build the server-owned system
//! prompt, pick a provider, run the streaming completion with the tool
//! schemas attached, execute tool calls as the model asks for them, and
//! stream everything back as data-stream frames. Failover retries the
//! whole turn once against the secondary provider when the primary fails
//! with the model-not-found signature before any frame has flowed.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::config::prompts;
use crate::conversation::{Message, Role, ToolCall};
use crate::providers::{ChatProvider, ProviderError, ProviderEvent, ProviderSet, ToolInvocation};
use crate::store::MemoryStore;
use crate::tools::ToolRegistry;

use super::wire::StreamFrame;

/// Cap on tool-invocation rounds per turn, so a model that keeps asking
/// for tools without answering cannot loop forever.
pub const MAX_TOOL_ROUNDS: usize = 5;

pub type ChatStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

/// One chat turn as the client sends it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("User ID is required")]
    InvalidRequest,

    #[error("No API key configured (need OPENAI_API_KEY or GEMINI_API_KEY)")]
    Configuration,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub struct ChatOrchestrator {
    primary: Option<Arc<dyn ChatProvider>>,
    fallback: Option<Arc<dyn ChatProvider>>,
    memories: Arc<dyn MemoryStore>,
    tools: Arc<ToolRegistry>,
    production: bool,
}

impl ChatOrchestrator {
    pub fn new(
        providers: Option<ProviderSet>,
        memories: Arc<dyn MemoryStore>,
        production: bool,
    ) -> Self {
        let (primary, fallback) = match providers {
            Some(set) => (Some(set.primary), set.fallback),
            None => (None, None),
        };
        Self {
            primary,
            fallback,
            tools: Arc::new(ToolRegistry::new(Arc::clone(&memories))),
            memories,
            production,
        }
    }

    /// Run one chat turn and return the frame stream.
    pub async fn handle(&self, request: ChatTurnRequest) -> Result<ChatStream, ChatError> {
        let user_id = request
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .ok_or(ChatError::InvalidRequest)?;
        note_user_id_shape(&user_id);

        let primary = self.primary.clone().ok_or(ChatError::Configuration)?;

        // Memory context is an enhancement, not a dependency: a failed
        // fetch degrades to an empty set.
        let memories = match self.memories.memories_for_user(&user_id).await {
            Ok(memories) => memories,
            Err(err) => {
                tracing::warn!(error = %err, "memory fetch failed, continuing without context");
                Vec::new()
            }
        };

        // The system message is server-owned; client-sent ones are dropped.
        let mut transcript = vec![Message::system(prompts::system_prompt(&memories))];
        transcript.extend(
            request
                .messages
                .into_iter()
                .filter(|message| message.role != Role::System),
        );

        match self
            .attempt_turn(primary, transcript.clone(), user_id.clone())
            .await
        {
            Ok(stream) => Ok(stream),
            Err(err) if err.is_model_not_found() => match self.fallback.clone() {
                Some(fallback) => {
                    tracing::warn!(
                        error = %err,
                        fallback = fallback.name(),
                        "primary provider failed, retrying the whole turn"
                    );
                    self.attempt_turn(fallback, transcript, user_id)
                        .await
                        .map_err(ChatError::Provider)
                }
                None => Err(ChatError::Provider(err)),
            },
            Err(err) => Err(ChatError::Provider(err)),
        }
    }

    /// One full turn against one provider. The first completion round is
    /// opened eagerly so model-resolution failures surface to the caller
    /// (the failover boundary); later rounds fail inside the stream as an
    /// error frame with no retry.
    async fn attempt_turn(
        &self,
        provider: Arc<dyn ChatProvider>,
        mut transcript: Vec<Message>,
        user_id: String,
    ) -> Result<ChatStream, ProviderError> {
        let definitions = self.tools.definitions();
        let first = provider.open_stream(&transcript, &definitions).await?;
        let tools = Arc::clone(&self.tools);
        let production = self.production;

        let stream = async_stream::stream! {
            let mut current = first;
            let mut rounds = 0usize;

            'turn: loop {
                let mut text = String::new();
                let mut pending: Vec<ToolInvocation> = Vec::new();

                while let Some(event) = current.next().await {
                    match event {
                        Ok(ProviderEvent::TextDelta(delta)) => {
                            text.push_str(&delta);
                            yield StreamFrame::TextDelta(delta);
                        }
                        Ok(ProviderEvent::ToolCall(call)) => pending.push(call),
                        Ok(ProviderEvent::Finished { .. }) => break,
                        Err(err) => {
                            tracing::error!(error = %err, "provider stream failed mid-turn");
                            yield StreamFrame::Error(stream_error_message(&err, production));
                            break 'turn;
                        }
                    }
                }

                if pending.is_empty() {
                    yield StreamFrame::Finish { reason: "stop".into() };
                    break 'turn;
                }

                rounds += 1;
                let mut resolved = Vec::new();
                for call in pending {
                    yield StreamFrame::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    };

                    // Tool execution is synchronous within the stream: the
                    // model only sees the next round once results exist.
                    let result = match tools.execute(&call.name, call.arguments.clone(), &user_id).await {
                        Ok(output) => serde_json::to_value(&output).unwrap_or(Value::Null),
                        Err(err) => {
                            tracing::warn!(error = %err, tool = %call.name, "tool execution rejected");
                            json!({ "error": err.to_string() })
                        }
                    };

                    yield StreamFrame::ToolResult {
                        id: call.id.clone(),
                        result: result.clone(),
                    };
                    resolved.push(ToolCall {
                        id: call.id,
                        name: call.name,
                        arguments: call.arguments,
                        result: Some(result),
                    });
                }
                transcript.push(Message {
                    role: Role::Assistant,
                    content: text,
                    tool_calls: Some(resolved),
                });

                if rounds >= MAX_TOOL_ROUNDS {
                    tracing::warn!(rounds, "tool round cap reached, ending the turn");
                    yield StreamFrame::Finish { reason: "tool-calls".into() };
                    break 'turn;
                }

                match provider.open_stream(&transcript, &definitions).await {
                    Ok(next) => current = next,
                    Err(err) => {
                        tracing::error!(error = %err, "provider refused the follow-up round");
                        yield StreamFrame::Error(stream_error_message(&err, production));
                        break 'turn;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn stream_error_message(err: &ProviderError, production: bool) -> String {
    if production {
        "Internal server error".to_string()
    } else {
        err.to_string()
    }
}

/// Legacy `user-*` tokens are accepted alongside UUIDs; anything else is
/// logged and let through.
fn note_user_id_shape(user_id: &str) {
    if !user_id.starts_with("user-") && Uuid::parse_str(user_id).is_err() {
        tracing::warn!(user_id, "user id is neither a UUID nor a legacy user-* token");
    }
}
