//! Chat client controller
//!
//! The client-side half of the conversation lifecycle: resolve or create
//! the active conversation for a user, hydrate prior messages (mapping
//! stored tool calls back into their in-memory shape so earlier quiz,
//! memory and flashcard cards re-render identically), persist each turn,
//! and feed quiz answers back into the conversation as plain user
//! messages. The transport to the chat endpoint sits behind a trait so the
//! whole flow runs against a scripted double in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::conversation::{Message, Role, ToolCall};
use crate::core::wire::StreamFrame;
use crate::store::{ConversationStore, NewMessage, StoreError};
use crate::tools::Quiz;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("chat endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The request body the chat endpoint expects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub messages: Vec<Message>,
    pub conversation_id: Option<String>,
    pub user_id: String,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, ClientError>> + Send>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open one streamed chat turn.
    async fn open(&self, payload: &ChatPayload) -> Result<FrameStream, ClientError>;
}

/// HTTP transport against a running chat endpoint.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, payload: &ChatPayload) -> Result<FrameStream, ClientError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            'receive: while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => match std::str::from_utf8(&chunk) {
                        Ok(text) => buffer.push_str(text),
                        Err(_) => {
                            yield Err(ClientError::Transport("stream chunk is not UTF-8".into()));
                            break 'receive;
                        }
                    },
                    Err(err) => {
                        yield Err(ClientError::Transport(err.to_string()));
                        break 'receive;
                    }
                }

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].to_string();
                    buffer.drain(..=newline);
                    if let Some(frame) = StreamFrame::parse(&line) {
                        yield Ok(frame);
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Owns the live message list, the active conversation id (persisted to a
/// local state file keyed by user id) and a per-turn loading flag.
pub struct ChatController {
    store: Arc<dyn ConversationStore>,
    transport: Arc<dyn ChatTransport>,
    user_id: String,
    state_path: PathBuf,
    conversation_id: Option<String>,
    messages: Vec<Message>,
    loading: bool,
}

impl ChatController {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        transport: Arc<dyn ChatTransport>,
        user_id: impl Into<String>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            transport,
            user_id: user_id.into(),
            state_path: state_dir.into().join("session.json"),
            conversation_id: None,
            messages: Vec::new(),
            loading: false,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Resolve or create the active conversation and hydrate its history.
    pub async fn init(&mut self) -> Result<(), ClientError> {
        let remembered = load_active_conversation(&self.state_path, &self.user_id);
        let conversation = match remembered {
            Some(id) => match self.store.conversation(&id).await? {
                Some(conversation) => conversation,
                None => self.store.create_conversation(&self.user_id).await?,
            },
            None => self.store.create_conversation(&self.user_id).await?,
        };
        store_active_conversation(&self.state_path, &self.user_id, &conversation.id);

        let records = self.store.messages(&conversation.id).await?;
        self.messages = records
            .into_iter()
            .map(|record| Message {
                role: record.role,
                content: record.content,
                tool_calls: record.tool_calls,
            })
            .collect();
        self.conversation_id = Some(conversation.id);
        Ok(())
    }

    /// Send one user turn: persist the user message (fire-and-forget
    /// relative to the stream), stream the assistant's answer, then
    /// persist the completed turn and bump the conversation.
    pub async fn submit(&mut self, text: &str) -> Result<(), ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let conversation_id = match &self.conversation_id {
            Some(id) => id.clone(),
            None => {
                let conversation = self.store.create_conversation(&self.user_id).await?;
                store_active_conversation(&self.state_path, &self.user_id, &conversation.id);
                self.conversation_id = Some(conversation.id.clone());
                conversation.id
            }
        };

        self.messages.push(Message::user(text));

        let store = Arc::clone(&self.store);
        let user_message = NewMessage {
            conversation_id: conversation_id.clone(),
            role: Role::User,
            content: text.to_string(),
            tool_calls: None,
        };
        tokio::spawn(async move {
            if let Err(err) = store.save_message(user_message).await {
                tracing::warn!(error = %err, "failed to persist user message");
            }
        });

        let payload = ChatPayload {
            messages: self.messages.clone(),
            conversation_id: Some(conversation_id.clone()),
            user_id: self.user_id.clone(),
        };

        self.loading = true;
        let outcome = self.stream_turn(&payload, &conversation_id).await;
        self.loading = false;
        outcome
    }

    async fn stream_turn(
        &mut self,
        payload: &ChatPayload,
        conversation_id: &str,
    ) -> Result<(), ClientError> {
        let mut frames = self.transport.open(payload).await?;

        let mut content = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(StreamFrame::TextDelta(delta)) => content.push_str(&delta),
                Ok(StreamFrame::ToolCall {
                    id,
                    name,
                    arguments,
                }) => calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                    result: None,
                }),
                Ok(StreamFrame::ToolResult { id, result }) => {
                    if let Some(call) = calls.iter_mut().find(|call| call.id == id) {
                        call.result = Some(result);
                    }
                }
                Ok(StreamFrame::Error(message)) => {
                    tracing::warn!(%message, "stream reported an error");
                    break;
                }
                Ok(StreamFrame::Finish { .. }) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "stream dropped mid-turn");
                    break;
                }
            }
        }

        let assistant = Message {
            role: Role::Assistant,
            content,
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
        };
        self.messages.push(assistant.clone());

        // Best-effort persistence: a storage hiccup is logged, never
        // surfaced as a failed turn.
        if let Err(err) = self
            .store
            .save_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                role: Role::Assistant,
                content: assistant.content,
                tool_calls: assistant.tool_calls,
            })
            .await
        {
            tracing::warn!(error = %err, "failed to persist assistant message");
        }
        if let Err(err) = self.store.touch_conversation(conversation_id).await {
            tracing::warn!(error = %err, "failed to bump conversation updated_at");
        }

        Ok(())
    }

    /// Answering a quiz never touches the stored quiz; it becomes a brand
    /// new user turn describing the chosen option and whether it was
    /// right, and goes through the normal submit path.
    pub async fn answer_quiz(&mut self, quiz: &Quiz, selected: usize) -> Result<(), ClientError> {
        let option = quiz
            .options
            .get(selected)
            .cloned()
            .unwrap_or_else(|| format!("option {}", selected));
        let verdict = if selected == usize::from(quiz.correct_answer) {
            "(correct)"
        } else {
            "(incorrect)"
        };
        let text = format!(
            "J'ai répondu \"{}\" à la question \"{}\" {}",
            option, quiz.question, verdict
        );
        self.submit(&text).await
    }
}

fn load_active_conversation(path: &Path, user_id: &str) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let sessions: HashMap<String, String> = serde_json::from_str(&raw).ok()?;
    sessions.get(user_id).cloned()
}

fn store_active_conversation(path: &Path, user_id: &str, conversation_id: &str) {
    let mut sessions: HashMap<String, String> = std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    sessions.insert(user_id.to_string(), conversation_id.to_string());

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let encoded = match serde_json::to_string_pretty(&sessions) {
        Ok(encoded) => encoded,
        Err(_) => return,
    };
    if let Err(err) = std::fs::write(path, encoded) {
        tracing::warn!(error = %err, "failed to persist the active conversation id");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::store::InMemoryStore;
    use crate::tools::Difficulty;

    struct ScriptedTransport {
        turns: Mutex<VecDeque<Vec<StreamFrame>>>,
        payloads: Mutex<Vec<ChatPayload>>,
    }

    impl ScriptedTransport {
        fn new(turns: Vec<Vec<StreamFrame>>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                payloads: Mutex::new(Vec::new()),
            })
        }

        fn seen_payloads(&self) -> Vec<ChatPayload> {
            self.payloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open(&self, payload: &ChatPayload) -> Result<FrameStream, ClientError> {
            self.payloads.lock().unwrap().push(payload.clone());
            let frames = self.turns.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(frames.into_iter().map(Ok))))
        }
    }

    fn temp_state_dir() -> PathBuf {
        std::env::temp_dir().join(format!("etude-client-test-{}", Uuid::new_v4()))
    }

    fn finish() -> StreamFrame {
        StreamFrame::Finish {
            reason: "stop".into(),
        }
    }

    fn quiz() -> Quiz {
        Quiz {
            id: "quiz-1".into(),
            subject: "physique".into(),
            difficulty: Difficulty::Medium,
            question: "Que signifie E=mc² ?".into(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer: 0,
            explanation: "Bonne réponse !".into(),
        }
    }

    async fn settle() {
        // Let the fire-and-forget user-message write land.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn init_creates_then_resumes_the_active_conversation() {
        let store = Arc::new(InMemoryStore::new());
        let transport = ScriptedTransport::new(vec![]);
        let state_dir = temp_state_dir();

        let mut first = ChatController::new(
            store.clone(),
            transport.clone(),
            "user-1",
            state_dir.clone(),
        );
        first.init().await.unwrap();
        let created = first.conversation_id().unwrap().to_string();

        let mut second =
            ChatController::new(store.clone(), transport, "user-1", state_dir.clone());
        second.init().await.unwrap();
        assert_eq!(second.conversation_id().unwrap(), created);

        let _ = std::fs::remove_dir_all(state_dir);
    }

    #[tokio::test]
    async fn init_hydrates_stored_tool_calls() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("user-1").await.unwrap();
        store
            .save_message(NewMessage {
                conversation_id: conversation.id.clone(),
                role: Role::Assistant,
                content: "Voici un quiz.".into(),
                tool_calls: Some(vec![ToolCall {
                    id: "call-1".into(),
                    name: "generate_quiz".into(),
                    arguments: json!({"subject": "React"}),
                    result: Some(json!({"id": "quiz-1", "correct_answer": 0})),
                }]),
            })
            .await
            .unwrap();

        let state_dir = temp_state_dir();
        store_active_conversation(
            &state_dir.join("session.json"),
            "user-1",
            &conversation.id,
        );

        let transport = ScriptedTransport::new(vec![]);
        let mut controller =
            ChatController::new(store, transport, "user-1", state_dir.clone());
        controller.init().await.unwrap();

        let calls = controller.messages()[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name, "generate_quiz");
        assert_eq!(calls[0].result.as_ref().unwrap()["id"], json!("quiz-1"));

        let _ = std::fs::remove_dir_all(state_dir);
    }

    #[tokio::test]
    async fn submit_streams_and_persists_the_whole_turn() {
        let store = Arc::new(InMemoryStore::new());
        let transport = ScriptedTransport::new(vec![vec![
            StreamFrame::TextDelta("Voici ".into()),
            StreamFrame::TextDelta("votre carte.".into()),
            StreamFrame::ToolCall {
                id: "call-1".into(),
                name: "create_flashcard".into(),
                arguments: json!({"front": "E=mc²", "back": "équivalence masse-énergie"}),
            },
            StreamFrame::ToolResult {
                id: "call-1".into(),
                result: json!({"id": "flashcard-1", "front": "E=mc²"}),
            },
            finish(),
        ]]);
        let state_dir = temp_state_dir();
        let mut controller = ChatController::new(
            store.clone(),
            transport.clone(),
            "user-1",
            state_dir.clone(),
        );
        controller.init().await.unwrap();

        controller
            .submit("Crée une carte mémoire pour E=mc²")
            .await
            .unwrap();
        settle().await;

        // Live list: user turn then assistant turn with the resolved call.
        let messages = controller.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Voici votre carte.");
        let calls = messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].result.as_ref().unwrap()["front"], json!("E=mc²"));
        assert!(!controller.is_loading());

        // Both turns landed in the store, in order.
        let conversation_id = controller.conversation_id().unwrap();
        let stored = store.messages(conversation_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, Role::User);
        assert_eq!(stored[1].role, Role::Assistant);
        assert!(stored[1].tool_calls.is_some());

        // The turn bumped the conversation.
        let conversation = store.conversation(conversation_id).await.unwrap().unwrap();
        assert!(conversation.updated_at >= conversation.created_at);

        // The payload carried the wire field names the endpoint expects.
        let payload = &transport.seen_payloads()[0];
        let encoded = serde_json::to_value(payload).unwrap();
        assert!(encoded.get("userId").is_some());
        assert!(encoded.get("conversationId").is_some());

        let _ = std::fs::remove_dir_all(state_dir);
    }

    #[tokio::test]
    async fn wrong_quiz_answer_becomes_an_incorrect_user_turn() {
        let store = Arc::new(InMemoryStore::new());
        let transport = ScriptedTransport::new(vec![vec![
            StreamFrame::TextDelta("Pas grave, on révise !".into()),
            finish(),
        ]]);
        let state_dir = temp_state_dir();
        let mut controller = ChatController::new(
            store.clone(),
            transport.clone(),
            "user-1",
            state_dir.clone(),
        );
        controller.init().await.unwrap();

        controller.answer_quiz(&quiz(), 2).await.unwrap();
        settle().await;

        let user_turns: Vec<&Message> = controller
            .messages()
            .iter()
            .filter(|m| m.role == Role::User)
            .collect();
        assert_eq!(user_turns.len(), 1);
        assert!(user_turns[0].content.contains("(incorrect)"));

        // And it was persisted like any other user turn.
        let stored = store
            .messages(controller.conversation_id().unwrap())
            .await
            .unwrap();
        assert!(stored
            .iter()
            .any(|m| m.role == Role::User && m.content.contains("(incorrect)")));

        // The answer went back to the orchestrator as a follow-up request.
        assert_eq!(transport.seen_payloads().len(), 1);

        let _ = std::fs::remove_dir_all(state_dir);
    }

    #[tokio::test]
    async fn right_quiz_answer_reads_correct() {
        let store = Arc::new(InMemoryStore::new());
        let transport = ScriptedTransport::new(vec![vec![
            StreamFrame::TextDelta("Bravo !".into()),
            finish(),
        ]]);
        let state_dir = temp_state_dir();
        let mut controller =
            ChatController::new(store, transport, "user-1", state_dir.clone());
        controller.init().await.unwrap();

        controller.answer_quiz(&quiz(), 0).await.unwrap();

        let last_user = controller
            .messages()
            .iter()
            .find(|m| m.role == Role::User)
            .unwrap();
        assert!(last_user.content.contains("(correct)"));

        let _ = std::fs::remove_dir_all(state_dir);
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let store = Arc::new(InMemoryStore::new());
        let transport = ScriptedTransport::new(vec![]);
        let state_dir = temp_state_dir();
        let mut controller =
            ChatController::new(store, transport.clone(), "user-1", state_dir.clone());
        controller.init().await.unwrap();

        controller.submit("   ").await.unwrap();
        assert!(controller.messages().is_empty());
        assert!(transport.seen_payloads().is_empty());

        let _ = std::fs::remove_dir_all(state_dir);
    }
}
