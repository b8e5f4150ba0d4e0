//! AI provider integrations
//!
//! Streaming chat-completion clients. Both providers speak the same
//! `ChatProvider` contract: open a streaming completion over the transcript
//! with the tool schemas attached, and yield incremental
//! [`ProviderEvent`]s until the model finishes or asks for tools.

pub mod gemini;
pub mod openai;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::conversation::Message;
use crate::tools::ToolDefinition;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused the configured model. This is the failure
    /// signature that makes a turn eligible for failover.
    #[error("model not available: {0}")]
    ModelNotFound(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_model_not_found(&self) -> bool {
        matches!(self, ProviderError::ModelNotFound(_))
    }
}

/// A tool call the model asked for mid-stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta(String),
    ToolCall(ToolInvocation),
    Finished { reason: FinishReason },
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open one streaming completion round. Transport and model-resolution
    /// failures surface here, before any event flows.
    async fn open_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<EventStream, ProviderError>;
}

/// The providers a deployment has credentials for. The OpenAI-class
/// provider is preferred when configured; the other configured provider
/// becomes the failover candidate.
#[derive(Clone)]
pub struct ProviderSet {
    pub primary: Arc<dyn ChatProvider>,
    pub fallback: Option<Arc<dyn ChatProvider>>,
}

impl ProviderSet {
    pub fn from_config(config: &Config) -> Option<Self> {
        let openai = config.openai_api_key.as_ref().map(|key| {
            Arc::new(OpenAiProvider::new(
                &config.openai_base_url,
                key,
                &config.openai_model,
            )) as Arc<dyn ChatProvider>
        });
        let gemini = config.gemini_api_key.as_ref().map(|key| {
            Arc::new(GeminiProvider::new(
                &config.gemini_base_url,
                key,
                &config.gemini_model,
            )) as Arc<dyn ChatProvider>
        });

        match (openai, gemini) {
            (Some(primary), fallback) => Some(Self { primary, fallback }),
            (None, Some(primary)) => Some(Self {
                primary,
                fallback: None,
            }),
            (None, None) => None,
        }
    }
}
