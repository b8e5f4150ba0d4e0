//! Étude - learning assistant API
//!
//! A conversational learning assistant: an HTTP endpoint that proxies chat
//! requests to hosted LLM providers, augmented with three callable tools
//! (quiz generation, memory storage, flashcard creation). Conversation
//! history and user memories live in a hosted row store consumed over REST.

use std::sync::Arc;

pub mod client;
pub mod config;
pub mod conversation;
pub mod core;
pub mod providers;
pub mod routes;
pub mod store;
pub mod tools;

use crate::config::Config;
use crate::core::ChatOrchestrator;
use crate::store::AuthClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub auth: Option<Arc<AuthClient>>,
}
