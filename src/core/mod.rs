//! Core orchestration
//!
//! The chat orchestrator and the data-stream frame codec it speaks to the
//! client.

pub mod orchestrator;
pub mod wire;

pub use orchestrator::{ChatError, ChatOrchestrator, ChatStream, ChatTurnRequest, MAX_TOOL_ROUNDS};
pub use wire::StreamFrame;
