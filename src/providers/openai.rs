//! OpenAI-class provider
//!
//! Works with any API that implements the OpenAI chat completions format
//! with `stream: true` and function calling. The SSE body arrives as byte
//! chunks that do not respect line boundaries, so a line buffer reassembles
//! `data:` events; tool-call fragments are accumulated per index until the
//! chunk that carries the `tool_calls` finish reason flushes them.

use std::collections::BTreeMap;

use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::conversation::{Message, Role};
use crate::tools::ToolDefinition;

use super::{
    ChatProvider, EventStream, FinishReason, ProviderError, ProviderEvent, ToolInvocation,
};

use async_trait::async_trait;

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    stream: bool,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Reassembles tool calls from per-index argument fragments.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    partial: BTreeMap<usize, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    fn absorb(&mut self, deltas: Vec<ToolCallDelta>) {
        for delta in deltas {
            let slot = self.partial.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                slot.id = Some(id);
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    slot.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    slot.arguments.push_str(&arguments);
                }
            }
        }
    }

    fn flush(&mut self) -> Vec<ToolInvocation> {
        std::mem::take(&mut self.partial)
            .into_values()
            .map(|call| ToolInvocation {
                id: call
                    .id
                    .unwrap_or_else(|| format!("call-{}", Uuid::new_v4())),
                name: call.name,
                arguments: serde_json::from_str(&call.arguments)
                    .unwrap_or(Value::String(call.arguments)),
            })
            .collect()
    }
}

fn events_from_chunk(chunk: StreamChunk, calls: &mut ToolCallAssembler) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                events.push(ProviderEvent::TextDelta(content));
            }
        }
        if let Some(deltas) = choice.delta.tool_calls {
            calls.absorb(deltas);
        }
        if let Some(reason) = choice.finish_reason {
            match reason.as_str() {
                "tool_calls" => {
                    events.extend(calls.flush().into_iter().map(ProviderEvent::ToolCall));
                    events.push(ProviderEvent::Finished {
                        reason: FinishReason::ToolCalls,
                    });
                }
                "stop" => events.push(ProviderEvent::Finished {
                    reason: FinishReason::Stop,
                }),
                "length" => events.push(ProviderEvent::Finished {
                    reason: FinishReason::Length,
                }),
                _ => events.push(ProviderEvent::Finished {
                    reason: FinishReason::Other,
                }),
            }
        }
    }
    events
}

/// Map the transcript into chat-completions wire messages. An assistant
/// message carrying resolved tool calls expands into the assistant
/// `tool_calls` entry plus one `tool` message per result.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::new();
    for message in messages {
        match (&message.role, &message.tool_calls) {
            (Role::Assistant, Some(calls)) if !calls.is_empty() => {
                let content = if message.content.is_empty() {
                    Value::Null
                } else {
                    Value::String(message.content.clone())
                };
                wire.push(json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": calls.iter().map(|call| json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })).collect::<Vec<_>>(),
                }));
                for call in calls {
                    wire.push(json!({
                        "role": "tool",
                        "tool_call_id": call.id,
                        "content": call.result.clone().unwrap_or(Value::Null).to_string(),
                    }));
                }
            }
            _ => wire.push(json!({
                "role": message.role,
                "content": message.content,
            })),
        }
    }
    wire
}

fn wire_tools(tools: &[ToolDefinition]) -> Option<Vec<Value>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect(),
    )
}

fn classify_failure(status: u16, body: &str) -> ProviderError {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        let model_missing = status == 404
            || parsed.error.code.as_deref() == Some("model_not_found")
            || parsed.error.message.contains("does not exist");
        if model_missing {
            return ProviderError::ModelNotFound(parsed.error.message);
        }
        return ProviderError::InvalidResponse(format!("API error: {}", parsed.error.message));
    }
    if status == 404 {
        return ProviderError::ModelNotFound(body.to_string());
    }
    ProviderError::InvalidResponse(format!("HTTP {}: {}", status, body))
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<EventStream, ProviderError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: wire_messages(messages),
            tools: wire_tools(tools),
            stream: true,
            temperature: 0.7,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &body));
        }

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut calls = ToolCallAssembler::default();

            'receive: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(ProviderError::Request(err));
                        break 'receive;
                    }
                };
                match std::str::from_utf8(&chunk) {
                    Ok(text) => buffer.push_str(text),
                    Err(_) => {
                        yield Err(ProviderError::InvalidResponse(
                            "stream chunk is not UTF-8".into(),
                        ));
                        break 'receive;
                    }
                }

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        break 'receive;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            for event in events_from_chunk(chunk, &mut calls) {
                                yield Ok(event);
                            }
                        }
                        Err(err) => {
                            yield Err(ProviderError::InvalidResponse(format!(
                                "bad stream chunk: {}",
                                err
                            )));
                            break 'receive;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_tool_call_from_split_fragments() {
        let mut assembler = ToolCallAssembler::default();
        assembler.absorb(vec![ToolCallDelta {
            index: 0,
            id: Some("call-1".into()),
            function: Some(FunctionDelta {
                name: Some("generate_quiz".into()),
                arguments: Some("{\"subject\":".into()),
            }),
        }]);
        assembler.absorb(vec![ToolCallDelta {
            index: 0,
            id: None,
            function: Some(FunctionDelta {
                name: None,
                arguments: Some("\"React\"}".into()),
            }),
        }]);

        let calls = assembler.flush();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call-1");
        assert_eq!(calls[0].name, "generate_quiz");
        assert_eq!(calls[0].arguments, json!({"subject": "React"}));
    }

    #[test]
    fn finish_reason_tool_calls_flushes_before_finishing() {
        let mut assembler = ToolCallAssembler::default();
        let chunk: StreamChunk = serde_json::from_value(json!({
            "choices": [{
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call-9",
                        "function": {"name": "add_memory", "arguments": "{\"content\":\"x\",\"type\":\"autre\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

        let events = events_from_chunk(chunk, &mut assembler);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ProviderEvent::ToolCall(call) if call.name == "add_memory"
        ));
        assert_eq!(
            events[1],
            ProviderEvent::Finished {
                reason: FinishReason::ToolCalls
            }
        );
    }

    #[test]
    fn text_deltas_stream_through() {
        let mut assembler = ToolCallAssembler::default();
        let chunk: StreamChunk = serde_json::from_value(json!({
            "choices": [{"delta": {"content": "Bonjour"}, "finish_reason": null}]
        }))
        .unwrap();
        let events = events_from_chunk(chunk, &mut assembler);
        assert_eq!(events, vec![ProviderEvent::TextDelta("Bonjour".into())]);
    }

    #[test]
    fn assistant_tool_calls_expand_into_tool_messages() {
        let transcript = vec![Message {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: Some(vec![crate::conversation::ToolCall {
                id: "call-1".into(),
                name: "create_flashcard".into(),
                arguments: json!({"front": "f", "back": "b"}),
                result: Some(json!({"id": "flashcard-1"})),
            }]),
        }];

        let wire = wire_messages(&transcript);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "create_flashcard");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call-1");
    }

    #[test]
    fn missing_model_classifies_for_failover() {
        let body = r#"{"error":{"message":"The model `gpt-x` does not exist","code":"model_not_found"}}"#;
        assert!(classify_failure(404, body).is_model_not_found());
        assert!(classify_failure(400, body).is_model_not_found());

        let other = r#"{"error":{"message":"rate limited","code":"rate_limit_exceeded"}}"#;
        assert!(!classify_failure(429, other).is_model_not_found());
    }
}
