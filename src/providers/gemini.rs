//! Gemini-class provider
//!
//! Speaks the `streamGenerateContent` API with `alt=sse`. Tool schemas are
//! sent as function declarations; tool results travel back as
//! `functionResponse` parts. Function calls arrive whole in a single part,
//! so no fragment reassembly is needed here. A 404 or "not found for API
//! version" response classifies as the model-not-found failover signature.

use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::conversation::{Message, Role};
use crate::tools::ToolDefinition;

use super::{
    ChatProvider, EventStream, FinishReason, ProviderError, ProviderEvent, ToolInvocation,
};

use async_trait::async_trait;

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
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

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "functionCall")]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Split the transcript into the system instruction and `contents`.
/// Assistant tool calls become `functionCall` parts on a model turn,
/// their results a `functionResponse` turn right after.
fn wire_request(messages: &[Message], tools: &[ToolDefinition]) -> Value {
    let mut system_instruction: Option<String> = None;
    let mut contents = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                if system_instruction.is_none() {
                    system_instruction = Some(message.content.clone());
                }
            }
            Role::User => contents.push(json!({
                "role": "user",
                "parts": [{"text": message.content}],
            })),
            Role::Assistant => match &message.tool_calls {
                Some(calls) if !calls.is_empty() => {
                    let mut parts = Vec::new();
                    if !message.content.is_empty() {
                        parts.push(json!({"text": message.content}));
                    }
                    for call in calls {
                        parts.push(json!({
                            "functionCall": {
                                "name": call.name,
                                "args": call.arguments,
                            }
                        }));
                    }
                    contents.push(json!({"role": "model", "parts": parts}));

                    let responses: Vec<Value> = calls
                        .iter()
                        .map(|call| {
                            let response = match &call.result {
                                Some(Value::Object(map)) => Value::Object(map.clone()),
                                Some(other) => json!({"value": other}),
                                None => json!({}),
                            };
                            json!({
                                "functionResponse": {
                                    "name": call.name,
                                    "response": response,
                                }
                            })
                        })
                        .collect();
                    contents.push(json!({"role": "user", "parts": responses}));
                }
                _ => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": message.content}],
                })),
            },
        }
    }

    let mut request = json!({ "contents": contents });
    if let Some(instruction) = system_instruction {
        request["systemInstruction"] = json!({"parts": [{"text": instruction}]});
    }
    if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();
        request["tools"] = json!([{"functionDeclarations": declarations}]);
    }
    request
}

fn events_from_chunk(chunk: StreamChunk, saw_tool_call: &mut bool) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    for candidate in chunk.candidates {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        events.push(ProviderEvent::TextDelta(text));
                    }
                }
                if let Some(call) = part.function_call {
                    *saw_tool_call = true;
                    events.push(ProviderEvent::ToolCall(ToolInvocation {
                        id: format!("call-{}", Uuid::new_v4()),
                        name: call.name,
                        arguments: call.args,
                    }));
                }
            }
        }
        if let Some(reason) = candidate.finish_reason {
            let reason = match (reason.as_str(), *saw_tool_call) {
                (_, true) => FinishReason::ToolCalls,
                ("STOP", false) => FinishReason::Stop,
                ("MAX_TOKENS", false) => FinishReason::Length,
                _ => FinishReason::Other,
            };
            events.push(ProviderEvent::Finished { reason });
        }
    }
    events
}

fn classify_failure(status: u16, body: &str) -> ProviderError {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        let model_missing = status == 404
            || parsed.error.status.as_deref() == Some("NOT_FOUND")
            || parsed.error.message.contains("not found for API version");
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
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<EventStream, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.base_url, self.model
        );
        let request = wire_request(messages, tools);

        let response = self
            .client
            .post(url)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
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
            let mut saw_tool_call = false;

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

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            for event in events_from_chunk(chunk, &mut saw_tool_call) {
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
