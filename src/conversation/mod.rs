//! Conversation types
//!
//! Wire and storage shapes for conversations, messages and the tool calls
//! embedded in assistant turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A tool call resolved during an assistant turn. `result` stays `None`
/// only when execution failed and the failure was swallowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// A conversation row. Owned by a user, never deleted by this system;
/// `updated_at` is bumped on every assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Deserialize a `tool_calls` column that the row store may hand back
/// either as an already-parsed array or as a raw JSON string.
pub fn tool_calls_from_row<'de, D>(deserializer: D) -> Result<Option<Vec<ToolCall>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(encoded)) => serde_json::from_str(&encoded)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Row {
        #[serde(default, deserialize_with = "tool_calls_from_row")]
        tool_calls: Option<Vec<ToolCall>>,
    }

    fn sample_calls() -> Value {
        json!([{
            "id": "call-1",
            "name": "generate_quiz",
            "arguments": {"subject": "React"},
            "result": {"id": "quiz-1"}
        }])
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn tool_calls_accepts_parsed_array() {
        let row: Row = serde_json::from_value(json!({ "tool_calls": sample_calls() })).unwrap();
        let calls = row.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "generate_quiz");
    }

    #[test]
    fn tool_calls_accepts_raw_json_string() {
        let encoded = serde_json::to_string(&sample_calls()).unwrap();
        let row: Row = serde_json::from_value(json!({ "tool_calls": encoded })).unwrap();
        let calls = row.tool_calls.unwrap();
        assert_eq!(calls[0].id, "call-1");
        assert_eq!(calls[0].result, Some(json!({"id": "quiz-1"})));
    }

    #[test]
    fn both_row_encodings_normalize_identically() {
        let parsed: Row = serde_json::from_value(json!({ "tool_calls": sample_calls() })).unwrap();
        let encoded = serde_json::to_string(&sample_calls()).unwrap();
        let stringly: Row = serde_json::from_value(json!({ "tool_calls": encoded })).unwrap();
        assert_eq!(parsed.tool_calls, stringly.tool_calls);
    }

    #[test]
    fn tool_calls_absent_or_null_is_none() {
        let row: Row = serde_json::from_value(json!({})).unwrap();
        assert!(row.tool_calls.is_none());
        let row: Row = serde_json::from_value(json!({ "tool_calls": null })).unwrap();
        assert!(row.tool_calls.is_none());
    }

    #[test]
    fn incoming_message_defaults_tool_calls() {
        let message: Message =
            serde_json::from_value(json!({"role": "user", "content": "Bonjour"})).unwrap();
        assert_eq!(message.role, Role::User);
        assert!(message.tool_calls.is_none());
    }
}
