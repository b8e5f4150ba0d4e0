//! Data-stream frame codec
//!
//! The chat endpoint streams one `<tag>:<json>` line per event, the format
//! the original web client consumed. The server encodes; the client
//! controller parses the same lines back.

use serde_json::{json, Value};

pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// `0:"..."` - a text token
    TextDelta(String),
    /// `9:{...}` - the model invoked a tool
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// `a:{...}` - a resolved tool result
    ToolResult { id: String, result: Value },
    /// `3:"..."` - the stream failed
    Error(String),
    /// `d:{...}` - the turn is over
    Finish { reason: String },
}

impl StreamFrame {
    pub fn encode(&self) -> String {
        match self {
            StreamFrame::TextDelta(text) => {
                format!("0:{}\n", serde_json::to_string(text).unwrap_or_default())
            }
            StreamFrame::ToolCall {
                id,
                name,
                arguments,
            } => format!(
                "9:{}\n",
                json!({ "toolCallId": id, "toolName": name, "args": arguments })
            ),
            StreamFrame::ToolResult { id, result } => {
                format!("a:{}\n", json!({ "toolCallId": id, "result": result }))
            }
            StreamFrame::Error(message) => {
                format!("3:{}\n", serde_json::to_string(message).unwrap_or_default())
            }
            StreamFrame::Finish { reason } => {
                format!("d:{}\n", json!({ "finishReason": reason }))
            }
        }
    }

    /// Parse one stream line. Unknown tags and blank lines come back as
    /// `None` so clients skip what they do not understand.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (tag, payload) = line.split_once(':')?;
        match tag {
            "0" => serde_json::from_str(payload).ok().map(StreamFrame::TextDelta),
            "9" => {
                let value: Value = serde_json::from_str(payload).ok()?;
                Some(StreamFrame::ToolCall {
                    id: value.get("toolCallId")?.as_str()?.to_string(),
                    name: value.get("toolName")?.as_str()?.to_string(),
                    arguments: value.get("args").cloned().unwrap_or(Value::Null),
                })
            }
            "a" => {
                let value: Value = serde_json::from_str(payload).ok()?;
                Some(StreamFrame::ToolResult {
                    id: value.get("toolCallId")?.as_str()?.to_string(),
                    result: value.get("result").cloned().unwrap_or(Value::Null),
                })
            }
            "3" => serde_json::from_str(payload).ok().map(StreamFrame::Error),
            "d" => {
                let value: Value = serde_json::from_str(payload).ok()?;
                Some(StreamFrame::Finish {
                    reason: value.get("finishReason")?.as_str()?.to_string(),
                })
            }
            _ => None,
        }
    }
}
