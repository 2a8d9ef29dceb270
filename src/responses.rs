//! Responses API request and output types

use crate::types::Message;
use serde::Serialize;
use serde_json::Value;

/// Request body for the Responses API
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    /// Wire model name
    pub model: String,
    /// Conversation input
    pub input: Vec<Message>,
    /// Tool definitions, passed through as given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

impl ResponsesRequest {
    /// Create a new request
    pub fn new(model: impl Into<String>, input: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            input,
            tools: None,
        }
    }

    /// Attach tool definitions
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Output of a Responses API call
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseOutput {
    /// Response identifier
    pub id: Option<String>,
    /// Concatenated output text
    pub output_text: String,
    /// Full response body
    pub raw: Value,
}

impl ResponseOutput {
    /// Build from a response body.
    ///
    /// Prefers a top-level `output_text`; otherwise joins every `output_text`
    /// content item of every output message.
    pub fn from_body(raw: Value) -> Self {
        let output_text = match raw.get("output_text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => raw
                .get("output")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|item| item.get("content").and_then(Value::as_array))
                .flatten()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect(),
        };

        Self {
            id: raw.get("id").and_then(Value::as_str).map(str::to_string),
            output_text,
            raw,
        }
    }
}
