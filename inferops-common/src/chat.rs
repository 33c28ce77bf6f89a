//! Chat completion protocol types.
//!
//! The gateway is a transparent proxy: beyond `messages`, `model`, and
//! `stream` it does not interpret the payload. Unknown fields are preserved
//! through `#[serde(flatten)]` maps so sampling parameters and vendor
//! extensions survive the round trip to the node's LLM daemon.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat completion request as accepted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Routing hint: only nodes advertising this model are considered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Whether the response should be streamed.
    #[serde(default)]
    pub stream: bool,
    /// Fields the gateway forwards verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(Value::String(content.into())),
            extra: serde_json::Map::new(),
        }
    }
}

/// One line of a streamed chat response.
///
/// Daemons emit newline-delimited JSON objects; each carries the next text
/// fragment in `choices[0].delta.content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let json = r#"{"messages": [{"role": "user", "content": "Hello"}]}"#;
        let req: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert!(req.model.is_none());
        assert!(!req.stream);
        assert!(req.extra.is_empty());
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let json = r#"{
            "messages": [{"role": "user", "content": "Hi"}],
            "model": "llama3",
            "stream": true,
            "temperature": 0.7,
            "top_p": 0.9
        }"#;
        let req: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.model.as_deref(), Some("llama3"));
        assert!(req.stream);
        assert_eq!(req.extra["temperature"], 0.7);

        let out = serde_json::to_value(&req).unwrap();
        assert_eq!(out["temperature"], 0.7);
        assert_eq!(out["top_p"], 0.9);
    }

    #[test]
    fn test_message_content_may_be_structured() {
        let json = r#"{"role": "user", "content": [{"type": "text", "text": "hi"}]}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert!(msg.content.unwrap().is_array());
    }

    #[test]
    fn test_user_message_helper() {
        let msg = ChatMessage::user("hello");
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, Some(Value::String("hello".to_string())));
    }

    #[test]
    fn test_stream_chunk_delta_content() {
        let json = r#"{"choices": [{"delta": {"content": "tok"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("tok"));
    }

    #[test]
    fn test_stream_chunk_without_choices() {
        let chunk: StreamChunk = serde_json::from_str("{}").unwrap();
        assert!(chunk.choices.is_empty());
    }
}
