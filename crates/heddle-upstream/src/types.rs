//! Chat completion wire types.
//!
//! These mirror the OpenAI chat completion format, the de facto standard
//! for LLM APIs. The gateway interprets very little of a request -- it
//! needs `model` for routing and access checks -- so every struct keeps a
//! flattened `extra` map and forwards fields it does not understand
//! verbatim. Clients talk to heddle exactly as they would talk to the
//! provider behind it.

use serde::{Deserialize, Serialize};

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// The role of the message author (e.g. "system", "user", "assistant", "tool").
    pub role: String,

    /// The content of the message. Tool-call messages may carry none.
    #[serde(default)]
    pub content: Option<String>,

    /// Fields the gateway does not interpret (tool_calls, name, ...),
    /// forwarded unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatMessage {
    /// Create a simple message with role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// The model identifier exactly as the client sent it
    /// (e.g. "openai/gpt-4.1"). Routing matches on its prefix; the
    /// upstream receives it unchanged.
    pub model: String,

    /// The conversation messages.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Whether to stream the response. Forwarded, never interpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Fields the gateway does not interpret (tools, response_format, ...),
    /// forwarded unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatRequest {
    /// Create a minimal chat request with a model and messages.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            stream: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// A chat completion response from an upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    /// Unique identifier for this completion.
    #[serde(default)]
    pub id: String,

    /// The list of completion choices.
    #[serde(default)]
    pub choices: Vec<Choice>,

    /// Token usage statistics, if the provider reports them.
    #[serde(default)]
    pub usage: Option<Usage>,

    /// The model that generated the response.
    #[serde(default)]
    pub model: String,

    /// Provider-specific fields, forwarded unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single completion choice within a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    /// The index of this choice in the list.
    #[serde(default)]
    pub index: u32,

    /// The assistant's response message.
    pub message: ChatMessage,

    /// Why generation stopped (e.g. "stop", "length").
    #[serde(default)]
    pub finish_reason: Option<String>,

    /// Provider-specific fields, forwarded unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Token usage statistics for a completion.
///
/// Providers are inconsistent about these fields -- some send floats, some
/// omit them, some send null. All of that normalizes to whole token counts
/// so the audit stream always carries integers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    /// Number of tokens in the prompt.
    #[serde(default, deserialize_with = "token_count")]
    pub prompt_tokens: u32,

    /// Number of tokens in the generated completion.
    #[serde(default, deserialize_with = "token_count")]
    pub completion_tokens: u32,

    /// Total tokens used (prompt + completion).
    #[serde(default, deserialize_with = "token_count")]
    pub total_tokens: u32,

    /// Provider-specific usage breakdowns, forwarded unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Accept integer, float, null, or missing token counts; anything that is
/// not a positive finite number becomes zero.
fn token_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                v.min(u64::from(u32::MAX)) as u32
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .map_or(0, |f| f as u32)
            }
        }
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_helpers() {
        let sys = ChatMessage::system("You are helpful.");
        assert_eq!(sys.role, "system");
        assert_eq!(sys.content.as_deref(), Some("You are helpful."));
        assert!(sys.extra.is_empty());

        assert_eq!(ChatMessage::user("Hello").role, "user");
        assert_eq!(ChatMessage::assistant("Hi there").role, "assistant");
    }

    #[test]
    fn chat_message_serde_roundtrip() {
        let msg = ChatMessage::user("Hello, world!");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn chat_message_preserves_unknown_fields() {
        let json = r#"{
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "call_1", "type": "function",
                            "function": {"name": "f", "arguments": "{}"}}]
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert!(msg.content.is_none());
        assert!(msg.extra.contains_key("tool_calls"));

        let rendered = serde_json::to_string(&msg).unwrap();
        assert!(rendered.contains("call_1"));
    }

    #[test]
    fn chat_request_serialization() {
        let req = ChatRequest::new("openai/gpt-4.1", vec![ChatMessage::user("Hi")]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""model":"openai/gpt-4.1""#));
        assert!(json.contains(r#""role":"user""#));
        assert!(!json.contains("max_tokens"));
        assert!(!json.contains("temperature"));
        assert!(!json.contains("stream"));
    }

    #[test]
    fn chat_request_forwards_unknown_fields() {
        let json = r#"{
            "model": "openai/gpt-4.1",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 128,
            "tools": [{"type": "function", "function": {"name": "t"}}],
            "response_format": {"type": "json_object"}
        }"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.max_tokens, Some(128));
        assert!(req.extra.contains_key("tools"));
        assert!(req.extra.contains_key("response_format"));

        let rendered = serde_json::to_value(&req).unwrap();
        assert_eq!(rendered["response_format"]["type"], "json_object");
        assert_eq!(rendered["model"], "openai/gpt-4.1");
    }

    #[test]
    fn chat_response_deserialization() {
        let json = r#"{
            "id": "chatcmpl-abc123",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
            "model": "gpt-4.1"
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, "chatcmpl-abc123");
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello!"));
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = resp.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn chat_response_without_usage() {
        let json = r#"{
            "id": "resp-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Ok"},
                "finish_reason": null
            }],
            "usage": null,
            "model": "test-model"
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(resp.usage.is_none());
        assert!(resp.choices[0].finish_reason.is_none());
    }

    #[test]
    fn usage_normalizes_floats_and_nulls() {
        let json = r#"{"prompt_tokens": 10.0, "completion_tokens": null, "total_tokens": 10.9}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn usage_missing_fields_default_zero() {
        let usage: Usage = serde_json::from_str("{}").unwrap();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 0);
        assert_eq!(usage.total_tokens, 0);
    }

    #[test]
    fn usage_negative_becomes_zero() {
        let json = r#"{"prompt_tokens": -3, "completion_tokens": 5, "total_tokens": 2}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 5);
    }

    #[test]
    fn usage_detail_fields_survive() {
        let json = r#"{
            "prompt_tokens": 7,
            "completion_tokens": 3,
            "total_tokens": 10,
            "prompt_tokens_details": {"cached_tokens": 4}
        }"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        let rendered = serde_json::to_value(&usage).unwrap();
        assert_eq!(rendered["prompt_tokens_details"]["cached_tokens"], 4);
    }
}
