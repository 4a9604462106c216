//! OpenAI Chat Completions wire types and request normalization.
//!
//! Request structs ignore unknown fields (serde's default), matching what
//! OpenAI clients expect, but the capability parameters a human backend
//! cannot honor are declared explicitly so validation can reject them
//! instead of silently dropping them.

use serde::{Deserialize, Serialize};
use serde_json::json;

use shared_types::{ChatMessage, Role};

pub const SYSTEM_FINGERPRINT: &str = "fp_human_backend";
pub const OBJECT_COMPLETION: &str = "chat.completion";
pub const OBJECT_CHUNK: &str = "chat.completion.chunk";
pub const FINISH_STOP: &str = "stop";

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChatCompletionRequest {
    pub model: String,
    pub messages: Vec<RequestMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    pub modalities: Option<Vec<String>>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default)]
    pub logprobs: bool,
    #[serde(default)]
    pub top_logprobs: Option<u32>,
    #[serde(default)]
    pub n: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

// ============================================================================
// Normalization
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct MalformedRequest(pub String);

/// Validate a parsed request and produce the canonical message history.
///
/// Rejection here maps to HTTP 400 before the turn touches the queue or
/// the draft orchestrator; there are no side effects on failure.
pub fn normalize_messages(
    request: &CreateChatCompletionRequest,
) -> Result<Vec<ChatMessage>, MalformedRequest> {
    validate_capabilities(request)?;

    if request.messages.is_empty() {
        return Err(MalformedRequest(
            "messages must contain at least one entry".to_string(),
        ));
    }

    let mut normalized = Vec::with_capacity(request.messages.len());
    for (index, message) in request.messages.iter().enumerate() {
        // `developer` is the o1-era alias for the system role.
        let role = match message.role.as_str() {
            "system" | "developer" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(MalformedRequest(format!(
                    "messages[{index}] has unsupported role '{other}'"
                )));
            }
        };

        let content = match &message.content {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(_) => {
                return Err(MalformedRequest(format!(
                    "messages[{index}] content must be a string; content parts are not supported"
                )));
            }
            None => {
                return Err(MalformedRequest(format!(
                    "messages[{index}] is missing content"
                )));
            }
        };

        normalized.push(ChatMessage::new(role, content));
    }

    Ok(normalized)
}

/// Capability checks a human backend cannot satisfy.
fn validate_capabilities(request: &CreateChatCompletionRequest) -> Result<(), MalformedRequest> {
    if let Some(modalities) = &request.modalities {
        for modality in modalities {
            if modality != "text" {
                return Err(MalformedRequest(format!(
                    "output modality '{modality}' is not supported; only 'text' is supported"
                )));
            }
        }
    }

    if request.store {
        return Err(MalformedRequest(
            "'store=true' is not supported; conversations are not persisted".to_string(),
        ));
    }

    if let Some(format) = &request.response_format {
        if format.format_type == "json_object" || format.format_type == "json_schema" {
            return Err(MalformedRequest(format!(
                "response_format '{}' is not supported; only 'text' is supported",
                format.format_type
            )));
        }
    }

    if let Some(tool_choice) = &request.tool_choice {
        let requires_tools = tool_choice.as_str() == Some("required")
            || tool_choice.get("type").and_then(|v| v.as_str()) == Some("function");
        if requires_tools {
            return Err(MalformedRequest(
                "tool calling is not supported".to_string(),
            ));
        }
    }

    if request.logprobs || request.top_logprobs.is_some() {
        return Err(MalformedRequest(
            "'logprobs' is not supported; humans cannot calculate token probabilities".to_string(),
        ));
    }

    if request.n.unwrap_or(1) > 1 {
        return Err(MalformedRequest(
            "'n > 1' is not supported; humans provide a single response".to_string(),
        ));
    }

    Ok(())
}

/// OpenAI-shaped error body for client-visible failures.
pub fn error_body(message: &str, error_type: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "type": error_type,
            "param": null,
            "code": null,
        }
    })
}

// ============================================================================
// Response (Non-Streaming)
// ============================================================================

#[derive(Debug, Clone, Serialize, Default)]
pub struct CompletionTokensDetails {
    pub reasoning_tokens: u32,
    pub audio_tokens: u32,
    pub accepted_prediction_tokens: u32,
    pub rejected_prediction_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PromptTokensDetails {
    pub audio_tokens: u32,
    pub cached_tokens: u32,
}

/// Usage is always zeroed: there is no tokenizer for a human.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CompletionUsage {
    pub completion_tokens: u32,
    pub prompt_tokens: u32,
    pub total_tokens: u32,
    pub completion_tokens_details: CompletionTokensDetails,
    pub prompt_tokens_details: PromptTokensDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMessage {
    pub role: &'static str,
    pub content: String,
    pub refusal: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
    pub logprobs: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: &'static str,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: CompletionUsage,
}

impl ChatCompletionResponse {
    pub fn new(id: String, created: i64, model: String, content: String) -> Self {
        Self {
            id,
            object: OBJECT_COMPLETION,
            created,
            model,
            system_fingerprint: SYSTEM_FINGERPRINT,
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant",
                    content,
                    refusal: None,
                },
                finish_reason: FINISH_STOP,
                logprobs: None,
            }],
            usage: CompletionUsage::default(),
        }
    }
}

// ============================================================================
// Response (Streaming / Chunk)
// ============================================================================

#[derive(Debug, Clone, Serialize, Default)]
pub struct StreamDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: StreamDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: &'static str,
    pub choices: Vec<StreamChoice>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(value: serde_json::Value) -> CreateChatCompletionRequest {
        serde_json::from_value(value).expect("request should parse")
    }

    #[test]
    fn test_normalize_accepts_basic_conversation() {
        let request = request_from(json!({
            "model": "human",
            "messages": [
                {"role": "system", "content": "Be kind."},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ],
        }));

        let messages = normalize_messages(&request).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], ChatMessage::new(Role::User, "hi"));
    }

    #[test]
    fn test_normalize_maps_developer_to_system() {
        let request = request_from(json!({
            "model": "human",
            "messages": [
                {"role": "developer", "content": "Be terse."},
                {"role": "user", "content": "hi"},
            ],
        }));

        let messages = normalize_messages(&request).unwrap();
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn test_normalize_rejects_empty_messages() {
        let request = request_from(json!({"model": "human", "messages": []}));
        let err = normalize_messages(&request).unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn test_normalize_rejects_tool_role() {
        let request = request_from(json!({
            "model": "human",
            "messages": [{"role": "tool", "content": "result", "tool_call_id": "x"}],
        }));
        let err = normalize_messages(&request).unwrap_err();
        assert!(err.to_string().contains("unsupported role 'tool'"));
    }

    #[test]
    fn test_normalize_rejects_content_parts() {
        let request = request_from(json!({
            "model": "human",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
        }));
        let err = normalize_messages(&request).unwrap_err();
        assert!(err.to_string().contains("content parts"));
    }

    #[test]
    fn test_capability_rejections() {
        let cases = vec![
            json!({"model": "human", "messages": [{"role":"user","content":"hi"}], "store": true}),
            json!({"model": "human", "messages": [{"role":"user","content":"hi"}], "modalities": ["audio"]}),
            json!({"model": "human", "messages": [{"role":"user","content":"hi"}], "response_format": {"type": "json_object"}}),
            json!({"model": "human", "messages": [{"role":"user","content":"hi"}], "tool_choice": "required"}),
            json!({"model": "human", "messages": [{"role":"user","content":"hi"}], "logprobs": true}),
            json!({"model": "human", "messages": [{"role":"user","content":"hi"}], "n": 2}),
        ];

        for case in cases {
            let request = request_from(case.clone());
            assert!(
                normalize_messages(&request).is_err(),
                "expected rejection for {case}"
            );
        }
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let request = request_from(json!({
            "model": "human",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.7,
            "max_tokens": 100,
            "frequency_penalty": 0.5,
        }));
        assert!(normalize_messages(&request).is_ok());
    }

    #[test]
    fn test_chunk_delta_excludes_none_fields() {
        let chunk = ChatCompletionChunk {
            id: "chatcmpl-test".to_string(),
            object: OBJECT_CHUNK,
            created: 0,
            model: "human".to_string(),
            system_fingerprint: SYSTEM_FINGERPRINT,
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta::default(),
                finish_reason: Some(FINISH_STOP),
            }],
        };

        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["delta"], json!({}));
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
    }
}
