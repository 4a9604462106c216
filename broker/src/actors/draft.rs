//! Draft generation: the seam to the external LLM collaborator.
//!
//! The broker only depends on the [`DraftClient`] trait; the shipped
//! implementation speaks the OpenAI chat-completions protocol over HTTP.
//! Cancellation is handled outside the client: the spawning side races the
//! call against a `CancellationToken` and the broker double-checks that a
//! late result is still wanted before surfacing it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use shared_types::{ChatMessage, Role};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DraftError {
    #[error("draft generation cancelled")]
    Cancelled,

    #[error("draft generation timed out")]
    Timeout,

    #[error("draft generation is not configured")]
    NotConfigured,

    #[error("draft provider request failed: {0}")]
    Provider(String),

    #[error("draft provider returned no content")]
    Empty,
}

/// External LLM collaborator contract: history in, candidate text out.
#[async_trait]
pub trait DraftClient: Send + Sync {
    /// Generate one reply candidate for the given conversation.
    ///
    /// `instruction` is optional operator guidance for this specific reply
    /// ("answer briefly", "decline politely"), folded into the prompt.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        instruction: Option<&str>,
    ) -> Result<String, DraftError>;
}

// ============================================================================
// OpenAI-compatible implementation
// ============================================================================

pub struct OpenAiDraftClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
}

impl OpenAiDraftClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        system_prompt: String,
        timeout_ms: u64,
    ) -> Result<Self, DraftError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| DraftError::Provider(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            system_prompt,
        })
    }

    fn compose_system_prompt(&self, instruction: Option<&str>) -> String {
        match instruction {
            Some(instruction) if !instruction.trim().is_empty() => format!(
                "{}\n\nOperator instruction for this reply: {}",
                self.system_prompt,
                instruction.trim()
            ),
            _ => self.system_prompt.clone(),
        }
    }
}

#[async_trait]
impl DraftClient for OpenAiDraftClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        instruction: Option<&str>,
    ) -> Result<String, DraftError> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        wire_messages.push(json!({
            "role": "system",
            "content": self.compose_system_prompt(instruction),
        }));
        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            wire_messages.push(json!({"role": role, "content": message.content}));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&url).json(&json!({
            "model": self.model,
            "messages": wire_messages,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DraftError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DraftError::Provider(format!(
                "upstream returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DraftError::Provider(e.to_string()))?;

        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(ToString::to_string)
            .filter(|text| !text.is_empty())
            .ok_or(DraftError::Empty)
    }
}

// ============================================================================
// Non-generating implementations
// ============================================================================

/// Used when no upstream is configured: every request degrades the turn to
/// pure human authorship with a visible failure flag.
pub struct DisabledDraftClient;

#[async_trait]
impl DraftClient for DisabledDraftClient {
    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _instruction: Option<&str>,
    ) -> Result<String, DraftError> {
        Err(DraftError::NotConfigured)
    }
}

/// Fixed-script client for tests and offline demos: returns the configured
/// replies in call order, repeating the last one, after an optional delay.
pub struct ScriptedDraftClient {
    replies: Vec<Result<String, DraftError>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedDraftClient {
    pub fn new(replies: Vec<Result<String, DraftError>>, delay: Duration) -> Self {
        Self {
            replies,
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(vec![Ok(reply.into())], Duration::ZERO)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DraftClient for ScriptedDraftClient {
    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _instruction: Option<&str>,
    ) -> Result<String, DraftError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let index = call.min(self.replies.len().saturating_sub(1));
        self.replies
            .get(index)
            .cloned()
            .unwrap_or(Err(DraftError::NotConfigured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_client_advances_through_replies() {
        let client = ScriptedDraftClient::new(
            vec![Ok("first".to_string()), Ok("second".to_string())],
            Duration::ZERO,
        );
        let messages = vec![ChatMessage::new(Role::User, "hi")];

        assert_eq!(client.generate(&messages, None).await.unwrap(), "first");
        assert_eq!(client.generate(&messages, None).await.unwrap(), "second");
        // Past the end of the script the last reply repeats.
        assert_eq!(client.generate(&messages, None).await.unwrap(), "second");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_disabled_client_reports_not_configured() {
        let client = DisabledDraftClient;
        let messages = vec![ChatMessage::new(Role::User, "hi")];
        assert!(matches!(
            client.generate(&messages, None).await,
            Err(DraftError::NotConfigured)
        ));
    }

    #[test]
    fn test_instruction_folded_into_system_prompt() {
        let client = OpenAiDraftClient::new(
            "https://api.openai.com/v1".to_string(),
            None,
            "gpt-4o-mini".to_string(),
            "Base prompt.".to_string(),
            5_000,
        )
        .unwrap();

        let composed = client.compose_system_prompt(Some("  keep it short  "));
        assert!(composed.starts_with("Base prompt."));
        assert!(composed.ends_with("keep it short"));
        assert_eq!(client.compose_system_prompt(None), "Base prompt.");
    }
}
