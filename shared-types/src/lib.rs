//! Shared types between the broker and the operator dashboard
//!
//! Everything here crosses the process boundary as JSON, either over the
//! operator REST/WebSocket surface or into the experiment trail, so all
//! types are serde round-trippable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Core Types
// ============================================================================

/// Unique identifier for a conversation turn.
///
/// The same value doubles as the OpenAI-visible completion id, so it uses
/// the `chatcmpl-` prefix clients expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn generate() -> Self {
        Self(format!(
            "chatcmpl-{}",
            ulid::Ulid::new().to_string().to_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message author role after normalization.
///
/// The inbound API also accepts `developer`, which normalizes to `System`
/// before it reaches any of these types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One normalized message of a turn's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

// ============================================================================
// Copilot Mode
// ============================================================================

/// Process-wide policy for how a turn gets its final text.
///
/// Closed on purpose: every dispatch site matches exhaustively, so adding
/// a mode is a compile-checked change. Changes apply only to turns created
/// after the change; in-flight turns keep the mode captured at creation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CopilotMode {
    /// No draft is generated; the operator authors the reply alone.
    Disabled,
    /// A draft is generated and offered; the operator decides.
    Draft,
    /// A ready draft is submitted automatically unless the operator
    /// claimed the turn first.
    Auto,
}

// ============================================================================
// Turn Lifecycle
// ============================================================================

/// Lifecycle state of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Created,
    Queued,
    Claimed,
    Retired,
    Aborted,
}

/// How a turn reached its terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Retired,
    Aborted,
}

// ============================================================================
// Drafts
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Ready,
    Cancelled,
    Failed,
}

/// Draft state as exposed to the operator dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftView {
    pub status: DraftStatus,
    pub text: Option<String>,
    pub error: Option<String>,
    /// Set when the operator session that saw this draft disconnected.
    /// Stale drafts stay usable; they are never regenerated automatically.
    pub stale: bool,
}

// ============================================================================
// Operator Surface Views
// ============================================================================

/// Queue entry summary for the dashboard list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnSummary {
    pub turn_id: TurnId,
    pub created_at: DateTime<Utc>,
    pub mode: CopilotMode,
    pub state: TurnState,
    pub model: String,
    pub stream: bool,
    /// Content of the most recent user message, truncated for display.
    pub preview: String,
    pub draft: Option<DraftView>,
}

/// Full turn view for the operator's editor pane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnDetail {
    #[serde(flatten)]
    pub summary: TurnSummary,
    pub messages: Vec<ChatMessage>,
}

// ============================================================================
// Experiment Trail
// ============================================================================

/// The logged triad for offline comparison: what the user asked, what the
/// model drafted, what the human finally sent. Immutable once emitted;
/// exactly one per terminal turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    pub turn_id: TurnId,
    pub messages: Vec<ChatMessage>,
    /// Generated draft text, if one reached Ready before disposition.
    pub draft: Option<String>,
    /// Final text sent to the client. None for an abort before any output.
    pub final_text: Option<String>,
    pub mode: CopilotMode,
    pub outcome: TurnOutcome,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

// ============================================================================
// Operator Event Protocol (WebSocket, server → client)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorEvent {
    /// The pending queue went from empty to non-empty.
    QueueChanged { size: usize },
    DraftReady { turn_id: TurnId },
    DraftFailed { turn_id: TurnId, error: String },
    TurnRetired { turn_id: TurnId },
    TurnAborted { turn_id: TurnId },
}

// ============================================================================
// API Types
// ============================================================================

/// Generic operator-API response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_turn_id_generation() {
        let id1 = TurnId::generate();
        let id2 = TurnId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("chatcmpl-"));
        assert_eq!(id1.as_str(), id1.as_str().to_lowercase());
    }

    #[test]
    fn test_copilot_mode_round_trip() {
        assert_eq!(CopilotMode::from_str("auto").unwrap(), CopilotMode::Auto);
        assert_eq!(CopilotMode::Draft.to_string(), "draft");
        let json = serde_json::to_string(&CopilotMode::Disabled).unwrap();
        assert_eq!(json, "\"disabled\"");
    }

    #[test]
    fn test_operator_event_tagged_serialization() {
        let event = OperatorEvent::QueueChanged { size: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "queue_changed");
        assert_eq!(json["size"], 3);
    }

    #[test]
    fn test_experiment_record_serialization() {
        let record = ExperimentRecord {
            turn_id: TurnId::generate(),
            messages: vec![ChatMessage::new(Role::User, "hi")],
            draft: None,
            final_text: Some("Hi there!".to_string()),
            mode: CopilotMode::Draft,
            outcome: TurnOutcome::Retired,
            created_at: Utc::now(),
            completed_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: ExperimentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_role_lowercase_wire_format() {
        let msg = ChatMessage::new(Role::Assistant, "ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
