//! Environment-driven configuration.
//!
//! Everything has a workable default so `cargo run` starts a broker that
//! serves clients and the operator surface without any setup; draft
//! generation stays disabled until an upstream is configured.

use std::path::PathBuf;
use std::str::FromStr;

use shared_types::CopilotMode;

pub const DEFAULT_DRAFT_SYSTEM_PROMPT: &str = "You are drafting replies on behalf of a human chat \
operator. Based on the conversation so far, write the single most appropriate reply. Output only \
the reply text itself, with no commentary or meta remarks.";

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Copilot mode at startup; the operator can change it at runtime.
    pub default_mode: CopilotMode,
    /// Model identifier advertised by `GET /v1/models`.
    pub served_model_id: String,
    /// OpenAI-compatible base URL for draft generation, e.g.
    /// `https://api.openai.com/v1`. Unset disables draft generation.
    pub draft_base_url: Option<String>,
    pub draft_api_key: Option<String>,
    pub draft_model: String,
    pub draft_timeout_ms: u64,
    /// System prompt prepended to every draft-generation call.
    pub draft_system_prompt: String,
    /// JSONL file the default experiment-trail sink appends to.
    pub trail_path: PathBuf,
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env_or("HCC_LISTEN_ADDR", "0.0.0.0:8080"),
            default_mode: std::env::var("HCC_COPILOT_MODE")
                .ok()
                .and_then(|v| CopilotMode::from_str(v.trim()).ok())
                .unwrap_or(CopilotMode::Draft),
            served_model_id: env_or("HCC_MODEL_ID", "human"),
            draft_base_url: std::env::var("HCC_DRAFT_BASE_URL")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            draft_api_key: std::env::var("HCC_DRAFT_API_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            draft_model: env_or("HCC_DRAFT_MODEL", "gpt-4o-mini"),
            draft_timeout_ms: std::env::var("HCC_DRAFT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000)
                .clamp(1_000, 300_000),
            draft_system_prompt: env_or("HCC_DRAFT_SYSTEM_PROMPT", DEFAULT_DRAFT_SYSTEM_PROMPT),
            trail_path: PathBuf::from(env_or("HCC_TRAIL_PATH", "data/experiment_trail.jsonl")),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
