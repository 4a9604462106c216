//! Chat-completion broker answered by a human operator.
//!
//! Clients speak the OpenAI chat-completions protocol to `/v1`; each
//! request becomes a queued turn the operator resolves from the console
//! endpoints under `/operator`, optionally assisted by an LLM draft.

use std::sync::Arc;
use std::time::Duration;

use ractor::Actor;
use tokio::sync::broadcast;

pub mod actors;
pub mod api;
pub mod config;
pub mod openai;
pub mod relay;

use actors::broker::{BrokerActor, BrokerArguments};
use actors::draft::DraftClient;
use actors::trail::{TrailActor, TrailArguments, TrailSink};
use shared_types::CopilotMode;

/// Spawn the actor system and return the shared HTTP state. Used by the
/// server binary and by integration tests, which plug in scripted draft
/// clients and in-memory trail sinks.
pub async fn spawn_system(
    draft_client: Arc<dyn DraftClient>,
    trail_sink: Arc<dyn TrailSink>,
    default_mode: CopilotMode,
    draft_timeout: Duration,
    served_model_id: String,
) -> Result<api::ApiState, ractor::SpawnErr> {
    let (trail, _trail_handle) =
        Actor::spawn(None, TrailActor, TrailArguments { sink: trail_sink }).await?;

    let (events, _) = broadcast::channel(256);

    let (broker, _broker_handle) = Actor::spawn(
        None,
        BrokerActor,
        BrokerArguments {
            draft_client,
            trail,
            default_mode,
            draft_timeout,
            events: events.clone(),
        },
    )
    .await?;

    Ok(api::ApiState {
        broker,
        events,
        served_model_id,
    })
}
