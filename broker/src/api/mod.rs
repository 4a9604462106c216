//! HTTP surface: the OpenAI-compatible client face on `/v1` and the
//! operator console face under `/operator`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ractor::ActorRef;
use serde_json::json;
use tokio::sync::broadcast;

use crate::actors::broker::BrokerMsg;
use shared_types::OperatorEvent;

pub mod completions;
pub mod operator;
pub mod websocket;

#[derive(Clone)]
pub struct ApiState {
    pub broker: ActorRef<BrokerMsg>,
    pub events: broadcast::Sender<OperatorEvent>,
    pub served_model_id: String,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health_check))
        // Client face
        .route("/v1/chat/completions", post(completions::create_chat_completion))
        .route("/v1/models", get(completions::list_models))
        // Operator face
        .route("/operator/queue", get(operator::list_queue))
        .route("/operator/queue/current", get(operator::current_turn))
        .route("/operator/turns/{turn_id}", get(operator::get_turn))
        .route("/operator/turns/{turn_id}/claim", post(operator::claim_turn))
        .route("/operator/turns/{turn_id}/submit", post(operator::submit_final))
        .route("/operator/turns/{turn_id}/append", post(operator::append_delta))
        .route("/operator/turns/{turn_id}/finish", post(operator::finish_stream))
        .route(
            "/operator/turns/{turn_id}/regenerate",
            post(operator::regenerate_draft),
        )
        .route(
            "/operator/mode",
            get(operator::get_mode).put(operator::set_mode),
        )
        .route("/operator/ws", get(websocket::operator_websocket))
        .fallback(completions::not_found)
}

/// Health check endpoint
pub async fn health_check(State(_state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
        "status": "healthy",
        "service": "human-chat-completions",
        "version": "0.1.0"
        })),
    )
}

/// Root banner so a browser hitting the base URL sees what this is.
pub async fn banner(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "service": "human-chat-completions",
            "description": "OpenAI-compatible chat completions answered by a human operator",
            "model": state.served_model_id,
            "endpoints": ["/v1/chat/completions", "/v1/models", "/operator/queue", "/operator/ws"],
        })),
    )
}
