//! Operator console endpoints: queue inspection, claiming, disposition,
//! draft regeneration, and copilot mode control.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::actors::broker::{BrokerError, BrokerMsg, SubmitOutcome};
use crate::api::ApiState;
use shared_types::{ApiResponse, CopilotMode, TurnId};

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendBody {
    pub delta: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegenerateBody {
    #[serde(default)]
    pub instruction: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModeBody {
    pub mode: CopilotMode,
}

#[derive(Debug, Serialize)]
pub struct DispositionResponse {
    pub outcome: &'static str,
}

impl From<SubmitOutcome> for DispositionResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        Self {
            outcome: match outcome {
                SubmitOutcome::Delivered => "delivered",
                SubmitOutcome::Superseded => "superseded",
            },
        }
    }
}

pub async fn list_queue(State(state): State<ApiState>) -> impl IntoResponse {
    match ractor::call!(state.broker, |reply| BrokerMsg::QueueList { reply }) {
        Ok(list) => (StatusCode::OK, Json(ApiResponse::ok(list))),
        Err(e) => rpc_error(e),
    }
}

pub async fn current_turn(State(state): State<ApiState>) -> impl IntoResponse {
    match ractor::call!(state.broker, |reply| BrokerMsg::CurrentTurn { reply }) {
        Ok(current) => (StatusCode::OK, Json(ApiResponse::ok(current))),
        Err(e) => rpc_error(e),
    }
}

pub async fn get_turn(
    State(state): State<ApiState>,
    Path(turn_id): Path<String>,
) -> impl IntoResponse {
    let turn_id = TurnId(turn_id);
    match ractor::call!(state.broker, |reply| BrokerMsg::GetTurn {
        turn_id: turn_id.clone(),
        reply,
    }) {
        Ok(Some(detail)) => (StatusCode::OK, Json(ApiResponse::ok(detail))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err(format!("turn not found: {turn_id}"))),
        ),
        Err(e) => rpc_error(e),
    }
}

pub async fn claim_turn(
    State(state): State<ApiState>,
    Path(turn_id): Path<String>,
) -> impl IntoResponse {
    match ractor::call!(state.broker, |reply| BrokerMsg::Claim {
        turn_id: TurnId(turn_id),
        reply,
    }) {
        Ok(Ok(summary)) => (StatusCode::OK, Json(ApiResponse::ok(summary))),
        Ok(Err(e)) => broker_error(e),
        Err(e) => rpc_error(e),
    }
}

pub async fn submit_final(
    State(state): State<ApiState>,
    Path(turn_id): Path<String>,
    Json(body): Json<SubmitBody>,
) -> impl IntoResponse {
    match ractor::call!(state.broker, |reply| BrokerMsg::SubmitFinal {
        turn_id: TurnId(turn_id),
        text: body.text,
        reply,
    }) {
        Ok(Ok(outcome)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(DispositionResponse::from(outcome))),
        ),
        Ok(Err(e)) => broker_error(e),
        Err(e) => rpc_error(e),
    }
}

pub async fn append_delta(
    State(state): State<ApiState>,
    Path(turn_id): Path<String>,
    Json(body): Json<AppendBody>,
) -> impl IntoResponse {
    match ractor::call!(state.broker, |reply| BrokerMsg::AppendDelta {
        turn_id: TurnId(turn_id),
        delta: body.delta,
        reply,
    }) {
        Ok(Ok(outcome)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(DispositionResponse::from(outcome))),
        ),
        Ok(Err(e)) => broker_error(e),
        Err(e) => rpc_error(e),
    }
}

pub async fn finish_stream(
    State(state): State<ApiState>,
    Path(turn_id): Path<String>,
) -> impl IntoResponse {
    match ractor::call!(state.broker, |reply| BrokerMsg::FinishStream {
        turn_id: TurnId(turn_id),
        reply,
    }) {
        Ok(Ok(outcome)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(DispositionResponse::from(outcome))),
        ),
        Ok(Err(e)) => broker_error(e),
        Err(e) => rpc_error(e),
    }
}

pub async fn regenerate_draft(
    State(state): State<ApiState>,
    Path(turn_id): Path<String>,
    body: Option<Json<RegenerateBody>>,
) -> impl IntoResponse {
    let instruction = body.and_then(|Json(body)| body.instruction);
    match ractor::call!(state.broker, |reply| BrokerMsg::Regenerate {
        turn_id: TurnId(turn_id),
        instruction,
        reply,
    }) {
        Ok(Ok(())) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::ok(serde_json::json!({"status": "regenerating"}))),
        ),
        Ok(Err(e)) => broker_error(e),
        Err(e) => rpc_error(e),
    }
}

pub async fn get_mode(State(state): State<ApiState>) -> impl IntoResponse {
    match ractor::call!(state.broker, |reply| BrokerMsg::GetMode { reply }) {
        Ok(mode) => (
            StatusCode::OK,
            Json(ApiResponse::ok(serde_json::json!({"mode": mode}))),
        ),
        Err(e) => rpc_error(e),
    }
}

pub async fn set_mode(
    State(state): State<ApiState>,
    Json(body): Json<ModeBody>,
) -> impl IntoResponse {
    match ractor::call!(state.broker, |reply| BrokerMsg::SetMode {
        mode: body.mode,
        reply,
    }) {
        Ok(mode) => (
            StatusCode::OK,
            Json(ApiResponse::ok(serde_json::json!({"mode": mode}))),
        ),
        Err(e) => rpc_error(e),
    }
}

// ----------------------------------------------------------------------------
// Error mapping
// ----------------------------------------------------------------------------

fn broker_error<T>(e: BrokerError) -> (StatusCode, Json<ApiResponse<T>>) {
    let status = match &e {
        BrokerError::TurnNotFound(_) => StatusCode::NOT_FOUND,
        BrokerError::EmptyText => StatusCode::BAD_REQUEST,
        BrokerError::AlreadyStreaming => StatusCode::CONFLICT,
    };
    (status, Json(ApiResponse::err(e.to_string())))
}

fn rpc_error<T, E: std::fmt::Display>(e: E) -> (StatusCode, Json<ApiResponse<T>>) {
    tracing::error!(error = %e, "Broker RPC failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::err("the broker is unavailable".to_string())),
    )
}
