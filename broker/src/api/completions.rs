//! Client-facing OpenAI-compatible endpoints.
//!
//! `POST /v1/chat/completions` holds the connection open until the
//! operator (or the Auto-mode draft) releases it. Disconnect detection
//! works by drop: the guard travels with the response future or the SSE
//! stream, and if either is dropped before the turn completes the broker
//! hears `ClientGone`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::Stream;
use ractor::ActorRef;
use serde_json::json;
use tokio::sync::mpsc;

use crate::actors::broker::{BrokerMsg, RelayEvent, TurnTicket};
use crate::api::ApiState;
use crate::openai::{error_body, normalize_messages, CreateChatCompletionRequest, ChatCompletionResponse};
use crate::relay::{ChunkFramer, DONE_SENTINEL};
use shared_types::TurnId;

/// Casts `ClientGone` on drop unless the turn completed first. Covers
/// both the non-streaming future and the SSE stream: axum drops either
/// when the client connection goes away.
struct DisconnectGuard {
    broker: ActorRef<BrokerMsg>,
    turn_id: TurnId,
    armed: bool,
}

impl DisconnectGuard {
    fn new(broker: ActorRef<BrokerMsg>, turn_id: TurnId) -> Self {
        Self {
            broker,
            turn_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::info!(turn_id = %self.turn_id, "Client connection dropped before completion");
            let _ = self.broker.cast(BrokerMsg::ClientGone {
                turn_id: self.turn_id.clone(),
            });
        }
    }
}

pub async fn create_chat_completion(
    State(state): State<ApiState>,
    payload: Result<Json<CreateChatCompletionRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return bad_request(&format!("invalid request body: {rejection}"));
        }
    };

    let messages = match normalize_messages(&request) {
        Ok(messages) => messages,
        Err(e) => return bad_request(&e.to_string()),
    };

    let ticket = match ractor::call!(state.broker, |reply| BrokerMsg::BeginTurn {
        model: request.model.clone(),
        stream: request.stream,
        messages,
        reply,
    }) {
        Ok(ticket) => ticket,
        Err(e) => {
            tracing::error!(error = %e, "Broker unavailable for new turn");
            return internal_error("the broker is unavailable");
        }
    };

    if request.stream {
        stream_completion(state, ticket).into_response()
    } else {
        buffered_completion(state, ticket).await
    }
}

// ----------------------------------------------------------------------------
// Non-streaming
// ----------------------------------------------------------------------------

async fn buffered_completion(state: ApiState, mut ticket: TurnTicket) -> Response {
    let turn_id = ticket.turn.turn_id.clone();
    let mut guard = DisconnectGuard::new(state.broker.clone(), turn_id.clone());

    let mut content = String::new();
    let mut completed = false;
    while let Some(event) = ticket.events.recv().await {
        match event {
            RelayEvent::Chunk(chunk) => content.push_str(&chunk),
            RelayEvent::Done => {
                completed = true;
                break;
            }
        }
    }

    if !completed {
        // The broker dropped the relay without a terminal event; the turn
        // was aborted out from under this request.
        return internal_error("the turn was aborted before completion");
    }
    guard.disarm();

    let response = ChatCompletionResponse::new(
        turn_id.0,
        ticket.turn.created_at.timestamp(),
        ticket.turn.model,
        content,
    );
    (StatusCode::OK, Json(response)).into_response()
}

// ----------------------------------------------------------------------------
// Streaming
// ----------------------------------------------------------------------------

enum StreamPhase {
    Open,
    Finishing,
    SendDone,
    Closed,
}

struct StreamContext {
    events: mpsc::UnboundedReceiver<RelayEvent>,
    framer: ChunkFramer,
    guard: DisconnectGuard,
    phase: StreamPhase,
}

fn stream_completion(
    state: ApiState,
    ticket: TurnTicket,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let turn_id = ticket.turn.turn_id.clone();
    let context = StreamContext {
        events: ticket.events,
        framer: ChunkFramer::new(turn_id.0.clone(), ticket.turn.model.clone()),
        guard: DisconnectGuard::new(state.broker.clone(), turn_id),
        phase: StreamPhase::Open,
    };

    let stream = futures_util::stream::unfold(context, |mut context| async move {
        loop {
            match context.phase {
                StreamPhase::Open => match context.events.recv().await {
                    Some(RelayEvent::Chunk(chunk)) => {
                        let frame = context.framer.content_frame(&chunk);
                        let event = Event::default().json_data(&frame);
                        return Some((event, context));
                    }
                    Some(RelayEvent::Done) => {
                        context.guard.disarm();
                        context.phase = StreamPhase::Finishing;
                    }
                    // Aborted: close the stream without a finish frame.
                    None => return None,
                },
                StreamPhase::Finishing => {
                    context.phase = StreamPhase::SendDone;
                    let event = Event::default().json_data(&context.framer.finish_frame());
                    return Some((event, context));
                }
                StreamPhase::SendDone => {
                    context.phase = StreamPhase::Closed;
                    return Some((Ok(Event::default().data(DONE_SENTINEL)), context));
                }
                StreamPhase::Closed => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ----------------------------------------------------------------------------
// Models and errors
// ----------------------------------------------------------------------------

pub async fn list_models(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "object": "list",
            "data": [{
                "id": state.served_model_id,
                "object": "model",
                "created": 0,
                "owned_by": "human-chat-completions",
            }],
        })),
    )
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(error_body("unknown request URL", "invalid_request_error")),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(error_body(message, "invalid_request_error")),
    )
        .into_response()
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(error_body(message, "server_error")),
    )
        .into_response()
}
