//! WebSocket handler for the operator event feed.
//!
//! Pushes queue and draft notifications to the operator surface; when the
//! socket closes the broker releases any claims so turns never sit locked
//! by a dead console.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;

use crate::actors::broker::BrokerMsg;
use crate::api::ApiState;

pub async fn operator_websocket(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_operator_socket(socket, state))
}

async fn handle_operator_socket(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    tracing::info!("Operator websocket connected");

    let _ = sender
        .send(Message::Text(
            json!({"type": "connected"}).to_string().into(),
        ))
        .await;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(text) => {
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to serialize operator event");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Operator event feed lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            maybe_msg = receiver.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: serde_json::Value =
                            serde_json::from_str(&text).unwrap_or_else(|_| json!({}));
                        if parsed.get("type").and_then(|v| v.as_str()) == Some("ping") {
                            let pong = json!({"type": "pong"}).to_string();
                            if sender.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Operator websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    // Claims held by this console must not outlive it.
    let _ = state.broker.cast(BrokerMsg::OperatorGone);
    tracing::info!("Operator websocket closed");
}
