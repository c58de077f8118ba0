//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use sonar_control::{ExecutorEvent, WatchdogEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, DaemonEvent, SampleSummary};

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "sample")]
    Sample(SampleSummary),
    #[serde(rename = "executor")]
    Executor(ExecutorEvent),
    #[serde(rename = "watchdog")]
    Watchdog(WatchdogEvent),
    #[serde(rename = "lagged")]
    Lagged { skipped: u64 },
    #[serde(rename = "pong")]
    Pong,
}

impl From<DaemonEvent> for WsMessage {
    fn from(event: DaemonEvent) -> Self {
        match event {
            DaemonEvent::Sample(s) => WsMessage::Sample(s),
            DaemonEvent::Executor(e) => WsMessage::Executor(e),
            DaemonEvent::Watchdog(w) => WsMessage::Watchdog(w),
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();

    info!("WebSocket client connected");

    loop {
        tokio::select! {
            // Forward daemon events to client
            event = events.recv() => {
                let msg = match event {
                    Ok(event) => WsMessage::from(event),
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Event channel lagged");
                        WsMessage::Lagged { skipped: n }
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Ok(json) = serde_json::to_string(&msg) {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Handle ping/pong for keepalive
                        if text.as_str() == "ping" {
                            state.watchdog.touch();
                            if let Ok(pong) = serde_json::to_string(&WsMessage::Pong) {
                                if sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
