use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::stream::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::app::AppState;

/// Answer to a client text frame, if any.
pub fn reply_to(text: &str) -> Option<String> {
    match text.trim() {
        "ping" => Some(json!({"type": "pong"}).to_string()),
        _ => None,
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.events.subscribe();
    println!("🔌 [WS] client connected ({} listening)", state.events.receiver_count());

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(payload) = serde_json::to_string(&event) else {
                        eprintln!("❌ [WS] failed to serialize event");
                        continue;
                    };
                    if socket.send(Message::Text(Utf8Bytes::from(payload))).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("⚠️ [WS] slow client skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            msg = socket.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = reply_to(text.as_str()) {
                        if socket.send(Message::Text(Utf8Bytes::from(reply))).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if socket.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    eprintln!("⚠️ [WS] receive error: {}", e);
                    break;
                }
            },
        }
    }

    println!("🔌 [WS] client disconnected");
}
