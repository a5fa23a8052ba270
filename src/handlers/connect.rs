use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::AppState;
use crate::coordinator::{Coordinator, Session};
use crate::models::WireMessage;

/// `POST /connect` (Upgrade: websocket): opens one shard session.
pub async fn connect(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state.coordinator.clone()))
}

async fn handle_session(socket: WebSocket, coordinator: Arc<Coordinator>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut inbox) = mpsc::unbounded_channel::<WireMessage>();
    let replies = outbound.clone();
    let mut session = Session::new(coordinator, outbound);

    // Single writer: session replies and flush-time acks share one channel.
    let writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("failed to serialize wire message: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                match serde_json::from_str::<WireMessage>(&text) {
                    Ok(wire) => {
                        for reply in session.handle(wire) {
                            let _ = replies.send(reply);
                        }
                    }
                    Err(e) => {
                        let _ = replies.send(WireMessage::Error {
                            code: "validation".to_string(),
                            message: format!("malformed message: {e}"),
                        });
                    }
                }
                if session.is_terminal() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum; pongs and binary frames are noise.
            _ => {}
        }
    }

    session.handle_close();
    drop(session);
    drop(replies);
    let _ = writer.await;
}
