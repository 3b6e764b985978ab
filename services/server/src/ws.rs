// The /ws/{user_id} handler: accept, register, then loop forwarding
// queued frames out and watching for client frames in.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use notif_protocol::WsServerFrame;
use tracing::{info, warn};

use crate::engine::Engine;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<Engine>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, engine, user_id))
}

async fn close_invalid_user(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: 4000,
            reason: "Invalid user_id".into(),
        })))
        .await;
}

async fn handle_socket(mut socket: WebSocket, engine: Arc<Engine>, user_id: String) {
    let user_id = user_id.trim().to_owned();
    if user_id.is_empty() {
        close_invalid_user(socket).await;
        return;
    }

    let Some(mut mailbox) = engine.connect(&user_id).await else {
        close_invalid_user(socket).await;
        return;
    };
    info!(user_id, instance_id = %engine.instance_id, "ws session connected");

    let client_timeout = engine.config.client_timeout();

    loop {
        tokio::select! {
            frame = mailbox.recv() => {
                match frame {
                    Some(frame) => {
                        let Ok(json) = serde_json::to_string(&frame) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Mailbox closed: this session was evicted by
                        // something other than the client (heartbeat
                        // sweep, shutdown drain). Close and stop.
                        break;
                    }
                }
            }
            incoming = tokio::time::timeout(client_timeout, socket.recv()) => {
                match incoming {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        engine.touch_activity(&user_id).await;
                        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                            if value.get("type").and_then(|v| v.as_str()) == Some("ping") {
                                let pong = WsServerFrame::Pong {
                                    timestamp: Utc::now(),
                                    instance_id: engine.instance_id.clone(),
                                };
                                if let Ok(json) = serde_json::to_string(&pong) {
                                    if socket.send(Message::Text(json.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Ping(data)))) => {
                        engine.touch_activity(&user_id).await;
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        info!(user_id, "ws session closed by client");
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        warn!(user_id, error = %e, "ws read error");
                        break;
                    }
                    Ok(Some(Ok(_))) => {
                        engine.touch_activity(&user_id).await;
                    }
                    Err(_) => {
                        warn!(user_id, "ws session timed out waiting for client activity");
                        break;
                    }
                }
            }
        }
    }

    engine.disconnect(&user_id).await;
}
