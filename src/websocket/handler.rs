use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::room_manager::{account_room, RoomManager};
use crate::services::{AccountLedger, MarketFeed};
use crate::types::{ClientMessage, ServerMessage};
use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create a channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Register the client
    let client_id = state.room_manager.register(tx);
    info!("WebSocket client connected: {}", client_id);

    // Current feed liveness first
    send_message(
        &state.room_manager,
        client_id,
        &ServerMessage::FeedStatus {
            status: state.feed.status(),
        },
    );

    // Spawn a task to forward messages from the channel to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                debug!("Received message from {}: {}", client_id, text);
                handle_message(&state, client_id, &text);
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnecting: {}", client_id);
                break;
            }
            Ok(Message::Ping(_)) => {
                // Pong is handled automatically by axum
                debug!("Received ping from {}", client_id);
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", client_id, e);
                break;
            }
            _ => {}
        }
    }

    // Clean up
    state.room_manager.unregister(client_id);
    send_task.abort();
    info!("WebSocket client disconnected: {}", client_id);
}

fn handle_message(state: &AppState, client_id: Uuid, text: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            send_error(&state.room_manager, client_id, &format!("Invalid message: {}", e));
            return;
        }
    };

    match msg {
        ClientMessage::Subscribe { symbols } => {
            let (tracked, unknown): (Vec<String>, Vec<String>) = symbols
                .into_iter()
                .map(|s| s.trim().to_uppercase())
                .partition(|s| state.feed.is_tracked(s));
            if !unknown.is_empty() {
                send_error(
                    &state.room_manager,
                    client_id,
                    &format!("Unknown instruments: {}", unknown.join(", ")),
                );
            }

            let subscribed = state.room_manager.subscribe(client_id, &tracked);
            debug!("Client {} subscribed to: {:?}", client_id, subscribed);
            send_message(
                &state.room_manager,
                client_id,
                &ServerMessage::Subscribed { symbols: subscribed },
            );
        }
        ClientMessage::Unsubscribe { symbols } => {
            let unsubscribed = state.room_manager.unsubscribe(client_id, &symbols);
            debug!("Client {} unsubscribed from: {:?}", client_id, unsubscribed);
            send_message(
                &state.room_manager,
                client_id,
                &ServerMessage::Unsubscribed {
                    symbols: unsubscribed,
                },
            );
        }
        ClientMessage::WatchAccount { user_id } => {
            if state.room_manager.watch_account(client_id, &user_id) {
                debug!("Client {} watching account {}", client_id, user_id);
            }
            send_message(
                &state.room_manager,
                client_id,
                &ServerMessage::Subscribed {
                    symbols: vec![account_room(&user_id)],
                },
            );
        }
        ClientMessage::UnwatchAccount { user_id } => {
            state.room_manager.unwatch_account(client_id, &user_id);
            send_message(
                &state.room_manager,
                client_id,
                &ServerMessage::Unsubscribed {
                    symbols: vec![account_room(&user_id)],
                },
            );
        }
    }
}

fn send_message(room_manager: &RoomManager, client_id: Uuid, msg: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        room_manager.send(client_id, json);
    }
}

fn send_error(room_manager: &RoomManager, client_id: Uuid, error: &str) {
    let msg = ServerMessage::Error {
        error: error.to_string(),
    };
    send_message(room_manager, client_id, &msg);
}

/// Fan feed ticks, feed status and account events out to the rooms.
pub fn spawn_broadcasters(
    room_manager: Arc<RoomManager>,
    feed: Arc<MarketFeed>,
    ledger: Arc<AccountLedger>,
) -> Vec<JoinHandle<()>> {
    let ticks = {
        let room_manager = room_manager.clone();
        let mut rx = feed.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(tick) => {
                        let room = tick.symbol.clone();
                        let msg = ServerMessage::PriceUpdate { data: tick };
                        if let Ok(json) = serde_json::to_string(&msg) {
                            room_manager.broadcast(&room, &json);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("Tick broadcaster lagged by {}", n),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let status = {
        let room_manager = room_manager.clone();
        let mut rx = feed.watch_status();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let status = rx.borrow_and_update().clone();
                let msg = ServerMessage::FeedStatus { status };
                if let Ok(json) = serde_json::to_string(&msg) {
                    room_manager.broadcast_all(&json);
                }
            }
        })
    };

    let accounts = {
        let mut rx = ledger.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let room = account_room(&event.user_id);
                        let msg = ServerMessage::AccountUpdate { data: event };
                        if let Ok(json) = serde_json::to_string(&msg) {
                            room_manager.broadcast(&room, &json);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("Account broadcaster lagged by {}", n),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    vec![ticks, status, accounts]
}
