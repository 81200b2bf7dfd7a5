use super::{FeedStatus, PriceTick, StoreEvent};
use serde::{Deserialize, Serialize};

/// Incoming WebSocket message from client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        symbols: Vec<String>,
    },
    Unsubscribe {
        symbols: Vec<String>,
    },
    /// Receive account changes for a user, including other sessions' writes.
    WatchAccount {
        user_id: String,
    },
    UnwatchAccount {
        user_id: String,
    },
}

/// Outgoing WebSocket message to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PriceUpdate {
        data: PriceTick,
    },
    AccountUpdate {
        data: StoreEvent,
    },
    FeedStatus {
        status: FeedStatus,
    },
    Subscribed {
        symbols: Vec<String>,
    },
    Unsubscribed {
        symbols: Vec<String>,
    },
    Error {
        error: String,
    },
}
