//! WiseCrypto - leveraged demo/live trading ledger over a live crypto feed

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;
pub mod websocket;

use axum::{routing::get, Router};
use config::Config;
use services::{AccountLedger, AccountStore, MarketFeed, WatchlistStore};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use websocket::RoomManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub feed: Arc<MarketFeed>,
    pub ledger: Arc<AccountLedger>,
    pub watchlist: Arc<WatchlistStore>,
    pub room_manager: Arc<RoomManager>,
}

impl AppState {
    /// Wire the services over one account store. The feed starts empty.
    pub fn new(config: Config, store: Arc<dyn AccountStore>) -> Self {
        let feed = MarketFeed::new(&config.feed);
        let ledger = Arc::new(AccountLedger::new(store.clone(), config.ledger.clone()));
        let watchlist = Arc::new(WatchlistStore::new(store));

        Self {
            config: Arc::new(config),
            feed,
            ledger,
            watchlist,
            room_manager: RoomManager::new(),
        }
    }
}

/// Build the HTTP and WebSocket router.
pub fn app(state: AppState) -> Router {
    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::router())
        .route("/ws", get(websocket::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
