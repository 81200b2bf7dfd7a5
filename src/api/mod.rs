pub mod account;
pub mod health;
pub mod market;
pub mod orders;
pub mod watchlist;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// Response envelope for successful calls.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/market", market::router())
        .nest("/api/accounts", account::router())
        .nest("/api/orders", orders::router())
        .nest("/api/watchlist", watchlist::router())
}
