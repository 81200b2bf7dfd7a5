//! Watchlist API
//!
//! - GET /api/watchlist/:uid - The user's watchlist
//! - POST /api/watchlist/:uid - Add a symbol
//! - DELETE /api/watchlist/:uid/:symbol - Remove a symbol

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;

use super::ApiResponse;
use crate::error::Result;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:uid", get(get_watchlist).post(add_symbol))
        .route("/:uid/:symbol", delete(remove_symbol))
}

#[derive(Debug, Deserialize)]
pub struct AddSymbolRequest {
    pub symbol: String,
}

async fn get_watchlist(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ApiResponse<Vec<String>>>> {
    Ok(Json(ApiResponse::new(state.watchlist.get(&uid)?)))
}

async fn add_symbol(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<AddSymbolRequest>,
) -> Result<Json<ApiResponse<Vec<String>>>> {
    Ok(Json(ApiResponse::new(state.watchlist.add(&uid, &request.symbol)?)))
}

async fn remove_symbol(
    State(state): State<AppState>,
    Path((uid, symbol)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<String>>>> {
    Ok(Json(ApiResponse::new(state.watchlist.remove(&uid, &symbol)?)))
}
