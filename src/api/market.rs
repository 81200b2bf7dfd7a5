//! Market API
//!
//! - GET /api/market - All tracked quotes
//! - GET /api/market/movers - Largest absolute 24h changes
//! - GET /api/market/status - Feed liveness
//! - GET /api/market/:symbol - One quote with its price history
//! - GET /api/market/:symbol/orderbook - Illustrative order book

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::ApiResponse;
use crate::error::Result;
use crate::services::order_book;
use crate::types::{FeedStatus, MarketData, OrderBook};
use crate::AppState;

const DEFAULT_MOVERS: usize = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_market))
        .route("/movers", get(get_movers))
        .route("/status", get(get_status))
        .route("/:symbol", get(get_quote))
        .route("/:symbol/orderbook", get(get_order_book))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

async fn get_market(State(state): State<AppState>) -> Json<ApiResponse<Vec<MarketData>>> {
    Json(ApiResponse::new(state.feed.quotes()))
}

async fn get_movers(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<ApiResponse<Vec<MarketData>>> {
    let limit = query.limit.unwrap_or(DEFAULT_MOVERS);
    Json(ApiResponse::new(state.feed.top_movers(limit)))
}

async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<FeedStatus>> {
    Json(ApiResponse::new(state.feed.status()))
}

async fn get_quote(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<MarketData>>> {
    let quote = state.feed.quote(&symbol.to_uppercase())?;
    Ok(Json(ApiResponse::new(quote)))
}

async fn get_order_book(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<ApiResponse<OrderBook>>> {
    let quote = state.feed.quote(&symbol.to_uppercase())?;
    let depth = query.depth.unwrap_or(order_book::DEFAULT_DEPTH).min(50);
    Ok(Json(ApiResponse::new(order_book::illustrative(
        &quote.symbol,
        quote.price,
        depth,
    ))))
}
