//! Orders API
//!
//! - POST /api/orders - Execute a market order
//! - POST /api/orders/preview - Margin and buying power for an order

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;

use super::ApiResponse;
use crate::error::Result;
use crate::services::FeedError;
use crate::types::{AccountType, OrderPreview, OrderReceipt, OrderRequest, OrderSide};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(place_order))
        .route("/preview", post(preview_order))
}

/// Order body. Without a price the order fills at the last market price.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderBody {
    pub user_id: String,
    pub account: AccountType,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub leverage: Option<f64>,
}

impl PlaceOrderBody {
    fn into_request(self, state: &AppState) -> Result<OrderRequest> {
        let symbol = self.symbol.trim().to_uppercase();
        let price = match self.price {
            Some(price) => price,
            None => {
                let quote = state.feed.quote(&symbol)?;
                if !quote.has_price() {
                    return Err(FeedError::UpstreamUnavailable(format!("no price for {}", symbol)).into());
                }
                quote.price
            }
        };

        Ok(OrderRequest {
            user_id: self.user_id,
            account: self.account,
            symbol,
            side: self.side,
            quantity: self.quantity,
            price,
            leverage: self.leverage.unwrap_or(1.0),
        })
    }
}

async fn place_order(
    State(state): State<AppState>,
    Json(body): Json<PlaceOrderBody>,
) -> Result<(StatusCode, Json<ApiResponse<OrderReceipt>>)> {
    let request = body.into_request(&state)?;
    let receipt = state.ledger.execute_order(&request)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(receipt))))
}

async fn preview_order(
    State(state): State<AppState>,
    Json(body): Json<PlaceOrderBody>,
) -> Result<Json<ApiResponse<OrderPreview>>> {
    let request = body.into_request(&state)?;
    Ok(Json(ApiResponse::new(state.ledger.preview_order(&request)?)))
}
