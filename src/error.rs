use crate::services::{FeedError, LedgerError, WatchlistError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Watchlist(#[from] WatchlistError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Ledger(e) => return e.into_response(),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Feed(e @ FeedError::UnknownInstrument(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            AppError::Feed(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            AppError::Watchlist(e @ WatchlistError::InvalidSymbol(_)) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::Watchlist(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Error body for declined ledger operations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<f64>,
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::DemoExpired => "DEMO_EXPIRED",
            LedgerError::InsufficientMargin { .. } => "INSUFFICIENT_MARGIN",
            LedgerError::InsufficientHoldings { .. } => "INSUFFICIENT_HOLDINGS",
            LedgerError::UnknownInstrument(_) => "UNKNOWN_INSTRUMENT",
            LedgerError::InvalidOrder(_) => "INVALID_ORDER",
            LedgerError::LeverageOutOfRange { .. } => "LEVERAGE_OUT_OF_RANGE",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::KycTransition { .. } => "KYC_TRANSITION",
            LedgerError::StoreWriteFailed(_) => "STORE_WRITE_FAILED",
            LedgerError::StoreReadFailed(_) => "STORE_READ_FAILED",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            LedgerError::DemoExpired => StatusCode::FORBIDDEN,
            LedgerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::UnknownInstrument(_) => StatusCode::NOT_FOUND,
            LedgerError::KycTransition { .. } => StatusCode::CONFLICT,
            LedgerError::StoreWriteFailed(_) | LedgerError::StoreReadFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            shortfall: self.shortfall(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
