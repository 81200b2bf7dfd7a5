//! Account API
//!
//! - POST /api/accounts - Open an account (idempotent)
//! - GET /api/accounts/:uid - Profile with demo countdown
//! - GET /api/accounts/:uid/balances - Demo and live balances
//! - GET /api/accounts/:uid/:account/positions - Positions of one account
//! - GET /api/accounts/:uid/:account/summary - Positions valued at market
//! - GET /api/accounts/:uid/trades - Trade log, newest first
//! - GET /api/accounts/:uid/notifications - Notifications, newest first
//! - PUT /api/accounts/:uid/notifications/read - Mark notifications read
//! - POST /api/accounts/:uid/deposit - Credit the live balance
//! - POST /api/accounts/:uid/kyc - Submit identity verification
//! - POST /api/accounts/:uid/kyc/review - Approve or reject verification

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::{
    AccountType, Asset, Balances, MarkReadRequest, Notification, PortfolioSummary, Trade,
    UserProfile,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(open_account))
        .route("/:uid", get(get_profile))
        .route("/:uid/balances", get(get_balances))
        .route("/:uid/trades", get(get_trades))
        .route("/:uid/notifications", get(get_notifications))
        .route("/:uid/notifications/read", put(mark_read))
        .route("/:uid/deposit", post(deposit))
        .route("/:uid/kyc", post(submit_kyc))
        .route("/:uid/kyc/review", post(review_kyc))
        .route("/:uid/:account/positions", get(get_positions))
        .route("/:uid/:account/summary", get(get_summary))
}

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub demo_expired: bool,
    pub demo_days_left: i64,
}

impl ProfileResponse {
    fn new(profile: UserProfile) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            demo_expired: profile.demo_expired(now),
            demo_days_left: profile.demo_days_left(now),
            profile,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approved: bool,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub leverage: Option<f64>,
}

fn parse_account(account: &str) -> Result<AccountType> {
    AccountType::parse(account)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown account type: {}", account)))
}

// =============================================================================
// Handlers
// =============================================================================

async fn open_account(
    State(state): State<AppState>,
    Json(request): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProfileResponse>>)> {
    if request.uid.trim().is_empty() {
        return Err(AppError::BadRequest("uid is required".to_string()));
    }
    let profile = state
        .ledger
        .open_account(&request.uid, &request.name, &request.email)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(ProfileResponse::new(profile)))))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let profile = state.ledger.profile(&uid)?;
    Ok(Json(ApiResponse::new(ProfileResponse::new(profile))))
}

async fn get_balances(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ApiResponse<Balances>>> {
    Ok(Json(ApiResponse::new(state.ledger.balances(&uid)?)))
}

async fn get_positions(
    State(state): State<AppState>,
    Path((uid, account)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<Asset>>>> {
    let account = parse_account(&account)?;
    Ok(Json(ApiResponse::new(state.ledger.positions(&uid, account)?)))
}

async fn get_summary(
    State(state): State<AppState>,
    Path((uid, account)): Path<(String, String)>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<ApiResponse<PortfolioSummary>>> {
    let account = parse_account(&account)?;
    let config = state.ledger.config();
    let leverage = query
        .leverage
        .unwrap_or(config.min_leverage)
        .clamp(config.min_leverage, config.max_leverage);
    let summary = state
        .ledger
        .summary(&uid, account, &state.feed.prices(), leverage)?;
    Ok(Json(ApiResponse::new(summary)))
}

async fn get_trades(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ApiResponse<Vec<Trade>>>> {
    let mut trades = state.ledger.trades(&uid)?;
    trades.reverse();
    Ok(Json(ApiResponse::new(trades)))
}

async fn get_notifications(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ApiResponse<Vec<Notification>>>> {
    let mut notifications = state.ledger.notifications(&uid)?;
    notifications.reverse();
    Ok(Json(ApiResponse::new(notifications)))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<MarkReadRequest>,
) -> Result<StatusCode> {
    state.ledger.mark_notifications_read(&uid, request.ids)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deposit(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<ApiResponse<Balances>>> {
    Ok(Json(ApiResponse::new(state.ledger.deposit(&uid, request.amount)?)))
}

async fn submit_kyc(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let profile = state.ledger.submit_kyc(&uid)?;
    Ok(Json(ApiResponse::new(ProfileResponse::new(profile))))
}

async fn review_kyc(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let profile = state.ledger.review_kyc(&uid, request.approved)?;
    Ok(Json(ApiResponse::new(ProfileResponse::new(profile))))
}
