//! Operator API route handlers.
//!
//! All endpoints return JSON. Callers identify themselves with an account
//! field in the request body; the surface is meant for a trusted operator
//! network, not the open internet.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::engine::registry::BetRegistry;
use crate::feed::reporter::ReportedPriceFeed;
use crate::feed::PriceFeed;
use crate::ledger::memory::InMemoryLedger;
use crate::types::{AccountId, Amount, Bet, BetId, Price, SettlementResult, Side, WagerError};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub registry: Arc<BetRegistry>,
    pub ledger: Arc<InMemoryLedger>,
    pub feed: Arc<dyn PriceFeed>,
    /// Present only when prices are pushed by a reporter.
    pub reporter: Option<Arc<ReportedPriceFeed>>,
    pub clock: Arc<dyn Clock>,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Wager(WagerError),
    Unavailable(String),
}

impl From<WagerError> for ApiError {
    fn from(e: WagerError) -> Self {
        Self::Wager(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Wager(e) => match e {
                WagerError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
                WagerError::NotFound(_) => StatusCode::NOT_FOUND,
                WagerError::Unauthorized(_) => StatusCode::FORBIDDEN,
                WagerError::InvalidState(_)
                | WagerError::Expired(_)
                | WagerError::NotYetCloseable(_)
                | WagerError::AlreadyClosed(_) => StatusCode::CONFLICT,
                WagerError::EscrowFailure(_) => StatusCode::PAYMENT_REQUIRED,
                WagerError::PayoutFailure(_) | WagerError::PriceFeed(_) => StatusCode::BAD_GATEWAY,
            },
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Wager(e) => e.to_string(),
            Self::Unavailable(msg) => msg.clone(),
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "Request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBetRequest {
    pub caller: AccountId,
    pub amount: Amount,
    pub joining_deadline: DateTime<Utc>,
    pub closing_time: DateTime<Utc>,
    pub side: Side,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateBetResponse {
    pub bet_id: BetId,
}

/// Body for join and close.
#[derive(Debug, Clone, Deserialize)]
pub struct CallerRequest {
    pub caller: AccountId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportPriceRequest {
    pub caller: AccountId,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceResponse {
    pub price: Decimal,
    pub micros: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApproveRequest {
    pub owner: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountResponse {
    pub account: AccountId,
    pub balance: Amount,
    pub allowance: Amount,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/bets
pub async fn list_bets(State(state): State<AppState>) -> Json<Vec<Bet>> {
    Json(state.registry.list_bets().await)
}

/// GET /api/bets/:id
pub async fn get_bet(State(state): State<AppState>, Path(id): Path<BetId>) -> ApiResult<Bet> {
    Ok(Json(state.registry.get_bet(id).await?))
}

/// POST /api/bets
pub async fn create_bet(
    State(state): State<AppState>,
    Json(req): Json<CreateBetRequest>,
) -> Result<(StatusCode, Json<CreateBetResponse>), ApiError> {
    let bet_id = state
        .registry
        .create_bet(
            &req.caller,
            req.amount,
            req.joining_deadline,
            req.closing_time,
            req.side,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(CreateBetResponse { bet_id })))
}

/// POST /api/bets/:id/join
pub async fn join_bet(
    State(state): State<AppState>,
    Path(id): Path<BetId>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<Bet> {
    state.registry.join_bet(&req.caller, id).await?;
    Ok(Json(state.registry.get_bet(id).await?))
}

/// POST /api/bets/:id/close
pub async fn close_bet(
    State(state): State<AppState>,
    Path(id): Path<BetId>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<SettlementResult> {
    Ok(Json(state.registry.close_bet(&req.caller, id).await?))
}

/// GET /api/price
pub async fn get_price(State(state): State<AppState>) -> ApiResult<PriceResponse> {
    let price = state
        .feed
        .current_price()
        .await
        .map_err(|e| ApiError::Unavailable(format!("Price unavailable: {e}")))?;
    let reported_at = state
        .reporter
        .as_ref()
        .and_then(|r| r.latest())
        .map(|report| report.reported_at);
    Ok(Json(PriceResponse {
        price: price.to_decimal(),
        micros: price.micros(),
        reported_at,
    }))
}

/// POST /api/price (reporter only)
pub async fn report_price(
    State(state): State<AppState>,
    Json(req): Json<ReportPriceRequest>,
) -> ApiResult<PriceResponse> {
    let Some(reporter) = state.reporter.as_ref() else {
        return Err(ApiError::Unavailable(
            "Price reporting is not enabled for this feed".to_string(),
        ));
    };
    let price = Price::from_decimal(req.price).ok_or_else(|| {
        WagerError::InvalidParameters(format!("price must be positive, got {}", req.price))
    })?;
    let now = state.clock.now();
    reporter.report(&req.caller, price, now)?;
    Ok(Json(PriceResponse {
        price: price.to_decimal(),
        micros: price.micros(),
        reported_at: Some(now),
    }))
}

/// GET /api/ledger/:account
pub async fn get_account(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Json<AccountResponse> {
    let account = AccountId::new(account);
    Json(AccountResponse {
        balance: state.ledger.balance_of(&account),
        allowance: state.ledger.allowance(&account),
        account,
    })
}

/// POST /api/ledger/approve
pub async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Json<AccountResponse> {
    state.ledger.approve(&req.owner, req.amount);
    Json(AccountResponse {
        balance: state.ledger.balance_of(&req.owner),
        allowance: state.ledger.allowance(&req.owner),
        account: req.owner,
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
