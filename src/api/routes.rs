//! API route handlers.
//!
//! All endpoints speak JSON. Services are shared via `Arc<ApiState>`;
//! permission checks belong to whoever calls the API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::activity::ActivityAccrual;
use crate::config::ActivitySettings;
use crate::ledger::AccountLedger;
use crate::types::{
    Account, AccountId, AccountStats, ActivityStats, BalanceAudit, Bet, BetId, ChannelId,
    CancellationReport, ClaimOutcome, CommunityId, IngestOutcome, LedgerError, ResolutionReport,
    RewardRunReport, Transaction, Wager,
};
use crate::wager::{OpenWager, WagerEngine};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub ledger: Arc<AccountLedger>,
    pub wagers: Arc<WagerEngine>,
    pub activity: Arc<ActivityAccrual>,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// `LedgerError` as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub retryable: bool,
}

pub fn status_for(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::AccountNotFound(_) | LedgerError::BetNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidAmount(_)
        | LedgerError::InvalidBet(_)
        | LedgerError::InvalidOption { .. }
        | LedgerError::InvalidSetting(_) => StatusCode::BAD_REQUEST,
        LedgerError::InsufficientFunds { .. }
        | LedgerError::BetNotOpen { .. }
        | LedgerError::BetNotResolvable { .. }
        | LedgerError::AlreadyWagered { .. } => StatusCode::CONFLICT,
        LedgerError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Serialization(_) | LedgerError::InvariantViolation(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = ErrorBody { error: self.0.to_string(), retryable: self.0.is_retryable() };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub account_id: AccountId,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub account: Account,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account: Account,
    pub stats: AccountStats,
    pub win_rate: f64,
    pub net_profit: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetBalanceRequest {
    pub balance: i64,
    pub admin_id: AccountId,
}

#[derive(Debug, Deserialize)]
pub struct CreateBetRequest {
    pub creator_id: AccountId,
    pub title: String,
    pub options: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BetResponse {
    pub bet: Bet,
    pub wagers: Vec<Wager>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceWagerRequest {
    pub account_id: AccountId,
    pub option: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub winning_option: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub account_id: AccountId,
    pub community_id: CommunityId,
    pub channel_id: ChannelId,
    pub message_length: usize,
    /// Defaults to the server clock.
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RewardRunRequest {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub community_id: Option<CommunityId>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed: usize,
}

// ---------------------------------------------------------------------------
// Route handlers: accounts
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// POST /api/accounts
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<RegisterResponse> {
    let (account, created) = state.ledger.get_or_create(req.account_id, &req.display_name).await?;
    Ok(Json(RegisterResponse { account, created }))
}

/// GET /api/accounts/:id
pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<AccountResponse> {
    let account = state.ledger.get_account(account_id).await?;
    let stats = account.stats();
    Ok(Json(AccountResponse {
        win_rate: stats.win_rate(),
        net_profit: stats.net_profit(),
        stats,
        account,
    }))
}

/// GET /api/accounts/:id/transactions
pub async fn get_transactions(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<Transaction>> {
    let txs = state.ledger.transactions(account_id, q.limit.unwrap_or(20)).await?;
    Ok(Json(txs))
}

/// GET /api/accounts/:id/audit
pub async fn audit_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<BalanceAudit> {
    Ok(Json(state.ledger.audit_balance(account_id).await?))
}

/// POST /api/accounts/:id/stats
pub async fn recompute_stats(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<AccountStats> {
    Ok(Json(state.ledger.recompute_stats(account_id).await?))
}

/// POST /api/accounts/:id/daily
pub async fn claim_daily(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<ClaimOutcome> {
    Ok(Json(state.ledger.claim_daily_bonus(account_id).await?))
}

/// POST /api/accounts/:id/bailout
pub async fn claim_bailout(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<ClaimOutcome> {
    Ok(Json(state.ledger.claim_bailout(account_id).await?))
}

/// PUT /api/accounts/:id/balance
pub async fn set_balance(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<SetBalanceRequest>,
) -> ApiResult<Transaction> {
    Ok(Json(state.ledger.set_balance(account_id, req.balance, req.admin_id).await?))
}

/// GET /api/accounts/:id/wagers
pub async fn get_open_wagers(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<Vec<OpenWager>> {
    Ok(Json(state.wagers.open_wagers_for(account_id).await?))
}

/// GET /api/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<Account>> {
    Ok(Json(state.ledger.leaderboard(q.limit.unwrap_or(0)).await?))
}

/// POST /api/admin/refresh-stats
pub async fn refresh_stats(State(state): State<AppState>) -> ApiResult<RefreshResponse> {
    let refreshed = state.ledger.refresh_all_stats().await?;
    Ok(Json(RefreshResponse { refreshed }))
}

/// GET /api/admin/audit
pub async fn audit_all(State(state): State<AppState>) -> ApiResult<Vec<BalanceAudit>> {
    Ok(Json(state.ledger.audit_all().await?))
}

// ---------------------------------------------------------------------------
// Route handlers: bets
// ---------------------------------------------------------------------------

/// POST /api/bets
pub async fn create_bet(
    State(state): State<AppState>,
    Json(req): Json<CreateBetRequest>,
) -> Result<(StatusCode, Json<Bet>), ApiError> {
    let bet = state
        .wagers
        .create_bet(req.creator_id, &req.title, &req.options, req.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(bet)))
}

/// GET /api/bets
pub async fn list_bets(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<Bet>> {
    Ok(Json(state.wagers.active_bets(q.limit.unwrap_or(25)).await?))
}

/// GET /api/bets/:id
pub async fn get_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<BetId>,
) -> ApiResult<BetResponse> {
    let bet = state.wagers.get_bet(bet_id).await?;
    let wagers = state.wagers.wagers_for_bet(bet_id).await?;
    Ok(Json(BetResponse { bet, wagers }))
}

/// POST /api/bets/:id/wagers
pub async fn place_wager(
    State(state): State<AppState>,
    Path(bet_id): Path<BetId>,
    Json(req): Json<PlaceWagerRequest>,
) -> Result<(StatusCode, Json<Wager>), ApiError> {
    let wager = state
        .wagers
        .place_wager(req.account_id, bet_id, &req.option, req.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(wager)))
}

/// POST /api/bets/:id/lock
pub async fn lock_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<BetId>,
) -> ApiResult<Bet> {
    Ok(Json(state.wagers.lock_bet(bet_id).await?))
}

/// POST /api/bets/:id/resolve
pub async fn resolve_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<BetId>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<ResolutionReport> {
    Ok(Json(state.wagers.resolve_bet(bet_id, &req.winning_option).await?))
}

/// POST /api/bets/:id/cancel
pub async fn cancel_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<BetId>,
) -> ApiResult<CancellationReport> {
    Ok(Json(state.wagers.cancel_bet(bet_id).await?))
}

// ---------------------------------------------------------------------------
// Route handlers: activity
// ---------------------------------------------------------------------------

/// POST /api/activity/messages
pub async fn record_message(
    State(state): State<AppState>,
    Json(req): Json<MessageRequest>,
) -> ApiResult<IngestOutcome> {
    let sent_at = req.sent_at.unwrap_or_else(|| state.ledger.now());
    let outcome = state
        .activity
        .record_message(
            req.account_id,
            req.community_id,
            req.channel_id,
            req.message_length,
            sent_at,
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /api/activity/rewards
pub async fn process_rewards(
    State(state): State<AppState>,
    Json(req): Json<RewardRunRequest>,
) -> ApiResult<RewardRunReport> {
    let report = state
        .activity
        .process_rewards(req.period_start, req.period_end, req.community_id)
        .await?;
    Ok(Json(report))
}

/// GET /api/activity/:community/settings
pub async fn get_settings(
    State(state): State<AppState>,
    Path(community_id): Path<CommunityId>,
) -> ApiResult<ActivitySettings> {
    Ok(Json(state.activity.settings(community_id).await?))
}

/// PUT /api/activity/:community/settings
///
/// Takes a flat key/value record; unnamed keys keep their current value.
pub async fn update_settings(
    State(state): State<AppState>,
    Path(community_id): Path<CommunityId>,
    Json(record): Json<HashMap<String, String>>,
) -> ApiResult<ActivitySettings> {
    Ok(Json(state.activity.configure(community_id, &record).await?))
}

/// GET /api/activity/:community/accounts/:id/stats
pub async fn get_activity_stats(
    State(state): State<AppState>,
    Path((community_id, account_id)): Path<(CommunityId, AccountId)>,
    Query(q): Query<StatsQuery>,
) -> ApiResult<ActivityStats> {
    let stats = state
        .activity
        .activity_stats(account_id, community_id, q.days.unwrap_or(7))
        .await?;
    Ok(Json(stats))
}
