// ============================================================================
// BET ROUTES - Deposit Recording and Wallet Bet Management
// ============================================================================
//
// - POST   /bets                          Record a confirmed wager (deposit budget)
// - GET    /bets/{wallet}                 List a wallet's bets
// - DELETE /bets/{tx}?walletAddress=...   Delete a lost or already-paid bet

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::rate_limit::RateLimitKind;
use crate::settlement::{NewBet, SettlementError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBetQuery {
    #[serde(default)]
    pub wallet_address: Option<String>,
}

/// POST /bets
pub async fn record_bet_handler(
    State(state): State<AppState>,
    payload: Result<Json<NewBet>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new_bet) =
        payload.map_err(|e| SettlementError::InvalidRequest(e.body_text()))?;
    state.throttle(RateLimitKind::Deposit, &new_bet.wallet)?;

    let bet = state.ledger.record(new_bet).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "bet": bet })),
    ))
}

/// GET /bets/{wallet}
pub async fn wallet_bets_handler(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.throttle(RateLimitKind::StatusCheck, &wallet)?;
    let bets = state.ledger.bets_for_wallet(&wallet).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "wallet": wallet,
        "count": bets.len(),
        "bets": bets,
    })))
}

/// DELETE /bets/{tx}
pub async fn delete_bet_handler(
    State(state): State<AppState>,
    Path(tx): Path<String>,
    Query(query): Query<DeleteBetQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet = query
        .wallet_address
        .filter(|w| !w.trim().is_empty())
        .ok_or_else(|| SettlementError::InvalidRequest("walletAddress is required".into()))?;
    state.throttle(RateLimitKind::Deposit, &wallet)?;

    state.ledger.delete(&tx, &wallet).await?;
    Ok(Json(serde_json::json!({ "success": true, "betTx": tx })))
}
