// ============================================================================
// CLAIM ROUTES - Winning Bet Claims
// ============================================================================
//
// - POST /claims          { proof, betTx, walletAddress }  (claim budget)
// - GET  /claims/status   ?betTx=...&walletAddress=...    (status budget)
//
// The proof is validated before any store access; a malformed proof never
// takes the claim lock.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::proof::RawClaimProof;
use crate::rate_limit::RateLimitKind;
use crate::settlement::{ClaimRequest, SettlementError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBody {
    #[serde(default)]
    pub proof: Option<RawClaimProof>,
    #[serde(default)]
    pub bet_tx: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatusQuery {
    #[serde(default)]
    pub bet_tx: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
}

fn required(value: Option<String>, field: &str) -> Result<String, SettlementError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SettlementError::InvalidRequest(format!("{} is required", field)))
}

/// POST /claims
pub async fn submit_claim_handler(
    State(state): State<AppState>,
    payload: Result<Json<ClaimBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload.map_err(|e| SettlementError::InvalidRequest(e.body_text()))?;

    let wallet = required(body.wallet_address, "walletAddress")?;
    state.throttle(RateLimitKind::ClaimSubmit, &wallet)?;

    let bet_tx = required(body.bet_tx, "betTx")?;
    let proof = body
        .proof
        .ok_or_else(|| SettlementError::InvalidRequest("proof is required".into()))?
        .validate(&bet_tx)
        .map_err(SettlementError::from)?;

    let receipt = state
        .coordinator
        .claim(ClaimRequest { bet_tx, wallet, proof })
        .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "betTx": receipt.bet_tx,
        "payout": receipt.payout,
        "payoutTx": receipt.payout_tx,
        "fee": receipt.fee,
        "feeQueued": receipt.fee_queued,
        "message": receipt.message,
    })))
}

/// GET /claims/status
pub async fn claim_status_handler(
    State(state): State<AppState>,
    Query(query): Query<ClaimStatusQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet = required(query.wallet_address, "walletAddress")?;
    state.throttle(RateLimitKind::StatusCheck, &wallet)?;
    let bet_tx = required(query.bet_tx, "betTx")?;

    let view = state.coordinator.claim_status(&bet_tx, &wallet).await?;
    Ok(Json(view))
}
