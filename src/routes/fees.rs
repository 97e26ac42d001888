// ============================================================================
// FEE ROUTES - Treasury Fee Retry Queue
// ============================================================================
//
// - POST /fees/retry    Retry one batch now (Bearer FEE_RETRY_SECRET when set)
// - GET  /fees/status   Pending / exhausted / settled / leased totals

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};

use super::{ApiError, AppState};

fn authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim() == secret)
        .unwrap_or(false)
}

/// POST /fees/retry
pub async fn retry_fees_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if !authorized(&headers, state.fee_retry_secret.as_deref()) {
        return Err(ApiError::Unauthorized);
    }

    let report = state.fees.process_batch().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "processed": report.processed,
        "successful": report.successful,
        "failed": report.failed,
        "results": report.results,
    })))
}

/// GET /fees/status
pub async fn fee_status_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let status = state.fees.status().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "pending": status.pending,
        "failed": status.failed,
        "successful": status.successful,
        "inFlight": status.in_flight,
        "maxRetries": status.max_retries,
    })))
}
