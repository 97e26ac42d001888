// ============================================================================
// SETTLEMENT HTTP ROUTES
// ============================================================================
//
// Route Organization:
// - bets.rs:   Deposit recording, wallet listing, deletion of settled bets
// - claims.rs: Claim submission and read-only claim status
// - fees.rs:   Treasury fee retry trigger and queue status
//
// Every failure body is `{ success: false, error, code }`; `code` is the
// stable machine-readable reason, `error` is safe to show a user.
//
// ============================================================================

pub mod bets;
pub mod claims;
pub mod fees;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::SettlementConfig;
use crate::oracle::MarketOracle;
use crate::payments::PaymentRail;
use crate::rate_limit::{RateLimitKind, RateLimited, RateLimiter};
use crate::settlement::{
    BackupSweep, BetLedger, ClaimCoordinator, ClaimLockManager, ErrorKind, FeeRetryQueue,
    PayoutExecutor, SettlementError,
};
use crate::storage::SettlementStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// APPLICATION STATE
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SettlementStore>,
    pub ledger: Arc<BetLedger>,
    pub coordinator: Arc<ClaimCoordinator>,
    pub executor: Arc<PayoutExecutor>,
    pub fees: FeeRetryQueue,
    pub sweep: Arc<BackupSweep>,
    pub limiter: RateLimiter,
    pub fee_retry_secret: Option<String>,
    pub supported_assets: Vec<String>,
}

impl AppState {
    /// Wire the settlement core onto a store, an oracle and an optional rail.
    /// A missing rail or treasury is not an error here; claims report it.
    pub fn new(
        config: &SettlementConfig,
        store: Arc<dyn SettlementStore>,
        oracle: Arc<dyn MarketOracle>,
        rail: Option<Arc<dyn PaymentRail>>,
    ) -> Self {
        let treasury = config.payout.treasury_address.clone();
        let fees = FeeRetryQueue::new(
            store.clone(),
            rail.clone(),
            treasury.clone(),
            config.fee_max_retries,
            config.fee_retry_batch_size,
        );
        let executor = Arc::new(PayoutExecutor::new(
            store.clone(),
            rail,
            treasury,
            config.fee_rate,
            config.supported_assets.clone(),
            fees.clone(),
        ));

        let coordinator = Arc::new(ClaimCoordinator::new(
            store.clone(),
            oracle.clone(),
            ClaimLockManager::new(store.clone(), config.claim_lock_timeout),
            executor.clone(),
        ));
        let sweep = Arc::new(BackupSweep::new(
            store.clone(),
            oracle,
            ClaimLockManager::new(store.clone(), config.sweep_lock_timeout),
            executor.clone(),
            config.auto_payout_grace,
        ));

        Self {
            ledger: Arc::new(BetLedger::new(store.clone(), config.supported_assets.clone())),
            store,
            coordinator,
            executor,
            fees,
            sweep,
            limiter: RateLimiter::new(config.rate_limits.clone()),
            fee_retry_secret: config.fee_retry_secret.clone(),
            supported_assets: config.supported_assets.iter().cloned().collect(),
        }
    }

    /// Rate-limit `identity` under `kind`
    pub fn throttle(&self, kind: RateLimitKind, identity: &str) -> Result<(), ApiError> {
        self.limiter.check(kind, identity).map_err(ApiError::RateLimited)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Everything a handler can fail with
#[derive(Debug)]
pub enum ApiError {
    Settlement(SettlementError),
    RateLimited(RateLimited),
    Unauthorized,
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        ApiError::Settlement(e)
    }
}

fn status_for(e: &SettlementError) -> StatusCode {
    match e {
        SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
        SettlementError::NotOwner => StatusCode::FORBIDDEN,
        SettlementError::AlreadyClaimed
        | SettlementError::NullifierUsed
        | SettlementError::InProgress
        | SettlementError::DuplicateBet(_)
        | SettlementError::NotDeletable(_) => StatusCode::CONFLICT,
        SettlementError::PayoutFailed(_) => StatusCode::BAD_GATEWAY,
        _ => match e.kind() {
            ErrorKind::Rejection => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Settlement(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    error!(code = e.code(), "request failed: {}", e);
                }
                let body = serde_json::json!({
                    "success": false,
                    "error": e.public_message(),
                    "code": e.code(),
                });
                (status, Json(body)).into_response()
            }
            ApiError::RateLimited(limited) => {
                let body = serde_json::json!({
                    "success": false,
                    "error": "Too many requests",
                    "code": "rate_limited",
                    "retryAfter": limited.retry_after_secs,
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                if let Ok(value) = HeaderValue::from_str(&limited.retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            ApiError::Unauthorized => {
                let body = serde_json::json!({
                    "success": false,
                    "error": "Unauthorized",
                    "code": "unauthorized",
                });
                (StatusCode::UNAUTHORIZED, Json(body)).into_response()
            }
        }
    }
}

// ============================================================================
// HEALTH
// ============================================================================

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": VERSION,
        "store": state.store.backend(),
        "assets": state.supported_assets,
        "payoutsConfigured": state.executor.is_configured(),
        "feeRate": state.executor.fee_rate(),
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Public
        .route("/health", get(health_handler))
        // Bets
        .route("/bets", post(bets::record_bet_handler))
        // GET takes a wallet address, DELETE a bet tx
        .route(
            "/bets/{id}",
            get(bets::wallet_bets_handler).delete(bets::delete_bet_handler),
        )
        // Claims
        .route("/claims", post(claims::submit_claim_handler))
        .route("/claims/status", get(claims::claim_status_handler))
        // Treasury fees
        .route("/fees/retry", post(fees::retry_fees_handler))
        .route("/fees/status", get(fees::fee_status_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
