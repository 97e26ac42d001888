//! Claim Coordinator
//!
//! Drives one user-initiated claim:
//!
//! ```text
//! Requested ─▶ Locked ─▶ Verified ─▶ Computed ─▶ Paid ─▶ FeeSettled ─▶ Finalized
//!     │           │          │           │          │
//!     └───────────┴──────────┴───────────┴──────────┴──▶ Rejected / Failed
//! ```
//!
//! The lock is released on every exit after `Locked`, success or not.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::executor::{PayoutExecutor, PayoutSource, SettledPayout};
use super::lock::{ClaimLockManager, LockAttempt};
use super::claims::NullifierRegistry;
use super::{SettlementError, SettlementResult};
use crate::oracle::MarketOracle;
use crate::proof::ClaimProof;
use crate::storage::{Bet, BetStatus, Outcome, SettlementStore};

/// A validated claim request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub bet_tx: String,
    pub wallet: String,
    pub proof: ClaimProof,
}

/// Successful claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub bet_tx: String,
    pub payout: f64,
    pub payout_tx: String,
    pub fee: f64,
    pub fee_queued: bool,
    pub message: String,
}

impl From<SettledPayout> for ClaimReceipt {
    fn from(settled: SettledPayout) -> Self {
        let message = if settled.fee_queued {
            "Winnings paid. Protocol fee queued for retry.".to_string()
        } else {
            "Winnings paid.".to_string()
        };
        Self {
            bet_tx: settled.bet_tx,
            payout: settled.quote.payout,
            payout_tx: settled.payout_tx,
            fee: settled.quote.fee,
            fee_queued: settled.fee_queued,
            message,
        }
    }
}

/// Read-only claimability answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatusView {
    pub claimable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_payout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_result: Option<Outcome>,
}

impl ClaimStatusView {
    fn not_claimable(reason: &str, market_result: Option<Outcome>) -> Self {
        Self {
            claimable: false,
            reason: Some(reason.to_string()),
            estimated_payout: None,
            market_result,
        }
    }
}

pub struct ClaimCoordinator {
    store: Arc<dyn SettlementStore>,
    oracle: Arc<dyn MarketOracle>,
    locks: ClaimLockManager,
    nullifiers: NullifierRegistry,
    executor: Arc<PayoutExecutor>,
}

impl ClaimCoordinator {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        oracle: Arc<dyn MarketOracle>,
        locks: ClaimLockManager,
        executor: Arc<PayoutExecutor>,
    ) -> Self {
        Self {
            nullifiers: NullifierRegistry::new(store.clone()),
            store,
            oracle,
            locks,
            executor,
        }
    }

    pub async fn claim(&self, request: ClaimRequest) -> SettlementResult<ClaimReceipt> {
        // Configuration faults are fatal and need no lock
        self.executor.ensure_configured()?;

        let bet = match self.locks.acquire(&request.bet_tx).await? {
            LockAttempt::Acquired(bet) => bet,
            LockAttempt::NotFound => return Err(SettlementError::NotFound(request.bet_tx)),
            LockAttempt::AlreadyClaimed => return Err(SettlementError::AlreadyClaimed),
            LockAttempt::InProgress => return Err(SettlementError::InProgress),
        };

        let result = self.claim_locked(&bet, &request).await;
        self.locks.release(&bet.tx).await;

        match &result {
            Ok(receipt) => info!(
                bet_tx = %bet.tx,
                wallet = %bet.wallet,
                payout = receipt.payout,
                "✅ claim finalized"
            ),
            Err(e) => warn!(bet_tx = %bet.tx, code = e.code(), "claim rejected: {}", e),
        }
        result
    }

    async fn claim_locked(&self, bet: &Bet, request: &ClaimRequest) -> SettlementResult<ClaimReceipt> {
        let winner = self.verify(bet, request).await?;
        let settled = self
            .executor
            .pay_locked(bet, winner, Some(&request.proof.nullifier), PayoutSource::UserClaim)
            .await?;
        Ok(settled.into())
    }

    /// Ownership, lost status, nullifier, resolution, outcome, proof outcome. In that order.
    async fn verify(&self, bet: &Bet, request: &ClaimRequest) -> SettlementResult<Outcome> {
        if bet.wallet != request.wallet {
            return Err(SettlementError::NotOwner);
        }
        if bet.status == BetStatus::Lost {
            return Err(SettlementError::OutcomeLost);
        }
        if let Some(commitment) = &bet.commitment {
            if commitment.nullifier() != request.proof.nullifier {
                return Err(SettlementError::ProofMismatch);
            }
        }
        if self.nullifiers.is_consumed(&request.proof.nullifier).await? {
            return Err(SettlementError::NullifierUsed);
        }

        let market = self.oracle.fetch_market(&bet.market_id).await?;
        let winner = market.resolved_outcome().ok_or(SettlementError::MarketNotSettled)?;

        // The stored outcome decides lost status, whatever the proof claims
        if bet.outcome != winner {
            if self.store.resolve_bet(&bet.tx, BetStatus::Lost).await? {
                info!(bet_tx = %bet.tx, market_id = %bet.market_id, "bet marked lost");
            }
            return Err(SettlementError::OutcomeLost);
        }
        if request.proof.outcome != bet.outcome {
            return Err(SettlementError::ProofMismatch);
        }
        Ok(winner)
    }

    /// Would a claim succeed right now, and for roughly how much
    pub async fn claim_status(&self, bet_tx: &str, wallet: &str) -> SettlementResult<ClaimStatusView> {
        let bet = self
            .store
            .get_bet(bet_tx)
            .await?
            .ok_or_else(|| SettlementError::NotFound(bet_tx.to_string()))?;
        if bet.wallet != wallet {
            return Err(SettlementError::NotOwner);
        }
        if bet.claimed {
            return Ok(ClaimStatusView::not_claimable("already claimed", Some(bet.outcome)));
        }
        if bet.status == BetStatus::Lost {
            return Ok(ClaimStatusView::not_claimable("outcome lost", Some(bet.outcome.opposite())));
        }

        let market = self.oracle.fetch_market(&bet.market_id).await?;
        let Some(winner) = market.resolved_outcome() else {
            return Ok(ClaimStatusView::not_claimable("market not settled", None));
        };
        if winner != bet.outcome {
            return Ok(ClaimStatusView::not_claimable("outcome lost", Some(winner)));
        }

        let stale_before = self.locks.stale_before(chrono::Utc::now());
        if bet.is_locked(stale_before) {
            return Ok(ClaimStatusView {
                claimable: false,
                reason: Some("claim in progress".to_string()),
                estimated_payout: None,
                market_result: Some(winner),
            });
        }

        let quote = self.executor.quote(&bet, winner).await?;
        Ok(ClaimStatusView {
            claimable: true,
            reason: None,
            estimated_payout: Some(quote.payout),
            market_result: Some(winner),
        })
    }
}
