//! Payout executor: compute, pay, settle fee, finalize.
//!
//! Shared by the claim coordinator and the backup sweep so both payout
//! authorities run the same formula and the same ordering. Callers must
//! hold the bet's claim lock and release it afterwards.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::claims::NullifierRegistry;
use super::fees::FeeRetryQueue;
use super::payout::{quote, PayoutQuote};
use super::{SettlementError, SettlementResult};
use crate::payments::PaymentRail;
use crate::storage::{Bet, Outcome, PoolTotals, SettlementStore};

/// Which authority is paying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutSource {
    UserClaim,
    BackupSweep,
}

/// A completed payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledPayout {
    pub bet_tx: String,
    pub quote: PayoutQuote,
    pub payout_tx: String,
    pub fee_tx: Option<String>,
    pub fee_queued: bool,
    pub nullifier_recorded: bool,
}

pub struct PayoutExecutor {
    store: Arc<dyn SettlementStore>,
    rail: Option<Arc<dyn PaymentRail>>,
    treasury: Option<String>,
    fee_rate: f64,
    supported_assets: BTreeSet<String>,
    nullifiers: NullifierRegistry,
    fees: FeeRetryQueue,
}

impl PayoutExecutor {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        rail: Option<Arc<dyn PaymentRail>>,
        treasury: Option<String>,
        fee_rate: f64,
        supported_assets: BTreeSet<String>,
        fees: FeeRetryQueue,
    ) -> Self {
        Self {
            nullifiers: NullifierRegistry::new(store.clone()),
            store,
            rail,
            treasury,
            fee_rate,
            supported_assets,
            fees,
        }
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    /// Vault rail and treasury both present
    pub fn is_configured(&self) -> bool {
        self.rail.is_some() && self.treasury.is_some()
    }

    pub fn ensure_configured(&self) -> SettlementResult<(&dyn PaymentRail, &str)> {
        let rail = self
            .rail
            .as_deref()
            .ok_or_else(|| SettlementError::Misconfigured("payment rail / vault key not set".into()))?;
        let treasury = self
            .treasury
            .as_deref()
            .ok_or_else(|| SettlementError::Misconfigured("treasury address not set".into()))?;
        Ok((rail, treasury))
    }

    pub fn ensure_asset(&self, asset: &str) -> SettlementResult<()> {
        if self.supported_assets.contains(asset) {
            Ok(())
        } else {
            Err(SettlementError::MissingAssetConfig(asset.to_string()))
        }
    }

    /// Fresh pool totals for the bet's market and the resulting quote
    pub async fn quote(&self, bet: &Bet, winner: Outcome) -> SettlementResult<PayoutQuote> {
        let market_bets = self.store.bets_for_market(&bet.market_id).await?;
        let totals = PoolTotals::from_bets(&market_bets);
        let (winning_pool, losing_pool) = totals.split(winner);
        Ok(quote(bet.amount, winning_pool, losing_pool, self.fee_rate))
    }

    /// Pay a locked, verified winning bet.
    ///
    /// A payout transfer failure returns `PayoutFailed` with no state written.
    /// A fee transfer failure is queued and the payout still succeeds.
    pub async fn pay_locked(
        &self,
        bet: &Bet,
        winner: Outcome,
        nullifier: Option<&str>,
        source: PayoutSource,
    ) -> SettlementResult<SettledPayout> {
        let (rail, treasury) = self.ensure_configured()?;
        self.ensure_asset(&bet.asset)?;

        let quote = self.quote(bet, winner).await?;
        info!(
            bet_tx = %bet.tx,
            market_id = %bet.market_id,
            ?source,
            payout = quote.payout,
            fee = quote.fee,
            "computed payout"
        );

        let receipt = rail.transfer(&bet.wallet, quote.payout, &bet.asset).await;
        let payout_tx = match (receipt.success, receipt.signature.clone()) {
            (true, Some(sig)) => sig,
            _ => {
                let reason = receipt.error_message();
                warn!(bet_tx = %bet.tx, ?source, "payout transfer failed: {}", reason);
                return Err(SettlementError::PayoutFailed(reason));
            }
        };
        info!(bet_tx = %bet.tx, payout_tx = %payout_tx, amount = quote.payout, "💸 payout sent");

        let (fee_tx, fee_queued) = self.settle_fee(bet, &quote, rail, treasury).await;

        // The bettor is paid; from here on failures are logged, not returned
        match self.store.mark_claimed(&bet.tx).await {
            Ok(true) => {}
            Ok(false) => error!(bet_tx = %bet.tx, "payout sent but bet was already claimed or lost"),
            Err(e) => error!(bet_tx = %bet.tx, payout_tx = %payout_tx, "payout sent but marking claimed failed: {}", e),
        }

        let nullifier_recorded = match nullifier {
            Some(n) => match self.nullifiers.consume(n, Utc::now()).await {
                Ok(inserted) => inserted,
                Err(e) => {
                    error!(bet_tx = %bet.tx, "failed to record nullifier: {}", e);
                    false
                }
            },
            None => false,
        };

        Ok(SettledPayout {
            bet_tx: bet.tx.clone(),
            quote,
            payout_tx,
            fee_tx,
            fee_queued,
            nullifier_recorded,
        })
    }

    async fn settle_fee(
        &self,
        bet: &Bet,
        quote: &PayoutQuote,
        rail: &dyn PaymentRail,
        treasury: &str,
    ) -> (Option<String>, bool) {
        if quote.fee <= 0.0 {
            return (None, false);
        }

        let receipt = rail.transfer(treasury, quote.fee, &bet.asset).await;
        if receipt.success {
            return (receipt.signature, false);
        }

        let reason = receipt.error_message();
        match self.fees.enqueue(&bet.tx, quote.fee, &bet.asset, &reason).await {
            Ok(_) => (None, true),
            Err(e) => {
                error!(bet_tx = %bet.tx, fee = quote.fee, "fee transfer failed and could not be queued: {}", e);
                (None, false)
            }
        }
    }
}
