//! Bet ledger: record, list and delete wagers.
//!
//! Deposits arrive after the stake has already landed in the vault; this
//! module only records them. Only settled bets on fully settled markets
//! can be deleted; pool totals are summed over every bet row of a market.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use super::{SettlementError, SettlementResult};
use crate::storage::{Bet, Commitment, Outcome, SettlementStore, StoreError};

/// Deposit payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBet {
    pub tx: String,
    pub market_id: String,
    pub outcome: String,
    pub amount: f64,
    #[serde(alias = "walletAddress")]
    pub wallet: String,
    pub asset: String,
    #[serde(default)]
    pub commitment: Option<Commitment>,
}

pub struct BetLedger {
    store: Arc<dyn SettlementStore>,
    supported_assets: BTreeSet<String>,
}

impl BetLedger {
    pub fn new(store: Arc<dyn SettlementStore>, supported_assets: BTreeSet<String>) -> Self {
        Self { store, supported_assets }
    }

    pub async fn record(&self, new_bet: NewBet) -> SettlementResult<Bet> {
        self.record_at(new_bet, Utc::now()).await
    }

    pub async fn record_at(&self, new_bet: NewBet, placed_at: DateTime<Utc>) -> SettlementResult<Bet> {
        let bet = self.validate(new_bet, placed_at)?;
        match self.store.insert_bet(&bet).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(SettlementError::DuplicateBet(bet.tx)),
            Err(e) => return Err(e.into()),
        }
        info!(
            bet_tx = %bet.tx,
            market_id = %bet.market_id,
            outcome = %bet.outcome,
            amount = bet.amount,
            "📥 bet recorded"
        );
        Ok(bet)
    }

    fn validate(&self, new_bet: NewBet, placed_at: DateTime<Utc>) -> SettlementResult<Bet> {
        let required = [
            ("tx", &new_bet.tx),
            ("marketId", &new_bet.market_id),
            ("wallet", &new_bet.wallet),
            ("asset", &new_bet.asset),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(SettlementError::InvalidRequest(format!("{} is required", field)));
        }

        let outcome = Outcome::parse(&new_bet.outcome).ok_or_else(|| {
            SettlementError::InvalidRequest(format!("outcome must be 'yes' or 'no', got '{}'", new_bet.outcome))
        })?;
        if !new_bet.amount.is_finite() || new_bet.amount <= 0.0 {
            return Err(SettlementError::InvalidRequest("amount must be positive".into()));
        }
        if !self.supported_assets.contains(&new_bet.asset) {
            return Err(SettlementError::InvalidRequest(format!("unsupported asset {}", new_bet.asset)));
        }
        if let Some(c) = &new_bet.commitment {
            if c.commitment.trim().is_empty() {
                return Err(SettlementError::InvalidRequest("commitment is empty".into()));
            }
        }

        let mut bet = Bet::new_pending(
            new_bet.tx.trim(),
            new_bet.market_id.trim(),
            outcome,
            new_bet.amount,
            new_bet.wallet.trim(),
            new_bet.asset,
            placed_at,
        );
        bet.commitment = new_bet.commitment;
        Ok(bet)
    }

    /// All bets of one wallet, newest first
    pub async fn bets_for_wallet(&self, wallet: &str) -> SettlementResult<Vec<Bet>> {
        let mut bets = self.store.bets_for_wallet(wallet).await?;
        bets.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        Ok(bets)
    }

    /// Delete a lost bet, or a won bet that has been paid, once its whole
    /// market is settled
    pub async fn delete(&self, tx: &str, wallet: &str) -> SettlementResult<()> {
        let bet = self
            .store
            .get_bet(tx)
            .await?
            .ok_or_else(|| SettlementError::NotFound(tx.to_string()))?;
        if bet.wallet != wallet {
            return Err(SettlementError::NotOwner);
        }
        if !bet.is_settled() {
            return Err(SettlementError::NotDeletable(format!(
                "bet is {} and {}",
                bet.status.as_str(),
                if bet.claimed { "claimed" } else { "unclaimed" }
            )));
        }
        let market_bets = self.store.bets_for_market(&bet.market_id).await?;
        if market_bets.iter().any(|b| !b.is_settled()) {
            return Err(SettlementError::NotDeletable(
                "market still has unsettled bets".to_string(),
            ));
        }
        if !self.store.delete_bet(tx).await? {
            return Err(SettlementError::NotFound(tx.to_string()));
        }
        info!(bet_tx = %tx, "🗑️  bet deleted");
        Ok(())
    }
}
