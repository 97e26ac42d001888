//! In-memory settlement store
//!
//! DashMap-backed engine used for development and tests. Each conditional
//! update runs while holding the shard write guard of the single row it
//! touches, which gives the same single-row atomicity the relational
//! store offers and nothing more.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{
    Bet, BetStatus, NullifierRecord, PendingFee, SettlementStore, StoreError, StoreResult,
};

/// Lock-free in-memory tables. `Clone` shares the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    bets: Arc<DashMap<String, Bet>>,
    nullifiers: Arc<DashMap<String, NullifierRecord>>,
    fees: Arc<DashMap<String, PendingFee>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bet_count(&self) -> usize {
        self.bets.len()
    }

    pub fn nullifier_count(&self) -> usize {
        self.nullifiers.len()
    }

    fn collect_bets(&self, filter: impl Fn(&Bet) -> bool) -> Vec<Bet> {
        let mut bets: Vec<Bet> = self
            .bets
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        bets.sort_by(|a, b| a.placed_at.cmp(&b.placed_at).then_with(|| a.tx.cmp(&b.tx)));
        bets
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_bet(&self, tx: &str) -> StoreResult<Option<Bet>> {
        Ok(self.bets.get(tx).map(|b| b.clone()))
    }

    async fn insert_bet(&self, bet: &Bet) -> StoreResult<()> {
        match self.bets.entry(bet.tx.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("bet {}", bet.tx))),
            Entry::Vacant(slot) => {
                slot.insert(bet.clone());
                Ok(())
            }
        }
    }

    async fn delete_bet(&self, tx: &str) -> StoreResult<bool> {
        Ok(self.bets.remove(tx).is_some())
    }

    async fn bets_for_market(&self, market_id: &str) -> StoreResult<Vec<Bet>> {
        Ok(self.collect_bets(|b| b.market_id == market_id))
    }

    async fn bets_for_wallet(&self, wallet: &str) -> StoreResult<Vec<Bet>> {
        Ok(self.collect_bets(|b| b.wallet == wallet))
    }

    async fn pending_bets(&self) -> StoreResult<Vec<Bet>> {
        Ok(self.collect_bets(|b| b.status == BetStatus::Pending))
    }

    async fn unclaimed_winners(
        &self,
        placed_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Bet>> {
        Ok(self.collect_bets(|b| {
            b.status == BetStatus::Won
                && !b.claimed
                && b.placed_at < placed_before
                && !b.is_locked(stale_before)
        }))
    }

    async fn resolve_bet(&self, tx: &str, status: BetStatus) -> StoreResult<bool> {
        match self.bets.get_mut(tx) {
            Some(mut bet) if bet.status == BetStatus::Pending => {
                bet.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn acquire_claim_lock(
        &self,
        tx: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Bet>> {
        let Some(mut bet) = self.bets.get_mut(tx) else {
            return Ok(None);
        };
        let free = match bet.claim_lock {
            None => true,
            Some(at) => at < stale_before,
        };
        if bet.claimed || !free {
            return Ok(None);
        }
        bet.claim_lock = Some(now);
        Ok(Some(bet.clone()))
    }

    async fn release_claim_lock(&self, tx: &str) -> StoreResult<()> {
        if let Some(mut bet) = self.bets.get_mut(tx) {
            bet.claim_lock = None;
        }
        Ok(())
    }

    async fn mark_claimed(&self, tx: &str) -> StoreResult<bool> {
        match self.bets.get_mut(tx) {
            Some(mut bet) if !bet.claimed && bet.status != BetStatus::Lost => {
                bet.status = BetStatus::Won;
                bet.claimed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn nullifier_exists(&self, nullifier: &str) -> StoreResult<bool> {
        Ok(self.nullifiers.contains_key(nullifier))
    }

    async fn insert_nullifier(&self, record: &NullifierRecord) -> StoreResult<bool> {
        match self.nullifiers.entry(record.nullifier.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get_pending_fee(&self, bet_tx: &str) -> StoreResult<Option<PendingFee>> {
        Ok(self.fees.get(bet_tx).map(|f| f.clone()))
    }

    async fn insert_pending_fee(&self, fee: &PendingFee) -> StoreResult<bool> {
        match self.fees.entry(fee.bet_tx.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(fee.clone());
                Ok(true)
            }
        }
    }

    async fn update_pending_fee(&self, fee: &PendingFee) -> StoreResult<()> {
        match self.fees.get_mut(&fee.bet_tx) {
            Some(mut row) => {
                *row = fee.clone();
                Ok(())
            }
            None => Err(StoreError::Decode(format!("no pending fee for {}", fee.bet_tx))),
        }
    }

    async fn lease_pending_fee(
        &self,
        bet_tx: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PendingFee>> {
        match self.fees.get_mut(bet_tx) {
            Some(mut row) if !row.is_settled() && !row.is_leased() => {
                row.processing_at = Some(now);
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn retryable_fees(&self, max_retries: u32, limit: usize) -> StoreResult<Vec<PendingFee>> {
        let mut rows: Vec<PendingFee> = self
            .fees
            .iter()
            .filter(|f| !f.is_settled() && !f.is_leased() && f.retry_count < max_retries)
            .map(|f| f.clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.bet_tx.cmp(&b.bet_tx)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn all_pending_fees(&self) -> StoreResult<Vec<PendingFee>> {
        Ok(self.fees.iter().map(|f| f.clone()).collect())
    }
}
