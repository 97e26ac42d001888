//! Backup Settlement Sweep
//!
//! Unattended loop that keeps funds from being stranded:
//! - Phase 1: reclassify `pending` bets as won/lost once their market
//!   resolves (one oracle fetch per market; `claimed` stays false)
//! - Phase 2: pay winners nobody claimed within the grace period, using
//!   the same lock and executor as the user claim path
//!
//! Markets and bets are processed serially within one iteration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::executor::{PayoutExecutor, PayoutSource};
use super::lock::{ClaimLockManager, LockAttempt};
use super::{SettlementError, SettlementResult};
use crate::oracle::MarketOracle;
use crate::storage::{Bet, BetStatus, SettlementStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub markets_checked: usize,
    pub markets_unresolved: usize,
    pub oracle_failures: usize,
    pub bets_won: usize,
    pub bets_lost: usize,
    pub payouts_attempted: usize,
    pub payouts_succeeded: usize,
    pub payouts_failed: usize,
    pub payouts_skipped: usize,
    pub total_paid: f64,
}

pub struct BackupSweep {
    store: Arc<dyn SettlementStore>,
    oracle: Arc<dyn MarketOracle>,
    locks: ClaimLockManager,
    executor: Arc<PayoutExecutor>,
    grace: chrono::Duration,
}

impl BackupSweep {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        oracle: Arc<dyn MarketOracle>,
        locks: ClaimLockManager,
        executor: Arc<PayoutExecutor>,
        grace: Duration,
    ) -> Self {
        let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::hours(48));
        Self { store, oracle, locks, executor, grace }
    }

    pub async fn run_once(&self) -> SettlementResult<SweepReport> {
        self.run_once_at(Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> SettlementResult<SweepReport> {
        let mut report = SweepReport::default();
        self.reconcile_statuses(&mut report).await?;
        self.pay_stale_winners(now, &mut report).await?;
        Ok(report)
    }

    /// Phase 1
    async fn reconcile_statuses(&self, report: &mut SweepReport) -> SettlementResult<()> {
        let mut by_market: BTreeMap<String, Vec<Bet>> = BTreeMap::new();
        for bet in self.store.pending_bets().await? {
            by_market.entry(bet.market_id.clone()).or_default().push(bet);
        }

        for (market_id, bets) in by_market {
            report.markets_checked += 1;
            let market = match self.oracle.fetch_market(&market_id).await {
                Ok(m) => m,
                Err(e) => {
                    report.oracle_failures += 1;
                    warn!(market_id = %market_id, "oracle fetch failed, skipping market: {}", e);
                    continue;
                }
            };
            let Some(winner) = market.resolved_outcome() else {
                report.markets_unresolved += 1;
                continue;
            };

            for bet in bets {
                let status = if bet.outcome == winner { BetStatus::Won } else { BetStatus::Lost };
                match self.store.resolve_bet(&bet.tx, status).await {
                    Ok(true) if status == BetStatus::Won => report.bets_won += 1,
                    Ok(true) => report.bets_lost += 1,
                    Ok(false) => debug!(bet_tx = %bet.tx, "bet already resolved"),
                    Err(e) => error!(bet_tx = %bet.tx, "failed to resolve bet: {}", e),
                }
            }
            info!(market_id = %market_id, result = %winner, "market reconciled");
        }
        Ok(())
    }

    /// Phase 2
    async fn pay_stale_winners(&self, now: DateTime<Utc>, report: &mut SweepReport) -> SettlementResult<()> {
        if !self.executor.is_configured() {
            warn!("payout not configured, skipping auto-payout phase");
            return Ok(());
        }

        let placed_before = now - self.grace;
        let candidates = self
            .store
            .unclaimed_winners(placed_before, self.locks.stale_before(now))
            .await?;

        for candidate in candidates {
            let bet = match self.locks.acquire_at(&candidate.tx, now).await {
                Ok(LockAttempt::Acquired(bet)) => bet,
                Ok(other) => {
                    report.payouts_skipped += 1;
                    debug!(bet_tx = %candidate.tx, ?other, "auto-payout skipped");
                    continue;
                }
                Err(e) => {
                    report.payouts_skipped += 1;
                    error!(bet_tx = %candidate.tx, "auto-payout lock failed: {}", e);
                    continue;
                }
            };

            let result = self.pay_locked(&bet).await;
            self.locks.release(&bet.tx).await;

            report.payouts_attempted += 1;
            match result {
                Ok(paid) => {
                    report.payouts_succeeded += 1;
                    report.total_paid += paid;
                }
                Err(e) => {
                    report.payouts_failed += 1;
                    warn!(bet_tx = %bet.tx, code = e.code(), "auto-payout failed: {}", e);
                }
            }
        }
        Ok(())
    }

    async fn pay_locked(&self, bet: &Bet) -> SettlementResult<f64> {
        // Re-check on the locked row: a claim may have landed since selection
        if bet.claimed || bet.status != BetStatus::Won {
            return Err(SettlementError::AlreadyClaimed);
        }
        let nullifier = bet.commitment.as_ref().map(|c| c.nullifier());
        let settled = self
            .executor
            .pay_locked(bet, bet.outcome, nullifier.as_deref(), PayoutSource::BackupSweep)
            .await?;
        info!(bet_tx = %bet.tx, payout = settled.quote.payout, "🤖 auto-payout sent");
        Ok(settled.quote.payout)
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "🧹 backup settlement sweep started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => info!(?report, "sweep iteration complete"),
                        Err(e) => error!("sweep iteration failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("backup settlement sweep stopped");
    }
}
