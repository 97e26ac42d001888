// ============================================================================
// TEST HELPERS - Shared utilities for integration tests
// ============================================================================

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use wager_settlement::config::{PayoutConfig, SettlementConfig};
use wager_settlement::oracle::{MarketOracle, MarketSnapshot, MarketStatus, OracleError};
use wager_settlement::payments::{PaymentRail, TransferReceipt};
use wager_settlement::proof::ClaimProof;
use wager_settlement::routes::AppState;
use wager_settlement::settlement::ClaimRequest;
use wager_settlement::storage::{
    Bet, BetStatus, Commitment, MemoryStore, NullifierRecord, Outcome, PendingFee,
    SettlementStore, StoreError, StoreResult,
};

pub const TREASURY: &str = "treasury_wallet";
pub const ASSET: &str = "USDC";

// ============================================================================
// SCRIPTED ORACLE
// ============================================================================

/// Oracle whose answers are set by the test. Unknown markets are open.
#[derive(Default)]
pub struct ScriptedOracle {
    markets: DashMap<String, MarketSnapshot>,
    failing: DashMap<String, String>,
    fetches: AtomicU64,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, market_id: &str, winner: Outcome) {
        self.markets.insert(
            market_id.to_string(),
            MarketSnapshot {
                market_id: market_id.to_string(),
                status: MarketStatus::Closed,
                result: Some(winner),
                close_time: Some(Utc::now()),
            },
        );
    }

    pub fn open(&self, market_id: &str) {
        self.markets.insert(
            market_id.to_string(),
            MarketSnapshot {
                market_id: market_id.to_string(),
                status: MarketStatus::Open,
                result: None,
                close_time: None,
            },
        );
    }

    pub fn fail(&self, market_id: &str, reason: &str) {
        self.failing.insert(market_id.to_string(), reason.to_string());
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketOracle for ScriptedOracle {
    async fn fetch_market(&self, market_id: &str) -> Result<MarketSnapshot, OracleError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.failing.get(market_id) {
            return Err(OracleError::Request(reason.clone()));
        }
        Ok(self.markets.get(market_id).map(|m| m.clone()).unwrap_or(MarketSnapshot {
            market_id: market_id.to_string(),
            status: MarketStatus::Open,
            result: None,
            close_time: None,
        }))
    }
}

// ============================================================================
// RECORDING PAYMENT RAIL
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTransfer {
    pub destination: String,
    pub amount: f64,
    pub asset: String,
    pub signature: Option<String>,
}

/// Rail that records every transfer. Payouts (to bettors) and fees (to the
/// treasury) can be failed independently; an optional delay widens race
/// windows in concurrency tests.
pub struct RecordingRail {
    treasury: String,
    transfers: Mutex<Vec<RecordedTransfer>>,
    failing_destinations: Mutex<HashSet<String>>,
    fail_payouts: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    counter: AtomicU64,
}

impl RecordingRail {
    pub fn new() -> Self {
        Self {
            treasury: TREASURY.to_string(),
            transfers: Mutex::new(Vec::new()),
            failing_destinations: Mutex::new(HashSet::new()),
            fail_payouts: Mutex::new(false),
            delay: Mutex::new(None),
            counter: AtomicU64::new(0),
        }
    }

    pub fn fail_treasury(&self, fail: bool) {
        let mut set = self.failing_destinations.lock();
        if fail {
            set.insert(self.treasury.clone());
        } else {
            set.remove(&self.treasury);
        }
    }

    pub fn fail_payouts(&self, fail: bool) {
        *self.fail_payouts.lock() = fail;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.transfers.lock().clone()
    }

    /// Successful transfers to one destination
    pub fn paid_to(&self, destination: &str) -> Vec<RecordedTransfer> {
        self.transfers()
            .into_iter()
            .filter(|t| t.destination == destination && t.signature.is_some())
            .collect()
    }

    pub fn total_paid_to(&self, destination: &str) -> f64 {
        self.paid_to(destination).iter().map(|t| t.amount).sum()
    }
}

#[async_trait]
impl PaymentRail for RecordingRail {
    async fn transfer(&self, destination: &str, amount: f64, asset: &str) -> TransferReceipt {
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let fails = if destination == self.treasury {
            self.failing_destinations.lock().contains(destination)
        } else {
            *self.fail_payouts.lock()
        };

        let receipt = if fails {
            TransferReceipt::failed(format!("rail rejected transfer to {}", destination))
        } else {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            TransferReceipt::ok(format!("sig_{}", n))
        };

        self.transfers.lock().push(RecordedTransfer {
            destination: destination.to_string(),
            amount,
            asset: asset.to_string(),
            signature: receipt.signature.clone(),
        });
        receipt
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// In-memory store whose pending-fee write-backs can be made to fail
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fee_write_failures: AtomicU64,
    fee_writes: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls to `update_pending_fee`
    pub fn fail_next_fee_writes(&self, n: u64) {
        self.fee_write_failures.store(n, Ordering::SeqCst);
    }

    /// Every `update_pending_fee` call, failed or not
    pub fn fee_writes(&self) -> u64 {
        self.fee_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn get_bet(&self, tx: &str) -> StoreResult<Option<Bet>> {
        self.inner.get_bet(tx).await
    }

    async fn insert_bet(&self, bet: &Bet) -> StoreResult<()> {
        self.inner.insert_bet(bet).await
    }

    async fn delete_bet(&self, tx: &str) -> StoreResult<bool> {
        self.inner.delete_bet(tx).await
    }

    async fn bets_for_market(&self, market_id: &str) -> StoreResult<Vec<Bet>> {
        self.inner.bets_for_market(market_id).await
    }

    async fn bets_for_wallet(&self, wallet: &str) -> StoreResult<Vec<Bet>> {
        self.inner.bets_for_wallet(wallet).await
    }

    async fn pending_bets(&self) -> StoreResult<Vec<Bet>> {
        self.inner.pending_bets().await
    }

    async fn unclaimed_winners(
        &self,
        placed_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Bet>> {
        self.inner.unclaimed_winners(placed_before, stale_before).await
    }

    async fn resolve_bet(&self, tx: &str, status: BetStatus) -> StoreResult<bool> {
        self.inner.resolve_bet(tx, status).await
    }

    async fn acquire_claim_lock(
        &self,
        tx: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Bet>> {
        self.inner.acquire_claim_lock(tx, now, stale_before).await
    }

    async fn release_claim_lock(&self, tx: &str) -> StoreResult<()> {
        self.inner.release_claim_lock(tx).await
    }

    async fn mark_claimed(&self, tx: &str) -> StoreResult<bool> {
        self.inner.mark_claimed(tx).await
    }

    async fn nullifier_exists(&self, nullifier: &str) -> StoreResult<bool> {
        self.inner.nullifier_exists(nullifier).await
    }

    async fn insert_nullifier(&self, record: &NullifierRecord) -> StoreResult<bool> {
        self.inner.insert_nullifier(record).await
    }

    async fn get_pending_fee(&self, bet_tx: &str) -> StoreResult<Option<PendingFee>> {
        self.inner.get_pending_fee(bet_tx).await
    }

    async fn insert_pending_fee(&self, fee: &PendingFee) -> StoreResult<bool> {
        self.inner.insert_pending_fee(fee).await
    }

    async fn update_pending_fee(&self, fee: &PendingFee) -> StoreResult<()> {
        self.fee_writes.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fee_write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Request("connection reset".into()));
        }
        self.inner.update_pending_fee(fee).await
    }

    async fn lease_pending_fee(
        &self,
        bet_tx: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PendingFee>> {
        self.inner.lease_pending_fee(bet_tx, now).await
    }

    async fn retryable_fees(&self, max_retries: u32, limit: usize) -> StoreResult<Vec<PendingFee>> {
        self.inner.retryable_fees(max_retries, limit).await
    }

    async fn all_pending_fees(&self) -> StoreResult<Vec<PendingFee>> {
        self.inner.all_pending_fees().await
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub fn test_config() -> SettlementConfig {
    SettlementConfig {
        payout: PayoutConfig {
            payment_rail_url: Some("http://rail.test".into()),
            vault_authority_key: Some("vault_key".into()),
            treasury_address: Some(TREASURY.into()),
        },
        ..SettlementConfig::default()
    }
}

/// Fully wired service over an in-memory store
pub struct Harness {
    pub store: MemoryStore,
    pub oracle: Arc<ScriptedOracle>,
    pub rail: Arc<RecordingRail>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SettlementConfig) -> Self {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::new());
        let rail = Arc::new(RecordingRail::new());
        let state = AppState::new(
            &config,
            Arc::new(store.clone()),
            oracle.clone(),
            Some(rail.clone() as Arc<dyn PaymentRail>),
        );
        Self { store, oracle, rail, state }
    }

    /// No payment rail at all
    pub fn without_rail(config: SettlementConfig) -> Self {
        let store = MemoryStore::new();
        let oracle = Arc::new(ScriptedOracle::new());
        let rail = Arc::new(RecordingRail::new());
        let state = AppState::new(&config, Arc::new(store.clone()), oracle.clone(), None);
        Self { store, oracle, rail, state }
    }

    pub async fn place(&self, tx: &str, market: &str, outcome: Outcome, amount: f64, wallet: &str) -> Bet {
        self.place_at(tx, market, outcome, amount, wallet, Utc::now()).await
    }

    pub async fn place_at(
        &self,
        tx: &str,
        market: &str,
        outcome: Outcome,
        amount: f64,
        wallet: &str,
        placed_at: DateTime<Utc>,
    ) -> Bet {
        let mut bet = Bet::new_pending(tx, market, outcome, amount, wallet, ASSET, placed_at);
        bet.commitment = Some(Commitment { commitment: format!("commit_{}", tx), nullifier: None });
        self.store.insert_bet(&bet).await.unwrap();
        bet
    }

    pub async fn bet(&self, tx: &str) -> Bet {
        self.store.get_bet(tx).await.unwrap().unwrap()
    }
}

/// Proof matching a bet placed through [`Harness::place`]
pub fn proof_for(bet: &Bet) -> ClaimProof {
    let commitment = bet.commitment.clone().unwrap();
    ClaimProof {
        nullifier: commitment.nullifier(),
        outcome: bet.outcome,
        commitment: Some(commitment.commitment),
    }
}

pub fn claim_request(bet: &Bet) -> ClaimRequest {
    ClaimRequest {
        bet_tx: bet.tx.clone(),
        wallet: bet.wallet.clone(),
        proof: proof_for(bet),
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
