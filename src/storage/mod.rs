// ============================================================================
// SETTLEMENT STORAGE LAYER
// ============================================================================
//
// Row-level persistence for the settlement core. Three tables:
// - bets:          one row per wager, keyed by the wager transfer receipt (tx)
// - nullifiers:    append-only set of consumed claim tokens
// - pending_fees:  treasury fee transfers awaiting retry, keyed by bet tx
//
// ARCHITECTURE:
// ┌─────────────────────────────────────────────────────────────────┐
// │        ClaimCoordinator        BackupSweep       FeeRetryQueue  │
// │               │                     │                  │        │
// │               └──────────┬──────────┴──────────────────┘        │
// │                          ▼                                      │
// │              Arc<dyn SettlementStore>                           │
// │                 │                   │                           │
// │          ┌──────┴──────┐     ┌──────┴───────┐                   │
// │          │ MemoryStore │     │ SupabaseStore│                   │
// │          │  (DashMap)  │     │  (PostgREST) │                   │
// │          └─────────────┘     └──────────────┘                   │
// └─────────────────────────────────────────────────────────────────┘
//
// CONCURRENCY MODEL:
// - No multi-statement transactions. Every mutation that must be atomic
//   is a single conditional update on one row (see acquire_claim_lock,
//   resolve_bet, mark_claimed, insert_nullifier).
// - Duplicate inserts on unique keys report `false`, never an error.
//
// ============================================================================

pub mod memory;
pub mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ERRORS
// ============================================================================

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Row already exists: {0}")]
    Conflict(String),

    #[error("Storage request failed: {0}")]
    Request(String),

    #[error("Storage returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed row: {0}")]
    Decode(String),
}

// ============================================================================
// DOMAIN RECORDS
// ============================================================================

/// Side of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" => Some(Outcome::Yes),
            "no" => Some(Outcome::No),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "yes",
            Outcome::No => "no",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bet lifecycle. Only `Pending -> Won` and `Pending -> Lost` exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
        }
    }
}

/// Opaque commitment attached to a confidential wager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub commitment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullifier: Option<String>,
}

impl Commitment {
    /// Nullifier this commitment consumes when paid out
    pub fn nullifier(&self) -> String {
        self.nullifier
            .clone()
            .unwrap_or_else(|| crate::proof::derive_nullifier(&self.commitment))
    }
}

/// One wager on one market outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub tx: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub amount: f64,
    pub wallet: String,
    pub asset: String,
    pub placed_at: DateTime<Utc>,
    pub status: BetStatus,
    pub claimed: bool,
    #[serde(default)]
    pub claim_lock: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commitment: Option<Commitment>,
}

impl Bet {
    /// A freshly recorded wager
    pub fn new_pending(
        tx: impl Into<String>,
        market_id: impl Into<String>,
        outcome: Outcome,
        amount: f64,
        wallet: impl Into<String>,
        asset: impl Into<String>,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tx: tx.into(),
            market_id: market_id.into(),
            outcome,
            amount,
            wallet: wallet.into(),
            asset: asset.into(),
            placed_at,
            status: BetStatus::Pending,
            claimed: false,
            claim_lock: None,
            commitment: None,
        }
    }

    /// True while a lock taken at or after `stale_before` is still held
    pub fn is_locked(&self, stale_before: DateTime<Utc>) -> bool {
        matches!(self.claim_lock, Some(at) if at >= stale_before)
    }

    /// Lost, or won and already paid: nothing left to claim
    pub fn is_settled(&self) -> bool {
        self.status == BetStatus::Lost || (self.status == BetStatus::Won && self.claimed)
    }
}

/// Consumed claim token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifierRecord {
    pub nullifier: String,
    pub used_at: DateTime<Utc>,
}

/// Protocol fee transfer that failed and must eventually succeed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFee {
    pub bet_tx: String,
    pub amount: f64,
    pub asset: String,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(default)]
    pub success_tx: Option<String>,
    /// Set while a retry owns the row. Never expires on its own: a row still
    /// leased after its worker is gone may already be paid.
    #[serde(default)]
    pub processing_at: Option<DateTime<Utc>>,
}

impl PendingFee {
    pub fn is_settled(&self) -> bool {
        self.success_tx.is_some()
    }

    pub fn is_leased(&self) -> bool {
        self.processing_at.is_some()
    }
}

/// Stake totals per side of one market, over every placed bet
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolTotals {
    pub yes: f64,
    pub no: f64,
}

impl PoolTotals {
    pub fn from_bets<'a>(bets: impl IntoIterator<Item = &'a Bet>) -> Self {
        bets.into_iter().fold(Self::default(), |mut totals, bet| {
            match bet.outcome {
                Outcome::Yes => totals.yes += bet.amount,
                Outcome::No => totals.no += bet.amount,
            }
            totals
        })
    }

    pub fn side(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }

    /// (winning, losing) pool for a resolved result
    pub fn split(&self, winner: Outcome) -> (f64, f64) {
        match winner {
            Outcome::Yes => (self.yes, self.no),
            Outcome::No => (self.no, self.yes),
        }
    }
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// Row-level CRUD over the settlement tables.
///
/// Implementations must make each conditional method a single atomic
/// check-and-set on one row; callers never assume more than that.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Short backend name for health output
    fn backend(&self) -> &'static str;

    // ---- bets ---------------------------------------------------------------

    async fn get_bet(&self, tx: &str) -> StoreResult<Option<Bet>>;

    /// Fails with `StoreError::Conflict` when `tx` already exists
    async fn insert_bet(&self, bet: &Bet) -> StoreResult<()>;

    async fn delete_bet(&self, tx: &str) -> StoreResult<bool>;

    async fn bets_for_market(&self, market_id: &str) -> StoreResult<Vec<Bet>>;

    async fn bets_for_wallet(&self, wallet: &str) -> StoreResult<Vec<Bet>>;

    async fn pending_bets(&self) -> StoreResult<Vec<Bet>>;

    /// `status = won AND claimed = false AND placed_at < placed_before`
    /// and not locked since `stale_before`
    async fn unclaimed_winners(
        &self,
        placed_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Bet>>;

    /// `SET status = $status WHERE tx = $tx AND status = 'pending'`
    async fn resolve_bet(&self, tx: &str, status: BetStatus) -> StoreResult<bool>;

    /// `SET claim_lock = $now WHERE tx = $tx AND claimed = false
    ///  AND (claim_lock IS NULL OR claim_lock < $stale_before) RETURNING *`
    async fn acquire_claim_lock(
        &self,
        tx: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Bet>>;

    /// `SET claim_lock = NULL WHERE tx = $tx`
    async fn release_claim_lock(&self, tx: &str) -> StoreResult<()>;

    /// `SET status = 'won', claimed = true WHERE tx = $tx AND claimed = false
    ///  AND status <> 'lost'`
    async fn mark_claimed(&self, tx: &str) -> StoreResult<bool>;

    // ---- nullifiers ---------------------------------------------------------

    async fn nullifier_exists(&self, nullifier: &str) -> StoreResult<bool>;

    /// Insert-if-absent. Returns `false` when the nullifier was already present.
    async fn insert_nullifier(&self, record: &NullifierRecord) -> StoreResult<bool>;

    // ---- pending fees -------------------------------------------------------

    async fn get_pending_fee(&self, bet_tx: &str) -> StoreResult<Option<PendingFee>>;

    /// Insert-if-absent. Returns `false` when a row for `bet_tx` already exists.
    async fn insert_pending_fee(&self, fee: &PendingFee) -> StoreResult<bool>;

    async fn update_pending_fee(&self, fee: &PendingFee) -> StoreResult<()>;

    /// `SET processing_at = $now WHERE bet_tx = $bet_tx AND success_tx IS NULL
    ///  AND processing_at IS NULL RETURNING *`
    async fn lease_pending_fee(
        &self,
        bet_tx: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PendingFee>>;

    /// Unsettled, unleased rows with `retry_count < max_retries`, oldest first
    async fn retryable_fees(&self, max_retries: u32, limit: usize) -> StoreResult<Vec<PendingFee>>;

    async fn all_pending_fees(&self) -> StoreResult<Vec<PendingFee>>;
}
