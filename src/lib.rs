//! Wager Settlement Service
//!
//! Settles confidential binary prediction-market wagers: pays winners once,
//! routes the protocol fee to the treasury, and sweeps up winners nobody
//! claimed.
//!
//! ## Architecture
//!
//! - **Storage**: Supabase/PostgREST (conditional row updates) or DashMap (dev/tests)
//! - **Server**: Axum
//! - **Payouts**: vault relay over HTTP, protocol fee retried until it lands
//! - **Safety**: advisory claim lock + `claimed` flag + nullifier registry

// Core
pub mod settlement;
pub mod storage;

// Boundaries
pub mod oracle;
pub mod payments;
pub mod proof;

// Infrastructure
pub mod config;
pub mod rate_limit;
pub mod routes;

// ============================================================================
// PUBLIC API
// ============================================================================

pub use config::{ConfigError, PayoutConfig, SettlementConfig};
pub use oracle::{HttpMarketOracle, MarketOracle, MarketSnapshot, MarketStatus, OracleError};
pub use payments::{HttpPaymentRail, PaymentRail, TransferReceipt};
pub use proof::{derive_nullifier, ClaimProof, ProofError, RawClaimProof};
pub use rate_limit::{RateLimitConfig, RateLimitKind, RateLimited, RateLimiter};
pub use routes::{build_router, AppState};

pub use settlement::{
    BackupSweep, BetLedger, ClaimCoordinator, ClaimLockManager, ClaimReceipt, ClaimRequest,
    ClaimStatusView, ErrorKind, FeeRetryQueue, NewBet, NullifierRegistry, PayoutExecutor,
    SettlementError, SettlementResult, SweepReport,
};

pub use storage::{
    Bet, BetStatus, Commitment, MemoryStore, Outcome, PendingFee, SettlementStore, StoreError,
    SupabaseStore,
};
