//! Settlement Module - Claim Locking, Payout and Backup Settlement
//!
//! Pays winning wagers exactly once, even with two independent payout
//! authorities (the user claim path and the unattended backup sweep)
//! racing on the same bet, on a store without transactions.
//!
//! ## Flow (one claim):
//! 1. Acquire the bet's claim lock (single conditional update)
//! 2. Verify ownership, nullifier, market resolution and outcome
//! 3. Recompute pool totals and the parimutuel payout
//! 4. Pay the bettor from the vault
//! 5. Pay the protocol fee to the treasury (queued for retry on failure)
//! 6. Mark the bet claimed, record the nullifier, release the lock
//!
//! ## Security:
//! - The lock precondition excludes `claimed = true` rows, so a paid bet can
//!   never be locked (and therefore never paid) again
//! - Nullifiers are a second, append-only replay guard
//! - A failed fee transfer never rolls back the bettor's payout

pub mod payout;
pub mod lock;
pub mod claims;
pub mod executor;
pub mod coordinator;
pub mod fees;
pub mod sweep;
pub mod ledger;

pub use payout::{payout, treasury_fee, quote, PayoutQuote};
pub use lock::{ClaimLockManager, LockAttempt};
pub use claims::NullifierRegistry;
pub use executor::{PayoutExecutor, PayoutSource, SettledPayout};
pub use coordinator::{ClaimCoordinator, ClaimReceipt, ClaimRequest, ClaimStatusView};
pub use fees::{FeeBucket, FeeQueueStatus, FeeRetryQueue, FeeRetryReport, FeeRetryResult};
pub use sweep::{BackupSweep, SweepReport};
pub use ledger::{BetLedger, NewBet};

use crate::storage::StoreError;

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;

/// How a caller should treat a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// State says no. Retrying will not help until state changes.
    Rejection,
    /// Someone else holds the lock. Retry later.
    Contention,
    /// Outbound transfer failed; nothing was recorded.
    TransientPayment,
    /// Operator must fix configuration.
    Configuration,
    /// Anything else. Logged, surfaced generically.
    Internal,
}

/// Settlement errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettlementError {
    #[error("Bet not found: {0}")]
    NotFound(String),

    #[error("Bet already claimed")]
    AlreadyClaimed,

    #[error("Claim already in progress, retry shortly")]
    InProgress,

    #[error("Wallet does not own this bet")]
    NotOwner,

    #[error("Claim token already used")]
    NullifierUsed,

    #[error("Market has not settled yet")]
    MarketNotSettled,

    #[error("Proof does not match bet")]
    ProofMismatch,

    #[error("Bet outcome lost")]
    OutcomeLost,

    #[error("Bet already recorded: {0}")]
    DuplicateBet(String),

    #[error("Bet is not deletable: {0}")]
    NotDeletable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No payout configuration for asset {0}")]
    MissingAssetConfig(String),

    #[error("Server misconfiguration: {0}")]
    Misconfigured(String),

    #[error("Payout transfer failed: {0}")]
    PayoutFailed(String),

    #[error("Market oracle error: {0}")]
    Oracle(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_)
            | Self::AlreadyClaimed
            | Self::NotOwner
            | Self::NullifierUsed
            | Self::MarketNotSettled
            | Self::ProofMismatch
            | Self::OutcomeLost
            | Self::DuplicateBet(_)
            | Self::NotDeletable(_)
            | Self::InvalidRequest(_) => ErrorKind::Rejection,
            Self::InProgress => ErrorKind::Contention,
            Self::PayoutFailed(_) => ErrorKind::TransientPayment,
            Self::MissingAssetConfig(_) | Self::Misconfigured(_) => ErrorKind::Configuration,
            Self::Oracle(_) | Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable reason for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyClaimed | Self::NullifierUsed => "already_claimed",
            Self::InProgress => "in_progress",
            Self::NotOwner => "not_owner",
            Self::MarketNotSettled => "market_not_settled",
            Self::ProofMismatch => "proof_mismatch",
            Self::OutcomeLost => "outcome_lost",
            Self::DuplicateBet(_) => "duplicate_bet",
            Self::NotDeletable(_) => "not_deletable",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MissingAssetConfig(_) => "missing_asset_config",
            Self::Misconfigured(_) => "server_misconfiguration",
            Self::PayoutFailed(_) => "payout_failed",
            Self::Oracle(_) | Self::Store(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show a caller. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal error, please retry later".to_string(),
            ErrorKind::Configuration => "Server misconfiguration, contact support".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<crate::proof::ProofError> for SettlementError {
    fn from(e: crate::proof::ProofError) -> Self {
        SettlementError::InvalidRequest(e.to_string())
    }
}

impl From<crate::oracle::OracleError> for SettlementError {
    fn from(e: crate::oracle::OracleError) -> Self {
        SettlementError::Oracle(e.to_string())
    }
}
