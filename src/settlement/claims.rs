//! Nullifier Registry - Prevents Replay of Claim Tokens
//!
//! Append-only set of nullifiers consumed by successful payouts. A
//! duplicate insert is reported, never raised, so a retrying caller can
//! always finish. The `claimed` flag guarded by the claim lock remains the
//! primary double-payout defense; this is the second one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::SettlementResult;
use crate::storage::{NullifierRecord, SettlementStore};

#[derive(Clone)]
pub struct NullifierRegistry {
    store: Arc<dyn SettlementStore>,
}

impl NullifierRegistry {
    pub fn new(store: Arc<dyn SettlementStore>) -> Self {
        Self { store }
    }

    /// Check if a nullifier has been consumed
    pub async fn is_consumed(&self, nullifier: &str) -> SettlementResult<bool> {
        Ok(self.store.nullifier_exists(nullifier).await?)
    }

    /// Record a nullifier as consumed. Returns `false` if it already was.
    pub async fn consume(&self, nullifier: &str, used_at: DateTime<Utc>) -> SettlementResult<bool> {
        let record = NullifierRecord { nullifier: nullifier.to_string(), used_at };
        let inserted = self.store.insert_nullifier(&record).await?;
        if !inserted {
            warn!(nullifier = %nullifier, "nullifier already recorded");
        }
        Ok(inserted)
    }
}
