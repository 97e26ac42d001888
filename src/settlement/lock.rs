//! Claim Lock Manager
//!
//! Advisory, timeout-bounded mutual exclusion on one bet row, built from a
//! single conditional update. A holder that crashes blocks the bet until
//! the timeout passes; after that the lock is stealable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::SettlementResult;
use crate::storage::{Bet, SettlementStore};

/// Outcome of one acquisition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LockAttempt {
    /// Lock held; the row as it was when locked
    Acquired(Bet),
    NotFound,
    AlreadyClaimed,
    /// Another holder's lock is still fresh
    InProgress,
}

#[derive(Clone)]
pub struct ClaimLockManager {
    store: Arc<dyn SettlementStore>,
    timeout: chrono::Duration,
}

impl ClaimLockManager {
    pub fn new(store: Arc<dyn SettlementStore>, timeout: Duration) -> Self {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(30));
        Self { store, timeout }
    }

    pub fn timeout(&self) -> chrono::Duration {
        self.timeout
    }

    /// Locks taken before this instant are considered abandoned
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.timeout
    }

    pub async fn acquire(&self, tx: &str) -> SettlementResult<LockAttempt> {
        self.acquire_at(tx, Utc::now()).await
    }

    pub async fn acquire_at(&self, tx: &str, now: DateTime<Utc>) -> SettlementResult<LockAttempt> {
        if let Some(bet) = self.store.acquire_claim_lock(tx, now, self.stale_before(now)).await? {
            debug!(bet_tx = %tx, "claim lock acquired");
            return Ok(LockAttempt::Acquired(bet));
        }

        // Lost the conditional update; read back to explain why
        let attempt = match self.store.get_bet(tx).await? {
            None => LockAttempt::NotFound,
            Some(bet) if bet.claimed => LockAttempt::AlreadyClaimed,
            Some(_) => LockAttempt::InProgress,
        };
        debug!(bet_tx = %tx, ?attempt, "claim lock not acquired");
        Ok(attempt)
    }

    /// Clear the lock. Failures are logged; the timeout still frees the row.
    pub async fn release(&self, tx: &str) {
        if let Err(e) = self.store.release_claim_lock(tx).await {
            warn!(bet_tx = %tx, "failed to release claim lock, it will expire: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, Outcome};

    async fn manager_with_bet() -> (ClaimLockManager, MemoryStore) {
        let store = MemoryStore::new();
        let bet = Bet::new_pending("tx1", "m1", Outcome::Yes, 5.0, "alice", "USDC", Utc::now());
        store.insert_bet(&bet).await.unwrap();
        let manager = ClaimLockManager::new(Arc::new(store.clone()), Duration::from_secs(30));
        (manager, store)
    }

    #[tokio::test]
    async fn test_acquire_then_contend() {
        let (locks, _) = manager_with_bet().await;
        let now = Utc::now();
        assert!(matches!(locks.acquire_at("tx1", now).await.unwrap(), LockAttempt::Acquired(_)));
        assert_eq!(locks.acquire_at("tx1", now).await.unwrap(), LockAttempt::InProgress);
    }

    #[tokio::test]
    async fn test_release_frees_lock() {
        let (locks, _) = manager_with_bet().await;
        let now = Utc::now();
        locks.acquire_at("tx1", now).await.unwrap();
        locks.release("tx1").await;
        assert!(matches!(locks.acquire_at("tx1", now).await.unwrap(), LockAttempt::Acquired(_)));
    }

    #[tokio::test]
    async fn test_abandoned_lock_is_stealable() {
        let (locks, _) = manager_with_bet().await;
        let now = Utc::now();
        locks.acquire_at("tx1", now).await.unwrap();
        let later = now + chrono::Duration::seconds(31);
        assert!(matches!(locks.acquire_at("tx1", later).await.unwrap(), LockAttempt::Acquired(_)));
    }

    #[tokio::test]
    async fn test_missing_and_claimed() {
        let (locks, store) = manager_with_bet().await;
        assert_eq!(locks.acquire("nope").await.unwrap(), LockAttempt::NotFound);
        store.mark_claimed("tx1").await.unwrap();
        assert_eq!(locks.acquire("tx1").await.unwrap(), LockAttempt::AlreadyClaimed);
    }
}
