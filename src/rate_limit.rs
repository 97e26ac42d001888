//! Per-identity sliding-window rate limiting
//!
//! One limiter is constructed at process start and shared through the app
//! state. Each (operation, identity) pair keeps the timestamps of its
//! recent requests; a request is admitted while fewer than `limit` of them
//! fall inside the window. Stale entries are purged periodically.
//!
//! State is process-local. Multiple instances behind a load balancer each
//! enforce their own budget.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Operations with distinct budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKind {
    ClaimSubmit,
    Deposit,
    StatusCheck,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub claim: u32,
    pub deposit: u32,
    pub status: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            claim: 5,
            deposit: 10,
            status: 30,
        }
    }
}

impl RateLimitConfig {
    fn limit(&self, kind: RateLimitKind) -> u32 {
        match kind {
            RateLimitKind::ClaimSubmit => self.claim,
            RateLimitKind::Deposit => self.deposit,
            RateLimitKind::StatusCheck => self.status,
        }
    }
}

/// Rejection carrying how long the caller should wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: Arc<DashMap<(RateLimitKind, String), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, entries: Arc::new(DashMap::new()) }
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    pub fn check(&self, kind: RateLimitKind, identity: &str) -> Result<(), RateLimited> {
        self.check_at(kind, identity, Instant::now())
    }

    pub fn check_at(
        &self,
        kind: RateLimitKind,
        identity: &str,
        now: Instant,
    ) -> Result<(), RateLimited> {
        let limit = self.config.limit(kind) as usize;
        let window = self.config.window;
        let mut hits = self.entries.entry((kind, identity.to_string())).or_default();

        while matches!(hits.front(), Some(t) if now.duration_since(*t) >= window) {
            hits.pop_front();
        }

        if hits.len() >= limit {
            let retry_after = match hits.front() {
                Some(oldest) => window.saturating_sub(now.duration_since(*oldest)),
                None => window,
            };
            // Round up so a caller never retries a moment too early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            return Err(RateLimited { retry_after_secs: secs.max(1) });
        }

        hits.push_back(now);
        Ok(())
    }

    /// Drop identities with no hits inside the window
    pub fn purge_stale(&self) -> usize {
        self.purge_stale_at(Instant::now())
    }

    pub fn purge_stale_at(&self, now: Instant) -> usize {
        let window = self.config.window;
        let before = self.entries.len();
        self.entries.retain(|_, hits| {
            hits.back().map(|t| now.duration_since(*t) < window).unwrap_or(false)
        });
        before - self.entries.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(claim: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            claim,
            deposit: 10,
            status: 30,
        })
    }

    #[test]
    fn test_allows_up_to_limit() {
        let rl = limiter(3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(rl.check_at(RateLimitKind::ClaimSubmit, "alice", now).is_ok());
        }
        let err = rl.check_at(RateLimitKind::ClaimSubmit, "alice", now).unwrap_err();
        assert_eq!(err.retry_after_secs, 60);
    }

    #[test]
    fn test_budgets_are_independent() {
        let rl = limiter(1);
        let now = Instant::now();
        assert!(rl.check_at(RateLimitKind::ClaimSubmit, "alice", now).is_ok());
        assert!(rl.check_at(RateLimitKind::ClaimSubmit, "alice", now).is_err());
        assert!(rl.check_at(RateLimitKind::StatusCheck, "alice", now).is_ok());
        assert!(rl.check_at(RateLimitKind::ClaimSubmit, "bob", now).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let rl = limiter(1);
        let start = Instant::now();
        assert!(rl.check_at(RateLimitKind::ClaimSubmit, "alice", start).is_ok());

        let err = rl
            .check_at(RateLimitKind::ClaimSubmit, "alice", start + Duration::from_secs(45))
            .unwrap_err();
        assert_eq!(err.retry_after_secs, 15);

        assert!(rl
            .check_at(RateLimitKind::ClaimSubmit, "alice", start + Duration::from_secs(60))
            .is_ok());
    }

    #[test]
    fn test_purge_stale() {
        let rl = limiter(5);
        let start = Instant::now();
        rl.check_at(RateLimitKind::ClaimSubmit, "alice", start).unwrap();
        rl.check_at(RateLimitKind::Deposit, "bob", start + Duration::from_secs(50)).unwrap();
        assert_eq!(rl.tracked_identities(), 2);

        let removed = rl.purge_stale_at(start + Duration::from_secs(70));
        assert_eq!(removed, 1);
        assert_eq!(rl.tracked_identities(), 1);
    }
}
