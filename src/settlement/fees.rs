//! Treasury Fee Retry Queue
//!
//! Protocol fee transfers that failed after the bettor was already paid.
//! One row per bet (`bet_tx` is the key); re-enqueueing bumps `retry_count`
//! and overwrites the error. A periodic sweep retries the oldest rows.
//! Rows that reach `max_retries` stay put for an operator to handle, as do
//! rows still leased by a retry whose outcome was never written back.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{SettlementError, SettlementResult};
use crate::payments::PaymentRail;
use crate::storage::{PendingFee, SettlementStore};

/// Write-back attempts for one retried fee before the row is left leased
const RECORD_ATTEMPTS: u32 = 3;

/// Outcome of one retried fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRetryResult {
    pub bet_tx: String,
    pub success: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRetryReport {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<FeeRetryResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBucket {
    pub count: usize,
    pub total_amount: f64,
}

impl FeeBucket {
    fn add(&mut self, amount: f64) {
        self.count += 1;
        self.total_amount += amount;
    }
}

/// Queue health: still retrying, exhausted (needs an operator), paid, leased
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQueueStatus {
    pub pending: FeeBucket,
    pub failed: FeeBucket,
    pub successful: FeeBucket,
    /// Leased rows: a retry is running, or its outcome was never recorded
    pub in_flight: FeeBucket,
    pub max_retries: u32,
}

#[derive(Clone)]
pub struct FeeRetryQueue {
    store: Arc<dyn SettlementStore>,
    rail: Option<Arc<dyn PaymentRail>>,
    treasury: Option<String>,
    max_retries: u32,
    batch_size: usize,
}

impl FeeRetryQueue {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        rail: Option<Arc<dyn PaymentRail>>,
        treasury: Option<String>,
        max_retries: u32,
        batch_size: usize,
    ) -> Self {
        Self { store, rail, treasury, max_retries, batch_size }
    }

    /// Record a failed fee transfer (upsert on `bet_tx`)
    pub async fn enqueue(
        &self,
        bet_tx: &str,
        amount: f64,
        asset: &str,
        error: &str,
    ) -> SettlementResult<PendingFee> {
        self.enqueue_at(bet_tx, amount, asset, error, Utc::now()).await
    }

    pub async fn enqueue_at(
        &self,
        bet_tx: &str,
        amount: f64,
        asset: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> SettlementResult<PendingFee> {
        let fresh = PendingFee {
            bet_tx: bet_tx.to_string(),
            amount,
            asset: asset.to_string(),
            error: Some(error.to_string()),
            created_at: now,
            updated_at: now,
            retry_count: 0,
            success_tx: None,
            processing_at: None,
        };

        if self.store.insert_pending_fee(&fresh).await? {
            warn!(bet_tx = %bet_tx, amount, asset = %asset, "treasury fee queued for retry: {}", error);
            return Ok(fresh);
        }

        let Some(mut existing) = self.store.get_pending_fee(bet_tx).await? else {
            return Err(SettlementError::Internal(format!(
                "pending fee for {} vanished during upsert",
                bet_tx
            )));
        };
        if existing.is_settled() || existing.is_leased() {
            return Ok(existing);
        }
        existing.retry_count += 1;
        existing.error = Some(error.to_string());
        existing.updated_at = now;
        self.store.update_pending_fee(&existing).await?;
        warn!(bet_tx = %bet_tx, retry_count = existing.retry_count, "treasury fee re-queued: {}", error);
        Ok(existing)
    }

    /// Retry up to one batch of fees, oldest first.
    ///
    /// Each row is leased before its transfer, so overlapping batches never
    /// pay the same fee twice. A row whose outcome cannot be written back
    /// keeps its lease and is not retried until an operator clears it.
    pub async fn process_batch(&self) -> SettlementResult<FeeRetryReport> {
        let (Some(rail), Some(treasury)) = (self.rail.as_ref(), self.treasury.as_deref()) else {
            return Err(SettlementError::Misconfigured(
                "fee retry requires a payment rail and treasury address".into(),
            ));
        };

        let rows = self.store.retryable_fees(self.max_retries, self.batch_size).await?;
        let mut report = FeeRetryReport::default();

        for row in rows {
            let Some(mut fee) = self.store.lease_pending_fee(&row.bet_tx, Utc::now()).await? else {
                debug!(bet_tx = %row.bet_tx, "pending fee leased elsewhere, skipping");
                continue;
            };
            report.processed += 1;
            let receipt = rail.transfer(treasury, fee.amount, &fee.asset).await;
            fee.updated_at = Utc::now();
            fee.processing_at = None;

            let result = if receipt.success {
                fee.success_tx = receipt.signature.clone();
                fee.error = None;
                info!(bet_tx = %fee.bet_tx, amount = fee.amount, "✅ treasury fee settled on retry");
                FeeRetryResult {
                    bet_tx: fee.bet_tx.clone(),
                    success: true,
                    retry_count: fee.retry_count,
                    tx: receipt.signature,
                    error: None,
                }
            } else {
                fee.retry_count += 1;
                fee.error = Some(receipt.error_message());
                if fee.retry_count >= self.max_retries {
                    error!(
                        bet_tx = %fee.bet_tx,
                        amount = fee.amount,
                        "treasury fee exhausted {} retries, needs manual intervention",
                        self.max_retries
                    );
                } else {
                    warn!(bet_tx = %fee.bet_tx, retry_count = fee.retry_count, "treasury fee retry failed");
                }
                FeeRetryResult {
                    bet_tx: fee.bet_tx.clone(),
                    success: false,
                    retry_count: fee.retry_count,
                    tx: None,
                    error: fee.error.clone(),
                }
            };

            self.record_outcome(&fee).await;

            if result.success {
                report.successful += 1;
            } else {
                report.failed += 1;
            }
            report.results.push(result);
        }

        Ok(report)
    }

    /// Write a retried row back, releasing its lease. On repeated failure the
    /// lease stays and the row is left for an operator.
    async fn record_outcome(&self, fee: &PendingFee) {
        let mut last_error = None;
        for attempt in 1..=RECORD_ATTEMPTS {
            match self.store.update_pending_fee(fee).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(bet_tx = %fee.bet_tx, attempt, "failed to record fee retry: {}", e);
                    last_error = Some(e);
                }
            }
        }
        error!(
            bet_tx = %fee.bet_tx,
            success_tx = ?fee.success_tx,
            "fee retry outcome not recorded, row stays leased for manual review: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        );
    }

    pub async fn status(&self) -> SettlementResult<FeeQueueStatus> {
        let mut status = FeeQueueStatus { max_retries: self.max_retries, ..Default::default() };
        for fee in self.store.all_pending_fees().await? {
            if fee.is_settled() {
                status.successful.add(fee.amount);
            } else if fee.is_leased() {
                status.in_flight.add(fee.amount);
            } else if fee.retry_count >= self.max_retries {
                status.failed.add(fee.amount);
            } else {
                status.pending.add(fee.amount);
            }
        }
        Ok(status)
    }

    /// Periodic retry sweep; runs until `shutdown` flips to true
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "💰 treasury fee retry sweep started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_batch().await {
                        Ok(report) if report.processed > 0 => info!(
                            processed = report.processed,
                            successful = report.successful,
                            failed = report.failed,
                            "fee retry batch complete"
                        ),
                        Ok(_) => {}
                        Err(e) => error!("fee retry batch failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("treasury fee retry sweep stopped");
    }
}
