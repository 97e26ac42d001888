//! Treasury Fee Retry Queue Tests
//!
//! - One row per bet, retry_count bumped on every failure
//! - Settled rows are never touched again
//! - Exhausted rows drop out of the retry batch
//! - A row is leased while retried: overlapping batches pay once

mod test_helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use wager_settlement::payments::PaymentRail;
use wager_settlement::settlement::{FeeRetryQueue, SettlementError};
use wager_settlement::storage::{Outcome, SettlementStore};

use test_helpers::{
    approx, claim_request, test_config, FlakyStore, Harness, RecordingRail, ASSET, TREASURY,
};

#[tokio::test]
async fn test_enqueue_upserts_on_bet_tx() {
    let h = Harness::new();
    let fees = &h.state.fees;

    let first = fees.enqueue("tx1", 6.0, ASSET, "rail down").await.unwrap();
    assert_eq!(first.retry_count, 0);

    let second = fees.enqueue("tx1", 6.0, ASSET, "still down").await.unwrap();
    assert_eq!(second.retry_count, 1);
    assert_eq!(second.error.as_deref(), Some("still down"));

    let rows = h.store.all_pending_fees().await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_retry_until_success_then_frozen() {
    let h = Harness::new();
    let fees = &h.state.fees;
    fees.enqueue("tx1", 6.0, ASSET, "rail down").await.unwrap();

    h.rail.fail_treasury(true);
    let report = fees.process_batch().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.results[0].retry_count, 1);

    h.rail.fail_treasury(false);
    let report = fees.process_batch().await.unwrap();
    assert_eq!(report.successful, 1);
    assert!(report.results[0].tx.is_some());

    let row = h.store.get_pending_fee("tx1").await.unwrap().unwrap();
    assert!(row.success_tx.is_some());
    assert_eq!(row.retry_count, 1);
    assert!(approx(h.rail.total_paid_to(TREASURY), 6.0));

    // Settled rows are out of the batch and ignore re-enqueueing
    let report = fees.process_batch().await.unwrap();
    assert_eq!(report.processed, 0);
    let again = fees.enqueue("tx1", 6.0, ASSET, "late failure").await.unwrap();
    assert_eq!(again.retry_count, 1);
    assert!(again.success_tx.is_some());
}

#[tokio::test]
async fn test_exhausted_rows_need_operator() {
    let mut config = test_config();
    config.fee_max_retries = 2;
    let h = Harness::with_config(config);
    let fees = &h.state.fees;
    fees.enqueue("tx1", 4.0, ASSET, "rail down").await.unwrap();
    fees.enqueue("tx2", 1.0, ASSET, "rail down").await.unwrap();
    h.rail.fail_treasury(true);

    fees.process_batch().await.unwrap();
    fees.process_batch().await.unwrap();
    let report = fees.process_batch().await.unwrap();
    assert_eq!(report.processed, 0);

    let status = fees.status().await.unwrap();
    assert_eq!(status.failed.count, 2);
    assert!(approx(status.failed.total_amount, 5.0));
    assert_eq!(status.pending.count, 0);
    assert_eq!(status.successful.count, 0);
    assert_eq!(status.max_retries, 2);
}

#[tokio::test]
async fn test_batch_takes_oldest_first() {
    let mut config = test_config();
    config.fee_retry_batch_size = 2;
    let h = Harness::with_config(config);
    let fees = &h.state.fees;
    let base = Utc::now();
    for (i, tx) in ["tx_old", "tx_mid", "tx_new"].iter().enumerate() {
        fees.enqueue_at(tx, 1.0, ASSET, "down", base + chrono::Duration::seconds(i as i64))
            .await
            .unwrap();
    }

    let report = fees.process_batch().await.unwrap();
    assert_eq!(report.processed, 2);
    let done: Vec<_> = report.results.iter().map(|r| r.bet_tx.as_str()).collect();
    assert_eq!(done, vec!["tx_old", "tx_mid"]);

    let status = fees.status().await.unwrap();
    assert_eq!(status.successful.count, 2);
    assert_eq!(status.pending.count, 1);
}

#[tokio::test]
async fn test_retry_without_rail_is_misconfiguration() {
    let h = Harness::without_rail(test_config());
    h.state.fees.enqueue("tx1", 1.0, ASSET, "down").await.unwrap();

    let err = h.state.fees.process_batch().await.unwrap_err();
    assert!(matches!(err, SettlementError::Misconfigured(_)));
}

#[tokio::test]
async fn test_fee_from_failed_claim_is_retried() {
    let h = Harness::new();
    let bet = h.place("tx_alice", "m1", Outcome::Yes, 100.0, "alice").await;
    h.place("tx_bob", "m1", Outcome::No, 300.0, "bob").await;
    h.oracle.resolve("m1", Outcome::Yes);
    h.rail.fail_treasury(true);
    h.state.coordinator.claim(claim_request(&bet)).await.unwrap();

    h.rail.fail_treasury(false);
    let report = h.state.fees.process_batch().await.unwrap();
    assert_eq!(report.successful, 1);
    assert_eq!(report.results[0].bet_tx, "tx_alice");
    assert!(approx(h.rail.total_paid_to(TREASURY), 6.0));
    // The bettor was paid once, before and independent of the fee
    assert_eq!(h.rail.paid_to("alice").len(), 1);
}

#[tokio::test]
async fn test_overlapping_batches_pay_once() {
    let h = Harness::new();
    h.state.fees.enqueue("tx1", 6.0, ASSET, "rail down").await.unwrap();
    h.rail.set_delay(Duration::from_millis(50));

    let periodic = h.state.fees.clone();
    let manual = h.state.fees.clone();
    let (a, b) = tokio::join!(periodic.process_batch(), manual.process_batch());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.successful + b.successful, 1);
    assert_eq!(a.processed + b.processed, 1);
    assert_eq!(h.rail.paid_to(TREASURY).len(), 1);
    assert!(approx(h.rail.total_paid_to(TREASURY), 6.0));

    let row = h.store.get_pending_fee("tx1").await.unwrap().unwrap();
    assert!(row.success_tx.is_some());
    assert!(row.processing_at.is_none());
}

#[tokio::test]
async fn test_unrecorded_success_not_paid_again() {
    let store = Arc::new(FlakyStore::new());
    let rail = Arc::new(RecordingRail::new());
    let fees = FeeRetryQueue::new(
        store.clone(),
        Some(rail.clone() as Arc<dyn PaymentRail>),
        Some(TREASURY.to_string()),
        5,
        10,
    );
    fees.enqueue("tx1", 6.0, ASSET, "rail down").await.unwrap();

    store.fail_next_fee_writes(3);
    let report = fees.process_batch().await.unwrap();
    assert_eq!(report.successful, 1);
    assert_eq!(rail.paid_to(TREASURY).len(), 1);
    assert_eq!(store.fee_writes(), 3);

    // The transfer went out but the row never learned it: it stays leased
    let row = store.get_pending_fee("tx1").await.unwrap().unwrap();
    assert!(row.success_tx.is_none());
    assert!(row.processing_at.is_some());

    // The store is healthy again; the row still waits for an operator
    let report = fees.process_batch().await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(rail.paid_to(TREASURY).len(), 1);

    let status = fees.status().await.unwrap();
    assert_eq!(status.in_flight.count, 1);
    assert_eq!(status.pending.count, 0);
}

#[tokio::test]
async fn test_transient_write_failure_is_retried() {
    let store = Arc::new(FlakyStore::new());
    let rail = Arc::new(RecordingRail::new());
    let fees = FeeRetryQueue::new(
        store.clone(),
        Some(rail.clone() as Arc<dyn PaymentRail>),
        Some(TREASURY.to_string()),
        5,
        10,
    );
    fees.enqueue("tx1", 6.0, ASSET, "rail down").await.unwrap();

    store.fail_next_fee_writes(1);
    let report = fees.process_batch().await.unwrap();
    assert_eq!(report.successful, 1);
    assert_eq!(store.fee_writes(), 2);
    assert_eq!(rail.paid_to(TREASURY).len(), 1);
    let row = store.get_pending_fee("tx1").await.unwrap().unwrap();
    assert!(row.success_tx.is_some());
    assert!(row.processing_at.is_none());
}
