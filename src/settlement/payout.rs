//! Parimutuel payout calculator
//!
//! The one and only payout formula. Both payout authorities call
//! [`quote`]; nothing else computes a claim amount.

use serde::{Deserialize, Serialize};

/// Claim amount for a winning stake.
///
/// `payout = bet + (bet / winning_pool) * losing_pool * (1 - fee_rate)`.
/// The winning pool includes the bettor's own stake. An empty winning pool
/// returns the stake unchanged.
pub fn payout(bet_amount: f64, winning_pool: f64, losing_pool: f64, fee_rate: f64) -> f64 {
    if winning_pool <= 0.0 {
        return bet_amount;
    }
    let share = bet_amount / winning_pool;
    let net_losing_pool = losing_pool * (1.0 - fee_rate);
    bet_amount + share * net_losing_pool
}

/// Protocol fee owed on a winning stake: `losing_pool * fee_rate * share`
pub fn treasury_fee(bet_amount: f64, winning_pool: f64, losing_pool: f64, fee_rate: f64) -> f64 {
    if winning_pool <= 0.0 {
        return 0.0;
    }
    let share = bet_amount / winning_pool;
    losing_pool * fee_rate * share
}

/// Full breakdown of one payout decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutQuote {
    pub bet_amount: f64,
    pub winning_pool: f64,
    pub losing_pool: f64,
    pub fee_rate: f64,
    pub share: f64,
    pub payout: f64,
    pub fee: f64,
}

pub fn quote(bet_amount: f64, winning_pool: f64, losing_pool: f64, fee_rate: f64) -> PayoutQuote {
    let share = if winning_pool > 0.0 { bet_amount / winning_pool } else { 1.0 };
    PayoutQuote {
        bet_amount,
        winning_pool,
        losing_pool,
        fee_rate,
        share,
        payout: payout(bet_amount, winning_pool, losing_pool, fee_rate),
        fee: treasury_fee(bet_amount, winning_pool, losing_pool, fee_rate),
    }
}
