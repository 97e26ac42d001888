//! Supabase (PostgREST) settlement store
//!
//! Every trait method maps to exactly one REST request, so each conditional
//! update is one SQL `UPDATE ... WHERE ... RETURNING *` on the server side.
//!
//! Expected tables:
//! - `bets(tx pk, market_id, outcome, amount, wallet, asset, placed_at,
//!   status, claimed, claim_lock, commitment jsonb)`
//! - `nullifiers(nullifier pk, used_at)`
//! - `pending_fees(bet_tx pk, amount, asset, error, created_at, updated_at,
//!   retry_count, success_tx, processing_at)`

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    Bet, BetStatus, NullifierRecord, PendingFee, SettlementStore, StoreError, StoreResult,
};

const BETS: &str = "bets";
const NULLIFIERS: &str = "nullifiers";
const PENDING_FEES: &str = "pending_fees";

/// PostgREST client authenticated with the service role key
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    supabase_url: String,
    service_role_key: String,
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl SupabaseStore {
    pub fn new(supabase_url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            supabase_url: supabase_url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.supabase_url, name)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    async fn send(&self, builder: RequestBuilder) -> StoreResult<Response> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Conflict(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status { status: status.as_u16(), body });
        }
        Ok(response)
    }

    async fn rows<T: DeserializeOwned>(&self, builder: RequestBuilder) -> StoreResult<Vec<T>> {
        self.send(builder)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let builder = self
            .client
            .get(self.table(table))
            .query(&[("select", "*")])
            .query(filters);
        self.rows(builder).await
    }

    /// PATCH with filters, returning the rows that matched
    async fn patch<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: serde_json::Value,
    ) -> StoreResult<Vec<T>> {
        let builder = self
            .client
            .patch(self.table(table))
            .header("Prefer", "return=representation")
            .query(filters)
            .json(&body);
        self.rows(builder).await
    }

    /// POST that ignores duplicate keys; returns whether a row was created
    async fn insert_ignore<T: serde::Serialize + DeserializeOwned>(
        &self,
        table: &str,
        row: &T,
    ) -> StoreResult<bool> {
        let builder = self
            .client
            .post(self.table(table))
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(row);
        let inserted: Vec<T> = self.rows(builder).await?;
        Ok(!inserted.is_empty())
    }
}

#[async_trait]
impl SettlementStore for SupabaseStore {
    fn backend(&self) -> &'static str {
        "supabase"
    }

    async fn get_bet(&self, tx: &str) -> StoreResult<Option<Bet>> {
        let rows: Vec<Bet> = self.select(BETS, &[("tx", format!("eq.{}", tx))]).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_bet(&self, bet: &Bet) -> StoreResult<()> {
        let builder = self
            .client
            .post(self.table(BETS))
            .header("Prefer", "return=minimal")
            .json(bet);
        self.send(builder).await.map(|_| ())
    }

    async fn delete_bet(&self, tx: &str) -> StoreResult<bool> {
        let builder = self
            .client
            .delete(self.table(BETS))
            .header("Prefer", "return=representation")
            .query(&[("tx", format!("eq.{}", tx))]);
        let removed: Vec<Bet> = self.rows(builder).await?;
        Ok(!removed.is_empty())
    }

    async fn bets_for_market(&self, market_id: &str) -> StoreResult<Vec<Bet>> {
        self.select(BETS, &[("market_id", format!("eq.{}", market_id)), ("order", "placed_at.asc".into())])
            .await
    }

    async fn bets_for_wallet(&self, wallet: &str) -> StoreResult<Vec<Bet>> {
        self.select(BETS, &[("wallet", format!("eq.{}", wallet)), ("order", "placed_at.desc".into())])
            .await
    }

    async fn pending_bets(&self) -> StoreResult<Vec<Bet>> {
        self.select(BETS, &[("status", "eq.pending".into()), ("order", "placed_at.asc".into())])
            .await
    }

    async fn unclaimed_winners(
        &self,
        placed_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Bet>> {
        self.select(
            BETS,
            &[
                ("status", "eq.won".into()),
                ("claimed", "eq.false".into()),
                ("placed_at", format!("lt.{}", ts(placed_before))),
                ("or", format!("(claim_lock.is.null,claim_lock.lt.{})", ts(stale_before))),
                ("order", "placed_at.asc".into()),
            ],
        )
        .await
    }

    async fn resolve_bet(&self, tx: &str, status: BetStatus) -> StoreResult<bool> {
        let rows: Vec<Bet> = self
            .patch(
                BETS,
                &[("tx", format!("eq.{}", tx)), ("status", "eq.pending".into())],
                serde_json::json!({ "status": status }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn acquire_claim_lock(
        &self,
        tx: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Bet>> {
        let rows: Vec<Bet> = self
            .patch(
                BETS,
                &[
                    ("tx", format!("eq.{}", tx)),
                    ("claimed", "eq.false".into()),
                    ("or", format!("(claim_lock.is.null,claim_lock.lt.{})", ts(stale_before))),
                ],
                serde_json::json!({ "claim_lock": ts(now) }),
            )
            .await?;
        debug!(bet_tx = %tx, acquired = rows.len() == 1, "claim lock update");
        if rows.len() == 1 {
            Ok(rows.into_iter().next())
        } else {
            Ok(None)
        }
    }

    async fn release_claim_lock(&self, tx: &str) -> StoreResult<()> {
        let _: Vec<Bet> = self
            .patch(BETS, &[("tx", format!("eq.{}", tx))], serde_json::json!({ "claim_lock": null }))
            .await?;
        Ok(())
    }

    async fn mark_claimed(&self, tx: &str) -> StoreResult<bool> {
        let rows: Vec<Bet> = self
            .patch(
                BETS,
                &[
                    ("tx", format!("eq.{}", tx)),
                    ("claimed", "eq.false".into()),
                    ("status", "neq.lost".into()),
                ],
                serde_json::json!({ "status": BetStatus::Won, "claimed": true }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn nullifier_exists(&self, nullifier: &str) -> StoreResult<bool> {
        let rows: Vec<NullifierRecord> = self
            .select(NULLIFIERS, &[("nullifier", format!("eq.{}", nullifier))])
            .await?;
        Ok(!rows.is_empty())
    }

    async fn insert_nullifier(&self, record: &NullifierRecord) -> StoreResult<bool> {
        self.insert_ignore(NULLIFIERS, record).await
    }

    async fn get_pending_fee(&self, bet_tx: &str) -> StoreResult<Option<PendingFee>> {
        let rows: Vec<PendingFee> = self
            .select(PENDING_FEES, &[("bet_tx", format!("eq.{}", bet_tx))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_pending_fee(&self, fee: &PendingFee) -> StoreResult<bool> {
        self.insert_ignore(PENDING_FEES, fee).await
    }

    async fn update_pending_fee(&self, fee: &PendingFee) -> StoreResult<()> {
        let body = serde_json::to_value(fee).map_err(|e| StoreError::Decode(e.to_string()))?;
        let rows: Vec<PendingFee> = self
            .patch(PENDING_FEES, &[("bet_tx", format!("eq.{}", fee.bet_tx))], body)
            .await?;
        if rows.is_empty() {
            return Err(StoreError::Decode(format!("no pending fee for {}", fee.bet_tx)));
        }
        Ok(())
    }

    async fn lease_pending_fee(
        &self,
        bet_tx: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PendingFee>> {
        let rows: Vec<PendingFee> = self
            .patch(
                PENDING_FEES,
                &[
                    ("bet_tx", format!("eq.{}", bet_tx)),
                    ("success_tx", "is.null".into()),
                    ("processing_at", "is.null".into()),
                ],
                serde_json::json!({ "processing_at": ts(now) }),
            )
            .await?;
        debug!(bet_tx = %bet_tx, leased = rows.len() == 1, "pending fee lease update");
        Ok(rows.into_iter().next())
    }

    async fn retryable_fees(&self, max_retries: u32, limit: usize) -> StoreResult<Vec<PendingFee>> {
        self.select(
            PENDING_FEES,
            &[
                ("success_tx", "is.null".into()),
                ("processing_at", "is.null".into()),
                ("retry_count", format!("lt.{}", max_retries)),
                ("order", "created_at.asc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn all_pending_fees(&self) -> StoreResult<Vec<PendingFee>> {
        self.select(PENDING_FEES, &[]).await
    }
}
