//! Market Oracle Adapter
//!
//! Read-only view of a third-party prediction market: is it closed, and
//! which side won. The raw provider payload is validated here so callers
//! only ever see a well-formed [`MarketSnapshot`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::storage::Outcome;

#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("Market not found: {0}")]
    NotFound(String),

    #[error("Oracle request failed: {0}")]
    Request(String),

    #[error("Malformed market payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Closed,
}

/// Validated market state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub market_id: String,
    pub status: MarketStatus,
    pub result: Option<Outcome>,
    pub close_time: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    /// Winning side, only once the market is closed with a yes/no result
    pub fn resolved_outcome(&self) -> Option<Outcome> {
        match self.status {
            MarketStatus::Closed => self.result,
            MarketStatus::Open => None,
        }
    }
}

/// Provider payload before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarket {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
}

impl RawMarket {
    pub fn validate(self, market_id: &str) -> Result<MarketSnapshot, OracleError> {
        let status = match self.status.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "open" || s == "active" => MarketStatus::Open,
            Some(s) if s == "closed" || s == "resolved" || s == "settled" => MarketStatus::Closed,
            Some(other) => {
                return Err(OracleError::Malformed(format!("unknown status '{}'", other)))
            }
            None => return Err(OracleError::Malformed("missing status".into())),
        };

        let result = match self.result.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(r) if r.eq_ignore_ascii_case("none") || r.eq_ignore_ascii_case("null") => None,
            Some(r) => Some(
                Outcome::parse(r)
                    .ok_or_else(|| OracleError::Malformed(format!("unknown result '{}'", r)))?,
            ),
        };

        Ok(MarketSnapshot {
            market_id: market_id.to_string(),
            status,
            result,
            close_time: self.close_time,
        })
    }
}

/// Read-only market oracle
#[async_trait]
pub trait MarketOracle: Send + Sync {
    async fn fetch_market(&self, market_id: &str) -> Result<MarketSnapshot, OracleError>;
}

/// HTTP oracle: `GET {base_url}/markets/{market_id}`
#[derive(Clone)]
pub struct HttpMarketOracle {
    client: Client,
    base_url: String,
}

impl HttpMarketOracle {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MarketOracle for HttpMarketOracle {
    async fn fetch_market(&self, market_id: &str) -> Result<MarketSnapshot, OracleError> {
        let url = format!("{}/markets/{}", self.base_url, market_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OracleError::NotFound(market_id.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Request(format!("{} - {}", status, body)));
        }

        let raw: RawMarket = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        raw.validate(market_id)
    }
}
