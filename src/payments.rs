//! Payment Rail
//!
//! Outbound token transfers from the protocol vault. The rail never
//! returns `Err`: transport and rail failures are folded into a
//! [`TransferReceipt`] with `success = false`, which is the contract the
//! claim and sweep paths branch on.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Result of one `transfer(destination, amount, asset)` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    #[serde(default)]
    pub signature: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl TransferReceipt {
    pub fn ok(signature: impl Into<String>) -> Self {
        Self { signature: Some(signature.into()), success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { signature: None, success: false, error: Some(error.into()) }
    }

    pub fn error_message(&self) -> String {
        self.error.clone().unwrap_or_else(|| "transfer failed".to_string())
    }
}

#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn transfer(&self, destination: &str, amount: f64, asset: &str) -> TransferReceipt;
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    destination: &'a str,
    amount: f64,
    asset: &'a str,
}

/// HTTP relay that signs with the vault authority: `POST {base_url}/transfer`
#[derive(Clone)]
pub struct HttpPaymentRail {
    client: Client,
    base_url: String,
    authority_key: String,
}

impl HttpPaymentRail {
    pub fn new(base_url: impl Into<String>, authority_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authority_key: authority_key.into(),
        }
    }
}

#[async_trait]
impl PaymentRail for HttpPaymentRail {
    async fn transfer(&self, destination: &str, amount: f64, asset: &str) -> TransferReceipt {
        let request = TransferRequest { destination, amount, asset };
        let idempotency_key = uuid::Uuid::new_v4().to_string();

        let response = match self
            .client
            .post(format!("{}/transfer", self.base_url))
            .header("Authorization", format!("Bearer {}", self.authority_key))
            .header("Idempotency-Key", &idempotency_key)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(destination, amount, asset, "payment rail unreachable: {}", e);
                return TransferReceipt::failed(format!("Payment rail unreachable: {}", e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return TransferReceipt::failed(format!("Payment rail error: {} - {}", status, body));
        }

        match response.json::<TransferReceipt>().await {
            Ok(receipt) if receipt.success && receipt.signature.is_none() => {
                TransferReceipt::failed("Payment rail reported success without a signature")
            }
            Ok(receipt) => receipt,
            Err(e) => TransferReceipt::failed(format!("Malformed payment rail response: {}", e)),
        }
    }
}
