//! Claim proof validation
//!
//! Proofs arrive as loosely-typed JSON from the wallet. They are validated
//! into a [`ClaimProof`] at the boundary, before any store access, so the
//! coordinator never sees a half-formed proof.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::storage::Outcome;

/// Proof payload as submitted. Every field optional so validation can name
/// exactly what is missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClaimProof {
    #[serde(default)]
    pub nullifier: Option<String>,
    #[serde(default)]
    pub commitment: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub bet_tx: Option<String>,
}

/// Validated claim proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimProof {
    pub nullifier: String,
    pub outcome: Outcome,
    pub commitment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    #[error("Proof is missing field: {0}")]
    MissingField(&'static str),

    #[error("Proof outcome must be 'yes' or 'no', got '{0}'")]
    InvalidOutcome(String),

    #[error("Proof was issued for bet {proof}, not {requested}")]
    BetMismatch { proof: String, requested: String },
}

impl RawClaimProof {
    /// Validate against the bet the caller is claiming
    pub fn validate(self, bet_tx: &str) -> Result<ClaimProof, ProofError> {
        let outcome_raw = non_empty(self.outcome).ok_or(ProofError::MissingField("outcome"))?;
        let outcome =
            Outcome::parse(&outcome_raw).ok_or(ProofError::InvalidOutcome(outcome_raw))?;

        if let Some(proof_tx) = non_empty(self.bet_tx) {
            if proof_tx != bet_tx {
                return Err(ProofError::BetMismatch {
                    proof: proof_tx,
                    requested: bet_tx.to_string(),
                });
            }
        }

        let commitment = non_empty(self.commitment);
        let nullifier = match (non_empty(self.nullifier), &commitment) {
            (Some(n), _) => n,
            (None, Some(c)) => derive_nullifier(c),
            (None, None) => return Err(ProofError::MissingField("nullifier")),
        };

        Ok(ClaimProof { nullifier, outcome, commitment })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Deterministic nullifier for a commitment that does not carry one
pub fn derive_nullifier(commitment: &str) -> String {
    let data = format!("nullifier|{}", commitment);
    hex::encode(Sha256::digest(data.as_bytes()))
}
