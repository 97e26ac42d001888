//! Service configuration, loaded from the environment (and `.env` via dotenv).

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Inconsistent(String),
}

/// Vault / treasury wiring. Any missing piece surfaces on the claim path as
/// a server misconfiguration, not at startup.
#[derive(Debug, Clone, Default)]
pub struct PayoutConfig {
    pub payment_rail_url: Option<String>,
    pub vault_authority_key: Option<String>,
    pub treasury_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub bind_addr: SocketAddr,
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,
    pub oracle_url: String,
    pub payout: PayoutConfig,
    pub supported_assets: BTreeSet<String>,
    pub fee_rate: f64,
    pub claim_lock_timeout: Duration,
    pub sweep_lock_timeout: Duration,
    pub auto_payout_grace: Duration,
    pub sweep_interval: Duration,
    pub fee_retry_interval: Duration,
    pub fee_max_retries: u32,
    pub fee_retry_batch_size: usize,
    pub fee_retry_secret: Option<String>,
    pub rate_limits: RateLimitConfig,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            supabase_url: None,
            supabase_service_role_key: None,
            oracle_url: "http://localhost:9090".to_string(),
            payout: PayoutConfig::default(),
            supported_assets: ["USDC".to_string()].into_iter().collect(),
            fee_rate: 0.02,
            claim_lock_timeout: Duration::from_secs(30),
            sweep_lock_timeout: Duration::from_secs(60),
            auto_payout_grace: Duration::from_secs(48 * 3600),
            sweep_interval: Duration::from_secs(300),
            fee_retry_interval: Duration::from_secs(600),
            fee_max_retries: 5,
            fee_retry_batch_size: 10,
            fee_retry_secret: None,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl SettlementConfig {
    /// Load from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup (tests pass a map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "BIND_ADDR", value: v.clone() })?,
            None => defaults.bind_addr,
        };

        let supported_assets = match get("SUPPORTED_ASSETS") {
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.supported_assets,
        };

        let fee_rate = parse_or(&get, "PROTOCOL_FEE_RATE", defaults.fee_rate)?;
        if !(0.0..1.0).contains(&fee_rate) {
            return Err(ConfigError::Invalid { key: "PROTOCOL_FEE_RATE", value: fee_rate.to_string() });
        }

        let rate_limits = RateLimitConfig {
            window: secs(&get, "RATE_LIMIT_WINDOW_SECS", defaults.rate_limits.window)?,
            claim: parse_or(&get, "RATE_LIMIT_CLAIM", defaults.rate_limits.claim)?,
            deposit: parse_or(&get, "RATE_LIMIT_DEPOSIT", defaults.rate_limits.deposit)?,
            status: parse_or(&get, "RATE_LIMIT_STATUS", defaults.rate_limits.status)?,
        };

        let config = Self {
            bind_addr,
            supabase_url: get("SUPABASE_URL"),
            supabase_service_role_key: get("SUPABASE_SERVICE_ROLE_KEY"),
            oracle_url: get("ORACLE_URL").unwrap_or(defaults.oracle_url),
            payout: PayoutConfig {
                payment_rail_url: get("PAYMENT_RAIL_URL"),
                vault_authority_key: get("VAULT_AUTHORITY_KEY"),
                treasury_address: get("TREASURY_ADDRESS"),
            },
            supported_assets,
            fee_rate,
            claim_lock_timeout: secs(&get, "CLAIM_LOCK_TIMEOUT_SECS", defaults.claim_lock_timeout)?,
            sweep_lock_timeout: secs(&get, "SWEEP_LOCK_TIMEOUT_SECS", defaults.sweep_lock_timeout)?,
            auto_payout_grace: Duration::from_secs(
                parse_or(&get, "AUTO_PAYOUT_GRACE_HOURS", defaults.auto_payout_grace.as_secs() / 3600)?
                    .saturating_mul(3600),
            ),
            sweep_interval: secs(&get, "SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            fee_retry_interval: secs(&get, "FEE_RETRY_INTERVAL_SECS", defaults.fee_retry_interval)?,
            fee_max_retries: parse_or(&get, "FEE_MAX_RETRIES", defaults.fee_max_retries)?,
            fee_retry_batch_size: parse_or(&get, "FEE_RETRY_BATCH_SIZE", defaults.fee_retry_batch_size)?,
            fee_retry_secret: get("FEE_RETRY_SECRET"),
            rate_limits,
        };

        if config.supabase_url.is_some() != config.supabase_service_role_key.is_some() {
            return Err(ConfigError::Inconsistent(
                "SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together".into(),
            ));
        }

        Ok(config)
    }

    pub fn is_supported_asset(&self, asset: &str) -> bool {
        self.supported_assets.contains(asset)
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key, value: v }),
        None => Ok(default),
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match parse_or(get, key, default.as_secs())? {
        0 => Err(ConfigError::Invalid { key, value: "0".into() }),
        n => Ok(Duration::from_secs(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<SettlementConfig, ConfigError> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        SettlementConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.fee_rate, 0.02);
        assert_eq!(config.claim_lock_timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_lock_timeout, Duration::from_secs(60));
        assert_eq!(config.auto_payout_grace, Duration::from_secs(48 * 3600));
        assert!(config.is_supported_asset("USDC"));
        assert!(config.payout.treasury_address.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SUPPORTED_ASSETS", "USDC, SOL"),
            ("PROTOCOL_FEE_RATE", "0.05"),
            ("FEE_MAX_RETRIES", "3"),
            ("TREASURY_ADDRESS", "treasury1"),
        ])
        .unwrap();
        assert!(config.is_supported_asset("SOL"));
        assert_eq!(config.fee_rate, 0.05);
        assert_eq!(config.fee_max_retries, 3);
        assert_eq!(config.payout.treasury_address.as_deref(), Some("treasury1"));
    }

    #[test]
    fn test_fee_rate_out_of_range() {
        assert!(load(&[("PROTOCOL_FEE_RATE", "1.0")]).is_err());
        assert!(load(&[("PROTOCOL_FEE_RATE", "-0.1")]).is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(
            load(&[("SWEEP_INTERVAL_SECS", "0")]),
            Err(ConfigError::Invalid { key: "SWEEP_INTERVAL_SECS", .. })
        ));
        assert!(load(&[("SWEEP_INTERVAL_SECS", "abc")]).is_err());
    }

    #[test]
    fn test_supabase_pair_required() {
        assert!(matches!(
            load(&[("SUPABASE_URL", "https://x.supabase.co")]),
            Err(ConfigError::Inconsistent(_))
        ));
    }
}
