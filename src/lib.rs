pub mod alert;
pub mod providers;
pub mod swap;

use std::path::PathBuf;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use secrecy::SecretString;
use url::Url;

// --- Process settings ---

#[derive(Debug)]
pub struct Settings {
    pub rpc_url: Option<Url>,
    pub chain_id: u64,
    pub private_key: Option<SecretString>,
    pub aggregator_url: Url,
    pub pool_url: Url,
    pub dry_run: bool,
    /// Custodian address reported in paper mode.
    pub dry_run_address: Address,
    pub data_dir: Option<PathBuf>,
    pub alert_webhook_url: Option<Url>,
    pub log_dir: Option<PathBuf>,
    pub confirmations: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let url = |key: &str| -> Result<Option<Url>> {
            non_empty(key)
                .map(|v| v.parse::<Url>().with_context(|| format!("{} is not a valid URL", key)))
                .transpose()
        };

        let aggregator_url = url("SWAP_AGGREGATOR_URL")?.context("SWAP_AGGREGATOR_URL is required")?;
        let pool_url = url("SWAP_POOL_URL")?.context("SWAP_POOL_URL is required")?;
        let rpc_url = url("SWAP_RPC_URL")?;
        let alert_webhook_url = url("SWAP_ALERT_WEBHOOK_URL")?;

        let chain_id = match non_empty("SWAP_CHAIN_ID") {
            Some(v) => v.parse().context("SWAP_CHAIN_ID must be an integer")?,
            None => 1,
        };
        let confirmations = non_empty("SWAP_CONFIRMATIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let dry_run = non_empty("SWAP_DRY_RUN")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);
        let dry_run_address = match non_empty("SWAP_DRY_RUN_ADDRESS") {
            Some(v) => v.parse().context("SWAP_DRY_RUN_ADDRESS is not an address")?,
            None => Address::ZERO,
        };
        let private_key = non_empty("SWAP_PRIVATE_KEY").map(SecretString::from);

        if !dry_run && (rpc_url.is_none() || private_key.is_none()) {
            anyhow::bail!(
                "🚨 FATAL: SWAP_DRY_RUN=false but SWAP_RPC_URL or SWAP_PRIVATE_KEY is missing. \
                 Set SWAP_DRY_RUN=true or provide both."
            );
        }

        Ok(Self {
            rpc_url,
            chain_id,
            private_key,
            aggregator_url,
            pool_url,
            dry_run,
            dry_run_address,
            data_dir: non_empty("SWAP_DATA_DIR").map(PathBuf::from),
            alert_webhook_url,
            log_dir: non_empty("SWAP_LOG_DIR").map(PathBuf::from),
            confirmations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    const BASE: [(&str, &str); 2] = [
        ("SWAP_AGGREGATOR_URL", "https://agg.example"),
        ("SWAP_POOL_URL", "http://127.0.0.1:7070"),
    ];

    #[test]
    fn test_defaults_to_dry_run() {
        let s = settings(&BASE).unwrap();
        assert!(s.dry_run);
        assert_eq!(s.chain_id, 1);
        assert_eq!(s.confirmations, 1);
        assert!(s.data_dir.is_none());
    }

    #[test]
    fn test_live_mode_requires_key_and_rpc() {
        let mut env = BASE.to_vec();
        env.push(("SWAP_DRY_RUN", "false"));
        assert!(settings(&env).is_err());

        env.push(("SWAP_RPC_URL", "http://localhost:8545"));
        env.push(("SWAP_PRIVATE_KEY", " 0xabc "));
        let s = settings(&env).unwrap();
        assert!(!s.dry_run);
        assert_eq!(s.private_key.unwrap().expose_secret(), "0xabc");
    }

    #[test]
    fn test_private_key_is_redacted_in_debug() {
        let mut env = BASE.to_vec();
        env.push(("SWAP_PRIVATE_KEY", "0xdeadbeef"));
        let s = settings(&env).unwrap();
        assert!(!format!("{:?}", s).contains("deadbeef"));
    }

    #[test]
    fn test_missing_or_bad_urls_are_errors() {
        assert!(settings(&BASE[..1]).is_err());
        let mut env = BASE.to_vec();
        env.push(("SWAP_ALERT_WEBHOOK_URL", "not a url"));
        assert!(settings(&env).is_err());
    }
}
