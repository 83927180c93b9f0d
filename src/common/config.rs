use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::universal::classifier::DEFAULT_DEX_PROGRAMS;
use crate::universal::executor::ExecutionMode;

/// Process-wide runtime configuration.
///
/// Loaded from the environment (after `.env` is applied by `dotenv`), one
/// field per upper-cased variable, e.g. `RPC_ENDPOINTS`, `FEE_OFFSET_SOL`.
/// Every field except the wallet key has a default so a dry run works with
/// an empty environment.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Comma-separated JSON-RPC endpoints, tried in order on failure.
    #[serde(default = "default_rpc_endpoints")]
    pub rpc_endpoints: Vec<String>,
    #[serde(default = "default_rpc_timeout_seconds")]
    pub rpc_timeout_seconds: u64,
    #[serde(default = "default_rpc_retry_attempts")]
    pub rpc_retry_attempts: usize,
    #[serde(default = "default_rpc_backoff_base_ms")]
    pub rpc_backoff_base_ms: u64,
    #[serde(default = "default_rpc_backoff_max_ms")]
    pub rpc_backoff_max_ms: u64,

    /// Base58-encoded secret key used to sign exit swaps. Required for LIVE.
    #[serde(default)]
    pub wallet_private_key: Option<String>,
    /// Wallet whose trades open positions. Defaults to each transaction's fee payer.
    #[serde(default)]
    pub observer_wallet: Option<String>,
    /// Comma-separated swap program ids; a transaction that references none
    /// of them is rejected. Set to an empty value to accept everything.
    #[serde(default = "default_dex_program_ids")]
    pub dex_program_ids: Vec<String>,
    /// `DRY_RUN` or `LIVE`.
    #[serde(default = "default_execution_mode")]
    pub execution_mode: String,

    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_price_poll_interval_ms")]
    pub price_poll_interval_ms: u64,

    /// Network plus aggregator fee (SOL) subtracted from the cost basis.
    #[serde(default = "default_fee_offset_sol")]
    pub fee_offset_sol: f64,
    #[serde(default = "default_position_cooldown_secs")]
    pub position_cooldown_secs: i64,
    #[serde(default = "default_position_cache_path")]
    pub position_cache_path: PathBuf,
    #[serde(default)]
    pub exit_strategy_path: Option<PathBuf>,

    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default = "default_priority_fee_lamports")]
    pub priority_fee_lamports: u64,
    #[serde(default = "default_max_swap_retries")]
    pub max_swap_retries: usize,
    #[serde(default = "default_confirm_timeout_seconds")]
    pub confirm_timeout_seconds: u64,
}

fn default_rpc_endpoints() -> Vec<String> {
    vec!["https://api.mainnet-beta.solana.com".to_string()]
}
fn default_rpc_timeout_seconds() -> u64 {
    10
}
fn default_rpc_retry_attempts() -> usize {
    2
}
fn default_rpc_backoff_base_ms() -> u64 {
    200
}
fn default_rpc_backoff_max_ms() -> u64 {
    2_000
}
fn default_dex_program_ids() -> Vec<String> {
    DEFAULT_DEX_PROGRAMS.iter().map(|id| id.to_string()).collect()
}
fn default_execution_mode() -> String {
    "DRY_RUN".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_price_poll_interval_ms() -> u64 {
    1_000
}
fn default_fee_offset_sol() -> f64 {
    0.004
}
fn default_position_cooldown_secs() -> i64 {
    24 * 3600
}
fn default_position_cache_path() -> PathBuf {
    PathBuf::from("data/cache.json")
}
fn default_slippage_bps() -> u16 {
    1_000
}
fn default_priority_fee_lamports() -> u64 {
    5_000_000
}
fn default_max_swap_retries() -> usize {
    3
}
fn default_confirm_timeout_seconds() -> u64 {
    60
}

impl RuntimeConfig {
    /// Apply `.env` (if present) and read the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        envy::from_env::<RuntimeConfig>().context("failed to read runtime config from environment")
    }

    /// Build from explicit key/value pairs; keys use the same upper-case names
    /// as the environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, RuntimeConfig>(pairs).context("failed to parse runtime config")
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn price_poll_interval(&self) -> Duration {
        Duration::from_millis(self.price_poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_seconds)
    }

    /// Allowlisted swap programs with blanks dropped; empty disables the check.
    pub fn dex_programs(&self) -> Vec<String> {
        self.dex_program_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Unknown values fall back to dry-run.
    pub fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::parse(&self.execution_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(kv: &[(&str, &str)]) -> Vec<(String, String)> {
        kv.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = RuntimeConfig::from_pairs(Vec::new()).expect("defaults");
        assert_eq!(cfg.rpc_endpoints.len(), 1);
        assert_eq!(cfg.fee_offset_sol, 0.004);
        assert_eq!(cfg.position_cooldown_secs, 86_400);
        assert_eq!(cfg.execution_mode(), ExecutionMode::DryRun);
        assert!(cfg.wallet_private_key.is_none());
        assert_eq!(cfg.dex_programs().len(), DEFAULT_DEX_PROGRAMS.len());
    }

    #[test]
    fn dex_allowlist_can_be_replaced_or_disabled() {
        let cfg = RuntimeConfig::from_pairs(pairs(&[("DEX_PROGRAM_IDS", "ProgA, ProgB")])).unwrap();
        assert_eq!(cfg.dex_programs(), vec!["ProgA", "ProgB"]);

        let cfg = RuntimeConfig::from_pairs(pairs(&[("DEX_PROGRAM_IDS", "")])).unwrap();
        assert!(cfg.dex_programs().is_empty());
    }

    #[test]
    fn overrides_are_read_from_upper_case_keys() {
        let cfg = RuntimeConfig::from_pairs(pairs(&[
            ("RPC_ENDPOINTS", "https://a.example,https://b.example"),
            ("EXECUTION_MODE", "live"),
            ("FEE_OFFSET_SOL", "0.00404"),
            ("POSITION_COOLDOWN_SECS", "60"),
        ]))
        .expect("overrides");

        assert_eq!(cfg.rpc_endpoints, vec!["https://a.example", "https://b.example"]);
        assert_eq!(cfg.execution_mode(), ExecutionMode::Live);
        assert_eq!(cfg.fee_offset_sol, 0.00404);
        assert_eq!(cfg.position_cooldown_secs, 60);
    }

    #[test]
    fn malformed_number_is_an_error() {
        let res = RuntimeConfig::from_pairs(pairs(&[("PORT", "not-a-port")]));
        assert!(res.is_err());
    }
}
