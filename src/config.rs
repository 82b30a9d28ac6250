//! Configuration management for the Cell Swap Engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::{Address, H256};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub quoting: QuotingConfig,
    #[serde(default)]
    pub preferences: PreferencesConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Retries allowed for a transient error before it surfaces
    pub max_retries: u32,
    /// Upper bound for a single backoff delay
    pub retry_max_delay_ms: u64,
    /// Hop wait expressed in blocks of the chain the hop lands on
    pub hop_timeout_blocks: u64,
    /// Lower bound for any hop wait
    pub min_hop_timeout_ms: u64,
    /// Capacity of the notification broadcast channel
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

fn default_notification_capacity() -> usize {
    256
}

fn default_health_check_interval() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 6,
            retry_max_delay_ms: 30_000,
            hop_timeout_blocks: 150,
            min_hop_timeout_ms: 60_000,
            notification_capacity: default_notification_capacity(),
            health_check_interval_secs: default_health_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `memory` or a sqlx SQLite URL such as `sqlite://swap-engine.db`
    pub url: String,
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

fn default_history_retention() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// JSON-RPC endpoint of the wallet provider that signs and sends
    pub endpoint: String,
    /// Account the wallet sends from
    pub account: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotingConfig {
    pub url: Option<String>,
    pub debounce_ms: u64,
    pub timeout_ms: u64,
}

impl Default for QuotingConfig {
    fn default() -> Self {
        Self {
            url: None,
            debounce_ms: 400,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesConfig {
    pub min_slippage_bps: u32,
    pub max_slippage_bps: u32,
    pub default_slippage_bps: u32,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            min_slippage_bps: 1,
            max_slippage_bps: 5_000,
            default_slippage_bps: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub blockchain_id: H256,
    pub rpc_urls: Vec<String>,
    pub wrapped_native: Address,
    pub teleporter_messenger: Option<Address>,
    #[serde(default)]
    pub ictt: Vec<Address>,
    pub min_gas_price_gwei: u64,
    pub avg_block_time_ms: u64,
    pub avg_block_time_sample_range: u64,
    #[serde(default)]
    pub adapters: Vec<Address>,
    #[serde(default)]
    pub cells: Vec<Address>,
    /// Overrides the depth derived from the block time
    pub confirmation_blocks: Option<u64>,
    pub enabled: bool,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("CELL_SWAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                if chain.avg_block_time_ms == 0 {
                    anyhow::bail!("Chain {} has a zero average block time", name);
                }
                if chain.cells.is_empty() {
                    tracing::warn!("Chain {} has no cells - cross-chain hops will fail", name);
                }
            }
        }

        let prefs = &self.preferences;
        if prefs.min_slippage_bps > prefs.max_slippage_bps
            || !(prefs.min_slippage_bps..=prefs.max_slippage_bps)
                .contains(&prefs.default_slippage_bps)
        {
            anyhow::bail!(
                "Slippage bounds are inconsistent: min {} default {} max {}",
                prefs.min_slippage_bps,
                prefs.default_slippage_bps,
                prefs.max_slippage_bps
            );
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [engine]
        max_retries = 4
        retry_max_delay_ms = 10000
        hop_timeout_blocks = 100
        min_hop_timeout_ms = 30000

        [storage]
        url = "memory"

        [api]
        host = "127.0.0.1"
        port = 8547

        [metrics]
        enabled = false
        port = 9547

        [wallet]
        endpoint = "${CELL_SWAP_TEST_WALLET}"
        account = "0x00000000000000000000000000000000000000aa"

        [chains.c-chain]
        chain_id = 43114
        name = "Avalanche C-Chain"
        blockchain_id = "0x0427d4b22a2a78bcddd456742caf91b56badbff985ee19aef14573e7343fd652"
        rpc_urls = ["https://api.avax.network/ext/bc/C/rpc"]
        wrapped_native = "0xb31f66aa3c1e785363f0875a1b74e27b85fd66c7"
        min_gas_price_gwei = 25
        avg_block_time_ms = 2000
        avg_block_time_sample_range = 50
        cells = ["0x0000000000000000000000000000000000000c01"]
        enabled = true

        [chains.disabled]
        chain_id = 99999
        name = "Disabled"
        blockchain_id = "0x0000000000000000000000000000000000000000000000000000000000000001"
        rpc_urls = []
        wrapped_native = "0x0000000000000000000000000000000000000001"
        min_gas_price_gwei = 1
        avg_block_time_ms = 1000
        avg_block_time_sample_range = 10
        enabled = false
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_parse_sample_settings() {
        env::set_var("CELL_SWAP_TEST_WALLET", "http://127.0.0.1:1248");
        let settings = Settings::from_toml(SAMPLE).unwrap();

        assert_eq!(settings.wallet.endpoint, "http://127.0.0.1:1248");
        assert_eq!(settings.enabled_chains().len(), 1);
        assert_eq!(settings.quoting.debounce_ms, 400);
        assert_eq!(settings.preferences.default_slippage_bps, 50);
        assert_eq!(settings.engine.notification_capacity, 256);
    }

    #[test]
    fn test_rejects_inverted_slippage_bounds() {
        let input = format!(
            "{}\n[preferences]\nmin_slippage_bps = 100\nmax_slippage_bps = 10\ndefault_slippage_bps = 50\n",
            SAMPLE
        );
        assert!(Settings::from_toml(&input).is_err());
    }
}
