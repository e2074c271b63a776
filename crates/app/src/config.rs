//! Application configuration from the environment.

use ember_mempool::MempoolConfig;
use ember_validators::{SlashPolicy, ValidatorParams};
use ember_types::STAKE_UNIT_DECIMALS;
use primitive_types::U256;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("invalid value for {key}: {value}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Node configuration. Everything here is explicit constructor input to
/// [`crate::Application`]; nothing reads the environment after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Must match the consensus engine's genesis.
    pub chain_id: String,
    /// Root of the persistent store.
    pub data_dir: PathBuf,
    /// Minimum active-validator stake, in base units.
    pub min_stake: U256,
    pub max_validators: usize,
    pub mempool_size_limit: usize,
    pub mempool_rps: f64,
    pub mempool_burst: f64,
    pub mempool_tx_ttl_secs: u64,
    /// Validator rotation deltas are computed every this many blocks.
    pub rotation_interval: u64,
    pub missed_block_threshold: u32,
    pub slash_percent: u8,
    pub slash_percent_cap: u8,
    pub slash_jail_secs: u64,
    /// Blocks behind the tip the engine is advised it may prune to.
    pub retain_window: u64,
}

impl Config {
    /// Defaults for a chain id. Testnets (a chain id containing "test")
    /// get the low minimum stake.
    pub fn new(chain_id: impl Into<String>) -> Self {
        let chain_id = chain_id.into();
        let min_whole = if chain_id.contains("test") { 10 } else { 1000 };
        Config {
            chain_id,
            data_dir: PathBuf::from("./data"),
            min_stake: whole_coins(min_whole),
            max_validators: 100,
            mempool_size_limit: 1000,
            mempool_rps: 10.0,
            mempool_burst: 20.0,
            mempool_tx_ttl_secs: 600,
            rotation_interval: 100,
            missed_block_threshold: 100,
            slash_percent: 5,
            slash_percent_cap: 50,
            slash_jail_secs: 24 * 60 * 60,
            retain_window: 10_000,
        }
    }

    /// Read the recognized environment keys, falling back to defaults.
    pub fn from_env() -> Result<Config, ConfigError> {
        let chain_id = std::env::var("CHAIN_ID").unwrap_or_else(|_| "ember".to_string());
        let mut config = Config::new(chain_id);
        if let Ok(dir) = std::env::var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = parse_env::<u64>("MIN_STAKE")? {
            config.min_stake = whole_coins(v);
        }
        if let Some(v) = parse_env("MAX_VALIDATORS")? {
            config.max_validators = v;
        }
        if let Some(v) = parse_env("MEMPOOL_SIZE_LIMIT")? {
            config.mempool_size_limit = v;
        }
        if let Some(v) = parse_env("MEMPOOL_RPS")? {
            config.mempool_rps = v;
        }
        if let Some(v) = parse_env("MEMPOOL_BURST")? {
            config.mempool_burst = v;
        }
        if let Some(v) = parse_env("MEMPOOL_TX_TTL_SECS")? {
            config.mempool_tx_ttl_secs = v;
        }
        if let Some(v) = parse_env("ROTATION_INTERVAL")? {
            config.rotation_interval = v;
        }
        if let Some(v) = parse_env("MISSED_BLOCK_THRESHOLD")? {
            config.missed_block_threshold = v;
        }
        if let Some(v) = parse_env("SLASH_PERCENT")? {
            config.slash_percent = v;
        }
        if let Some(v) = parse_env("SLASH_PERCENT_CAP")? {
            config.slash_percent_cap = v;
        }
        Ok(config)
    }

    pub fn validator_params(&self) -> ValidatorParams {
        ValidatorParams {
            min_stake: self.min_stake,
            max_validators: self.max_validators,
        }
    }

    pub fn slash_policy(&self) -> SlashPolicy {
        SlashPolicy {
            missed_block_threshold: self.missed_block_threshold,
            slash_percent: self.slash_percent,
            slash_percent_cap: self.slash_percent_cap,
            jail_duration_secs: self.slash_jail_secs,
        }
    }

    pub fn mempool_config(&self) -> MempoolConfig {
        MempoolConfig {
            size_limit: self.mempool_size_limit,
            rps: self.mempool_rps,
            burst: self.mempool_burst,
            tx_ttl_secs: self.mempool_tx_ttl_secs,
            ..MempoolConfig::default()
        }
    }
}

fn whole_coins(n: u64) -> U256 {
    U256::from(n) * U256::exp10(STAKE_UNIT_DECIMALS as usize)
}

fn parse_env<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { key, value }),
        Err(_) => Ok(None),
    }
}
