use anyhow::{Result, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::IndexerError;
use crate::protocol::ProtocolKind;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: String,
    /// How far back (in blocks) the first backfill of a chain reaches.
    #[serde(default = "default_history_blocks")]
    pub default_history_blocks: i64,
    /// Upper bound on in-flight trove-manager reads/writes within one chain.
    #[serde(default = "default_persist_concurrency")]
    pub persist_concurrency: usize,
    #[serde(default = "default_chain_stagger_ms")]
    pub chain_stagger_ms: u64,
    /// Skip a chain whose event window keeps failing instead of aborting the run.
    #[serde(default)]
    pub best_effort: bool,
    /// Immutables are re-read once the stored copy is this many blocks old.
    #[serde(default = "default_immutables_refresh_blocks")]
    pub immutables_refresh_blocks: i64,
    #[serde(default)]
    pub retry: RetrySettings,
    pub chains: BTreeMap<String, ChainConfig>,
    #[serde(default)]
    pub protocols: Vec<ProtocolConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub exponential: bool,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            exponential: true,
            jitter_ms: 250,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Etherscan-compatible API used to locate contract creation transactions.
    pub explorer_url: Option<String>,
    pub explorer_api_key: Option<String>,
    /// Largest `eth_getLogs` span the provider accepts.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProtocolConfig {
    pub protocol_id: i32,
    pub name: String,
    pub kind: ProtocolKind,
    pub deployments: Vec<DeploymentConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DeploymentConfig {
    pub chain: String,
    pub collateral_registry: String,
    #[serde(default)]
    pub collaterals: Vec<CollateralConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CollateralConfig {
    pub index: i32,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    #[serde(default = "default_decimals")]
    pub feed_decimals: u32,
    #[serde(default)]
    pub is_lst: bool,
    /// Branch AddressesRegistry; read from the TroveManager when absent.
    pub addresses_registry: Option<String>,
    /// Collateral/USD oracle. Discovered from the price feed's creation code when absent.
    pub oracle: Option<String>,
    pub oracle_arg_index: Option<usize>,
    /// Number of constructor arguments of the price feed; sizes the bytecode tail.
    #[serde(default = "default_constructor_args")]
    pub constructor_arg_count: usize,
    /// Underlying asset/USD oracle for LSTs.
    pub underlying_oracle: Option<String>,
    pub underlying_oracle_arg_index: Option<usize>,
    /// Contract exposing the LST's canonical exchange rate.
    pub rate_provider: Option<String>,
    pub rate_signature: Option<String>,
    #[serde(default = "default_decimals")]
    pub rate_decimals: u32,
    pub deviation_formula: Option<String>,
}

fn default_history_blocks() -> i64 { 200_000 }
fn default_persist_concurrency() -> usize { 20 }
fn default_chain_stagger_ms() -> u64 { 1_500 }
fn default_immutables_refresh_blocks() -> i64 { 50_000 }
fn default_max_block_range() -> i64 { 10_000 }
fn default_timeout_secs() -> u64 { 20 }
fn default_decimals() -> u32 { 18 }
fn default_constructor_args() -> usize { 6 }

impl Config {
    /// Reads `path`, then lets `INDEXER__<KEY>` environment variables override it
    /// (e.g. `INDEXER__DATABASE_URL`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();
        let builder = config::Config::builder()
            .add_source(config::File::from(config_path)
                .required(true))
            .add_source(config::Environment::with_prefix("INDEXER").separator("__"));

        let settings = builder.build()
            .with_context(|| format!("Failed to build configuration from path: {:?}", config_path))?;

        settings.try_deserialize()
            .with_context(|| format!("Failed to deserialize configuration from path: {:?}", config_path))
    }

    pub fn chain(&self, name: &str) -> Result<&ChainConfig, IndexerError> {
        self.chains
            .get(name)
            .ok_or_else(|| IndexerError::Config(format!("no chain configured named {}", name)))
    }

    pub fn protocol(&self, protocol_id: i32) -> Result<&ProtocolConfig, IndexerError> {
        self.protocols
            .iter()
            .find(|p| p.protocol_id == protocol_id)
            .ok_or_else(|| IndexerError::Config(format!("no protocol configured with id {}", protocol_id)))
    }
}

impl ProtocolConfig {
    pub fn deployment(&self, chain: &str) -> Result<&DeploymentConfig, IndexerError> {
        self.deployments
            .iter()
            .find(|d| d.chain == chain)
            .ok_or_else(|| {
                IndexerError::Config(format!(
                    "protocol {} has no deployment on {}",
                    self.protocol_id, chain
                ))
            })
    }
}

impl DeploymentConfig {
    pub fn collateral(&self, index: i32) -> Option<&CollateralConfig> {
        self.collaterals.iter().find(|c| c.index == index)
    }
}
