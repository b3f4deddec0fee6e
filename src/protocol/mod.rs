//! Protocol adapters.
//!
//! A [`ProtocolAdapter`] maps the abstract reads the pipeline needs (roster,
//! troves, immutables, pool metrics, operation events) onto the concrete
//! contract calls of one protocol family. Adapters are looked up in an
//! [`AdapterRegistry`] keyed by [`ProtocolKind`]; supporting a new family means
//! adding a variant and an adapter, not branching in the jobs.

pub mod events;
pub mod liquity_v2;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;

use crate::config::DeploymentConfig;
use crate::error::{GatewayError, IndexerError};
use crate::gateway::{BlockTag, ChainGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    LiquityV2,
}

/// On-chain trove status, as stored in `TroveManager.Troves(id).status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TroveStatus {
    NonExistent = 0,
    Active = 1,
    ClosedByOwner = 2,
    ClosedByLiquidation = 3,
    Zombie = 4,
}

impl TryFrom<i64> for TroveStatus {
    type Error = GatewayError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TroveStatus::NonExistent),
            1 => Ok(TroveStatus::Active),
            2 => Ok(TroveStatus::ClosedByOwner),
            3 => Ok(TroveStatus::ClosedByLiquidation),
            4 => Ok(TroveStatus::Zombie),
            other => Err(GatewayError::Decode(format!("unknown trove status {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TroveManagerInfo {
    pub index: i32,
    pub address: String,
    pub collateral_token: String,
}

/// One trove's ledger state. Amounts are raw integer strings.
#[derive(Debug, Clone, PartialEq)]
pub struct TroveReading {
    pub trove_manager_index: i32,
    pub trove_id: String,
    pub debt: String,
    pub coll: String,
    pub stake: String,
    pub status: TroveStatus,
    pub annual_interest_rate: String,
    pub last_debt_update_time: i64,
    pub interest_batch_manager: Option<String>,
    pub batch_debt_shares: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoreImmutables {
    pub collateral_registry: String,
    pub bold_token: String,
    pub total_collaterals: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColImmutables {
    pub trove_manager_index: i32,
    pub trove_manager: String,
    pub collateral_token: String,
    pub collateral_decimals: i32,
    pub addresses_registry: String,
    pub price_feed: String,
    pub active_pool: String,
    pub default_pool: String,
    pub stability_pool: String,
    pub borrower_operations: String,
    pub sorted_troves: String,
    pub ccr: String,
    pub mcr: String,
    pub scr: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImmutablesSnapshot {
    pub core: CoreImmutables,
    pub collaterals: Vec<ColImmutables>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColPoolReading {
    pub trove_manager_index: i32,
    pub entire_system_debt: String,
    pub entire_system_coll: String,
    pub sp_deposits: String,
    pub sp_coll: String,
    pub agg_recorded_debt: String,
    pub agg_weighted_debt_sum: String,
    pub agg_batch_management_fees: String,
    pub trove_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorePoolReading {
    pub bold_supply: String,
    pub base_rate: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub core: CorePoolReading,
    pub collaterals: Vec<ColPoolReading>,
}

/// A protocol log decoded into the uniform event shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub trove_manager_index: i32,
    pub block_number: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub event_name: String,
    pub event_data: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub events: Vec<ParsedEvent>,
    /// Logs that could not be parsed; reported, never fatal.
    pub skipped: Vec<String>,
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    async fn fetch_trove_managers(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        deployment: &DeploymentConfig,
        block: BlockTag,
    ) -> Result<Vec<TroveManagerInfo>, GatewayError>;

    async fn fetch_troves(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        trove_manager: &TroveManagerInfo,
        block: BlockTag,
    ) -> Result<Vec<TroveReading>, GatewayError>;

    async fn fetch_immutables(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        deployment: &DeploymentConfig,
        trove_managers: &[TroveManagerInfo],
        block: BlockTag,
    ) -> Result<ImmutablesSnapshot, GatewayError>;

    async fn fetch_pool_data(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        deployment: &DeploymentConfig,
        immutables: &[ColImmutables],
        block: BlockTag,
    ) -> Result<PoolSnapshot, GatewayError>;

    async fn fetch_events(
        &self,
        gateway: &dyn ChainGateway,
        chain: &str,
        trove_managers: &[TroveManagerInfo],
        from_block: i64,
        to_block: i64,
    ) -> Result<EventBatch, GatewayError>;
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProtocolKind, Arc<dyn ProtocolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter this crate ships.
    pub fn with_defaults(concurrency: usize) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(liquity_v2::LiquityV2Adapter::new(concurrency)));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ProtocolKind) -> Result<Arc<dyn ProtocolAdapter>, IndexerError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| IndexerError::Config(format!("no adapter registered for {:?}", kind)))
    }
}
