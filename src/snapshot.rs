//! Snapshot sync: troves, immutables and pool metrics of one protocol/chain,
//! all read at one pinned block.
//!
//! The three kinds are fetched and persisted independently; a failure in one
//! is logged and does not stop the others. Reads are retried once.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, DeploymentConfig};
use crate::db::models::trove_data::NewTroveData;
use crate::db::models::trove_managers::TroveManager;
use crate::db::{ConflictPolicy, Store};
use crate::error::{GatewayError, IndexerError, IndexerResult};
use crate::gateway::{BlockRef, BlockTag, ChainGateway};
use crate::logging::{Keyword, LogContext, LogSink};
use crate::protocol::{AdapterRegistry, ColImmutables, ProtocolAdapter, TroveManagerInfo};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindOutcome {
    Written(usize),
    /// Stored copy is recent enough; nothing read.
    Fresh,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReport {
    pub block: BlockRef,
    pub troves: KindOutcome,
    pub immutables: KindOutcome,
    pub pool_data: KindOutcome,
}

pub struct SnapshotSync {
    config: Arc<Config>,
    gateway: Arc<dyn ChainGateway>,
    store: Arc<dyn Store>,
    adapters: AdapterRegistry,
    log: LogSink,
    policy: ConflictPolicy,
}

fn to_info(tm: &TroveManager) -> TroveManagerInfo {
    TroveManagerInfo {
        index: tm.trove_manager_index,
        address: tm.address.clone(),
        collateral_token: tm.collateral_token.clone(),
    }
}

impl SnapshotSync {
    pub fn new(
        config: Arc<Config>,
        gateway: Arc<dyn ChainGateway>,
        store: Arc<dyn Store>,
        adapters: AdapterRegistry,
        log: LogSink,
    ) -> Self {
        Self {
            config,
            gateway,
            store,
            adapters,
            log,
            policy: ConflictPolicy::Ignore,
        }
    }

    /// Conflict policy for every write; `Update` turns a run into a resync.
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn run(&self, protocol_id: i32, chain: &str) -> IndexerResult<SnapshotReport> {
        let ctx = LogContext::new(chain, protocol_id);
        let protocol = self.config.protocol(protocol_id)?;
        let deployment = protocol.deployment(chain)?;
        let chain_cfg = self.config.chain(chain)?;
        let adapter = self.adapters.get(protocol.kind)?;
        let retry = RetryPolicy::snapshot(Duration::from_secs(chain_cfg.timeout_secs));

        let block = retry
            .run("latest_block", || async { Ok(self.gateway.latest_block(chain).await?) })
            .await?;
        self.store.record_block(chain, block).await?;
        let tag = BlockTag::Number(block.number);

        let roster = retry
            .run("fetch_trove_managers", || async {
                Ok(adapter
                    .fetch_trove_managers(self.gateway.as_ref(), chain, deployment, tag)
                    .await?)
            })
            .await;
        let managers = match roster {
            Ok(infos) => self.store.upsert_trove_managers(protocol_id, chain, &infos).await?,
            Err(e) => {
                self.log_failure(&ctx, "snapshot:roster", &e);
                self.store.trove_managers(protocol_id, chain).await?
            }
        };

        let troves = self
            .sync_troves(&ctx, &retry, adapter.as_ref(), &managers, block)
            .await
            .unwrap_or_else(|e| self.failed(&ctx, "snapshot:troves", e));
        let immutables = self
            .sync_immutables(&ctx, &retry, adapter.as_ref(), deployment, &managers, block)
            .await
            .unwrap_or_else(|e| self.failed(&ctx, "snapshot:immutables", e));
        let pool_data = self
            .sync_pool_data(&ctx, &retry, adapter.as_ref(), deployment, &managers, block)
            .await
            .unwrap_or_else(|e| self.failed(&ctx, "snapshot:pool_data", e));

        info!(
            "Snapshot of protocol {} on {} at block {}: troves {:?}, immutables {:?}, pool data {:?}",
            protocol_id, chain, block.number, troves, immutables, pool_data
        );
        Ok(SnapshotReport {
            block,
            troves,
            immutables,
            pool_data,
        })
    }

    fn log_failure(&self, ctx: &LogContext, function: &str, e: &IndexerError) {
        let keyword = if e.is_timeout() { Keyword::Timeout } else { Keyword::Critical };
        self.log.log(ctx, function, keyword, e.to_string());
    }

    fn failed(&self, ctx: &LogContext, function: &str, e: IndexerError) -> KindOutcome {
        self.log_failure(ctx, function, &e);
        KindOutcome::Failed
    }

    async fn sync_troves(
        &self,
        ctx: &LogContext,
        retry: &RetryPolicy,
        adapter: &dyn ProtocolAdapter,
        managers: &[TroveManager],
        block: BlockRef,
    ) -> IndexerResult<KindOutcome> {
        let chain = ctx.chain.as_str();
        let tag = BlockTag::Number(block.number);

        let readings: Vec<IndexerResult<Vec<NewTroveData>>> = stream::iter(managers)
            .map(|tm| async move {
                let info = to_info(tm);
                let troves = retry
                    .run("fetch_troves", || async {
                        Ok(adapter.fetch_troves(self.gateway.as_ref(), chain, &info, tag).await?)
                    })
                    .await?;
                troves
                    .iter()
                    .map(|t| {
                        t.try_map_to_db(tm.id, block.number)
                            .map_err(|e| IndexerError::Gateway(GatewayError::Decode(e.to_string())))
                    })
                    .collect()
            })
            .buffered(self.config.persist_concurrency.max(1))
            .collect()
            .await;

        let mut rows = Vec::new();
        for reading in readings {
            rows.extend(reading?);
        }
        let written = self.store.insert_troves(rows, self.policy).await?;
        Ok(KindOutcome::Written(written))
    }

    async fn sync_immutables(
        &self,
        ctx: &LogContext,
        retry: &RetryPolicy,
        adapter: &dyn ProtocolAdapter,
        deployment: &DeploymentConfig,
        managers: &[TroveManager],
        block: BlockRef,
    ) -> IndexerResult<KindOutcome> {
        let chain = ctx.chain.as_str();
        if let Some(stored) = self.store.latest_immutables_block(ctx.protocol_id, chain).await? {
            let stored_for_all = self.store.latest_col_immutables(ctx.protocol_id, chain).await?.len() == managers.len();
            if stored_for_all && block.number - stored < self.config.immutables_refresh_blocks {
                return Ok(KindOutcome::Fresh);
            }
        }

        let infos: Vec<TroveManagerInfo> = managers.iter().map(to_info).collect();
        let tag = BlockTag::Number(block.number);
        let snapshot = retry
            .run("fetch_immutables", || async {
                Ok(adapter
                    .fetch_immutables(self.gateway.as_ref(), chain, deployment, &infos, tag)
                    .await?)
            })
            .await?;

        let core = snapshot.core.map_to_db(ctx.protocol_id, chain, block.number);
        let collaterals = snapshot
            .collaterals
            .iter()
            .map(|col| {
                let tm = self.manager_for(managers, col.trove_manager_index)?;
                col.try_map_to_db(tm.id, block.number)
                    .map_err(|e| IndexerError::Gateway(GatewayError::Decode(e.to_string())))
            })
            .collect::<IndexerResult<Vec<_>>>()?;
        let written = self.store.insert_immutables(core, collaterals, self.policy).await?;
        Ok(KindOutcome::Written(written))
    }

    async fn sync_pool_data(
        &self,
        ctx: &LogContext,
        retry: &RetryPolicy,
        adapter: &dyn ProtocolAdapter,
        deployment: &DeploymentConfig,
        managers: &[TroveManager],
        block: BlockRef,
    ) -> IndexerResult<KindOutcome> {
        let chain = ctx.chain.as_str();
        let stored = self.store.latest_col_immutables(ctx.protocol_id, chain).await?;
        if stored.is_empty() {
            return Err(IndexerError::Config(format!(
                "no immutables stored for protocol {} on {}",
                ctx.protocol_id, chain
            )));
        }
        let immutables: Vec<ColImmutables> = stored
            .iter()
            .map(|(tm, row)| ColImmutables {
                trove_manager_index: tm.trove_manager_index,
                trove_manager: tm.address.clone(),
                collateral_token: row.collateral_token.clone(),
                collateral_decimals: row.collateral_decimals,
                addresses_registry: row.addresses_registry.clone(),
                price_feed: row.price_feed.clone(),
                active_pool: row.active_pool.clone(),
                default_pool: row.default_pool.clone(),
                stability_pool: row.stability_pool.clone(),
                borrower_operations: row.borrower_operations.clone(),
                sorted_troves: row.sorted_troves.clone(),
                ccr: row.ccr.to_string(),
                mcr: row.mcr.to_string(),
                scr: row.scr.to_string(),
            })
            .collect();

        let tag = BlockTag::Number(block.number);
        let snapshot = retry
            .run("fetch_pool_data", || async {
                Ok(adapter
                    .fetch_pool_data(self.gateway.as_ref(), chain, deployment, &immutables, tag)
                    .await?)
            })
            .await?;

        let decode = |e: anyhow::Error| IndexerError::Gateway(GatewayError::Decode(e.to_string()));
        let core = snapshot
            .core
            .try_map_to_db(ctx.protocol_id, chain, block.number)
            .map_err(decode)?;
        let collaterals = snapshot
            .collaterals
            .iter()
            .map(|col| {
                let tm = self.manager_for(managers, col.trove_manager_index)?;
                col.try_map_to_db(tm.id, block.number).map_err(decode)
            })
            .collect::<IndexerResult<Vec<_>>>()?;
        let written = self.store.insert_pool_data(core, collaterals, self.policy).await?;
        Ok(KindOutcome::Written(written))
    }

    fn manager_for<'a>(&self, managers: &'a [TroveManager], index: i32) -> IndexerResult<&'a TroveManager> {
        managers
            .iter()
            .find(|tm| tm.trove_manager_index == index)
            .ok_or_else(|| IndexerError::Config(format!("trove manager {} is not in the roster", index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::gateway::contracts::{
        ActivePoolCall, AddressesRegistryCall, AggBatchManagementFeesCall, AggRecordedDebtCall,
        AggWeightedDebtSumCall, BaseRateCall, BoldTokenCall, BorrowerOperationsCall, CcrCall, CollTokenCall,
        DecimalsCall, DefaultPoolCall, GetBoldDebtCall, GetCollBalanceCall, GetLatestTroveDataCall,
        GetLatestTroveDataReturn, GetTokenCall, GetTotalBoldDepositsCall, GetTroveFromTroveIdsArrayCall,
        GetTroveIdsCountCall, GetTroveManagerCall, McrCall, PriceFeedCall, ScrCall, SortedTrovesCall,
        StabilityPoolCall, TotalCollateralsCall, TotalSupplyCall, TrovesCall, TrovesReturn,
    };
    use crate::gateway::fake::FakeGateway;
    use crate::gateway::parse_address;
    use bigdecimal::BigDecimal;
    use ethers::types::{Address, U256};

    const REGISTRY: &str = "0x00000000000000000000000000000000000000c0";
    const TM: &str = "0x00000000000000000000000000000000000000d0";
    const TOKEN: &str = "0x00000000000000000000000000000000000000e0";
    const ADDRESSES: &str = "0x00000000000000000000000000000000000000a0";
    const BOLD: &str = "0x00000000000000000000000000000000000000b0";
    const ACTIVE: &str = "0x0000000000000000000000000000000000000011";
    const DEFAULT: &str = "0x0000000000000000000000000000000000000012";
    const SP: &str = "0x0000000000000000000000000000000000000013";

    fn config() -> Arc<Config> {
        let toml = r#"
            database_url = "postgres://localhost/troves"
            listen_addr = "127.0.0.1:0"
            immutables_refresh_blocks = 1000
            [chains.ethereum]
            rpc_url = "http://localhost:8545"
            timeout_secs = 5
            [[protocols]]
            protocol_id = 1
            name = "liquity-v2"
            kind = "liquity_v2"
            [[protocols.deployments]]
            chain = "ethereum"
            collateral_registry = "0x00000000000000000000000000000000000000c0"
        "#;
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        Arc::new(settings.try_deserialize().unwrap())
    }

    fn address(value: &str) -> Address {
        parse_address(value).unwrap()
    }

    fn roster(gateway: &FakeGateway) {
        gateway.on_call(REGISTRY, TotalCollateralsCall, U256::one());
        gateway.on_call(REGISTRY, GetTroveManagerCall { index: U256::zero() }, address(TM));
        gateway.on_call(REGISTRY, GetTokenCall { index: U256::zero() }, address(TOKEN));
    }

    fn troves(gateway: &FakeGateway) {
        gateway.on_call(TM, GetTroveIdsCountCall, U256::from(2u64));
        for (i, id, status, rate) in [(0u64, 11u64, 1u8, U256::exp10(16) * 5), (1, 12, 3, U256::zero())] {
            let trove_id = U256::from(id);
            gateway.on_call(TM, GetTroveFromTroveIdsArrayCall { index: U256::from(i) }, trove_id);
            gateway.on_call(
                TM,
                TrovesCall { trove_id },
                TrovesReturn {
                    debt: U256::zero(),
                    coll: U256::zero(),
                    stake: U256::from(5u64),
                    status,
                    array_index: i,
                    last_debt_update_time: 1_700_000_000,
                    last_interest_rate_adj_time: 0,
                    annual_interest_rate: U256::zero(),
                    interest_batch_manager: Address::zero(),
                    batch_debt_shares: U256::zero(),
                },
            );
            gateway.on_call(
                TM,
                GetLatestTroveDataCall { trove_id },
                GetLatestTroveDataReturn {
                    entire_debt: U256::exp10(18) * 2_000,
                    entire_coll: U256::exp10(18),
                    redist_bold_debt_gain: U256::zero(),
                    redist_coll_gain: U256::zero(),
                    accrued_interest: U256::zero(),
                    recorded_debt: U256::zero(),
                    annual_interest_rate: rate,
                    weighted_recorded_debt: U256::zero(),
                    accrued_batch_management_fee: U256::zero(),
                    last_interest_rate_adj_time: U256::zero(),
                },
            );
        }
    }

    fn immutables(gateway: &FakeGateway) {
        gateway.on_call(REGISTRY, BoldTokenCall, address(BOLD));
        gateway.on_call(TM, AddressesRegistryCall, address(ADDRESSES));
        gateway.on_call(ADDRESSES, CollTokenCall, address(TOKEN));
        gateway.on_call(TOKEN, DecimalsCall, 18u8);
        gateway.on_call(ADDRESSES, PriceFeedCall, Address::from_low_u64_be(0x14));
        gateway.on_call(ADDRESSES, ActivePoolCall, address(ACTIVE));
        gateway.on_call(ADDRESSES, DefaultPoolCall, address(DEFAULT));
        gateway.on_call(ADDRESSES, StabilityPoolCall, address(SP));
        gateway.on_call(ADDRESSES, BorrowerOperationsCall, Address::from_low_u64_be(0x15));
        gateway.on_call(ADDRESSES, SortedTrovesCall, Address::from_low_u64_be(0x16));
        gateway.on_call(ADDRESSES, CcrCall, U256::exp10(17) * 15);
        gateway.on_call(ADDRESSES, McrCall, U256::exp10(17) * 11);
        gateway.on_call(ADDRESSES, ScrCall, U256::exp10(17) * 11);
    }

    fn pools(gateway: &FakeGateway) {
        let word = |v: u64| U256::from(v);
        gateway.on_call(BOLD, TotalSupplyCall, word(5_000));
        gateway.on_call(REGISTRY, BaseRateCall, word(7));
        gateway.on_call(ACTIVE, GetBoldDebtCall, word(100));
        gateway.on_call(DEFAULT, GetBoldDebtCall, word(20));
        gateway.on_call(ACTIVE, GetCollBalanceCall, word(30));
        gateway.on_call(DEFAULT, GetCollBalanceCall, word(4));
        gateway.on_call(SP, GetTotalBoldDepositsCall, word(60));
        gateway.on_call(SP, GetCollBalanceCall, word(2));
        gateway.on_call(ACTIVE, AggRecordedDebtCall, word(110));
        gateway.on_call(ACTIVE, AggWeightedDebtSumCall, word(9));
        gateway.on_call(ACTIVE, AggBatchManagementFeesCall, word(1));
    }

    fn sync(gateway: Arc<FakeGateway>, store: Arc<MemoryStore>, log: LogSink) -> SnapshotSync {
        SnapshotSync::new(config(), gateway, store, AdapterRegistry::with_defaults(4), log)
    }

    #[tokio::test]
    async fn pins_every_kind_to_one_block() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_latest(BlockRef { number: 500, timestamp: 1_700_000_000 });
        roster(&gateway);
        troves(&gateway);
        immutables(&gateway);
        pools(&gateway);
        let store = Arc::new(MemoryStore::new());
        let log = LogSink::init();

        let report = sync(gateway, store.clone(), log.clone()).run(1, "ethereum").await.unwrap();
        assert_eq!(report.troves, KindOutcome::Written(2));
        assert_eq!(report.immutables, KindOutcome::Written(2));
        assert_eq!(report.pool_data, KindOutcome::Written(2));
        assert!(log.events().is_empty());

        let troves = store.troves();
        assert!(troves.iter().all(|t| t.block_number == 500));
        assert_eq!(troves.iter().map(|t| t.status).collect::<Vec<_>>(), vec![1, 3]);
        let pool = &store.col_pool()[0];
        assert_eq!(pool.block_number, 500);
        assert_eq!(pool.entire_system_debt, BigDecimal::from(120));
        assert_eq!(pool.entire_system_coll, BigDecimal::from(34));
        assert_eq!(store.col_immutables()[0].ccr, "1500000000000000000".parse::<BigDecimal>().unwrap());
    }

    #[tokio::test]
    async fn one_failing_kind_does_not_block_the_others() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_latest(BlockRef { number: 500, timestamp: 1_700_000_000 });
        roster(&gateway);
        immutables(&gateway);
        pools(&gateway);
        // No trove calls scripted: the trove read fails.
        let store = Arc::new(MemoryStore::new());
        let log = LogSink::init();

        let report = sync(gateway, store.clone(), log.clone()).run(1, "ethereum").await.unwrap();
        assert_eq!(report.troves, KindOutcome::Failed);
        assert_eq!(report.immutables, KindOutcome::Written(2));
        assert_eq!(report.pool_data, KindOutcome::Written(2));
        assert!(store.troves().is_empty());
        assert_eq!(log.count(Keyword::Critical), 1);
    }

    #[tokio::test]
    async fn immutables_refresh_on_slow_cadence() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_latest(BlockRef { number: 500, timestamp: 1_700_000_000 });
        roster(&gateway);
        troves(&gateway);
        immutables(&gateway);
        pools(&gateway);
        let store = Arc::new(MemoryStore::new());
        let snapshot = sync(gateway.clone(), store.clone(), LogSink::init());

        snapshot.run(1, "ethereum").await.unwrap();
        gateway.set_latest(BlockRef { number: 900, timestamp: 1_700_004_800 });
        let report = snapshot.run(1, "ethereum").await.unwrap();
        assert_eq!(report.immutables, KindOutcome::Fresh);
        assert_eq!(report.pool_data, KindOutcome::Written(2));

        gateway.set_latest(BlockRef { number: 1_600, timestamp: 1_700_013_200 });
        let report = snapshot.run(1, "ethereum").await.unwrap();
        assert_eq!(report.immutables, KindOutcome::Written(2));
        assert_eq!(store.col_immutables().len(), 2);
    }

    #[tokio::test]
    async fn missing_deployment_is_fatal() {
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryStore::new());
        let err = sync(gateway, store, LogSink::init()).run(1, "arbitrum").await.unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }
}
